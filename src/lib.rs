//! Symbolic model checker for LLVM-like multi-threaded programs.
//!
//! A program configuration is kept as a hybrid state: an explicit part
//! (control, pointers, concrete values) and a symbolic part (a quantifier-free
//! bit-vector path condition plus SSA-style definitions). The state space is
//! enumerated by an [`eval::Evaluator`] that advances one thread at a time up
//! to an observable boundary; visited states are deduplicated by a quantified
//! SMT subsumption check inside the [`db::Database`].
//!
//! The LLVM bitcode loader, the SMT backend and the LTL→Büchi translator are
//! external collaborators; this crate defines the interfaces they target
//! ([`program::Module`], [`smt::Solver`], [`buchi::BuchiAutomaton`]).

pub mod blob;
pub mod buchi;
pub mod config;
pub mod consts;
pub mod context;
pub mod control;
pub mod db;
pub mod error;
pub mod eval;
pub mod formula;
pub mod graph;
pub mod layout;
pub mod program;
pub mod search;
pub mod smt;
pub mod stats;
pub mod store;

pub mod prelude {
    pub use crate::blob::Blob;
    pub use crate::buchi::{ApTable, BuchiAutomaton};
    pub use crate::config::{Settings, SimplifyLevel};
    pub use crate::context::{Context, CtxRef};
    pub use crate::db::{Database, StateId};
    pub use crate::error::{CheckError, DatabaseError, SolverError};
    pub use crate::eval::Evaluator;
    pub use crate::formula::{Definition, Formula, Ident};
    pub use crate::program::{FunctionBuilder, Module, ModuleBuilder};
    pub use crate::search::ltl::{Ltl, LtlVerdict};
    pub use crate::search::reach::{Reachability, Verdict};
    pub use crate::smt::solver::{CheckResult, EnumSolver, Solver};
    pub use crate::store::partial::PartialStore;
    pub use crate::store::smt::SmtStore;
    pub use crate::store::{DataStore, SymStore};
}
