//! Bridge between RPN formulas and the SMT backend.
//!
//! [`translate`] lowers formulas to the solver AST (and back, for the
//! simplifier); [`solver`] defines the backend interface of the external SMT
//! solver together with a bounded-enumeration reference implementation;
//! [`cache`] memoises subsumption queries by syntactic fingerprint.

pub mod cache;
pub mod solver;
pub mod term;
pub mod translate;
