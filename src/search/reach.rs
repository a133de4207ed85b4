//! Reachability of error states.
//!
//! Depth-first over all successors with the database as the visited set;
//! stops at the first reachable error. Successors are pushed in randomised
//! order to dodge degenerate worst cases of the fixed scheduler.

use std::rc::Rc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::blob::Blob;
use crate::context::CtxRef;
use crate::db::{Database, ExplicitSpan, StateId, SubsetHit};
use crate::error::CheckError;
use crate::eval::Evaluator;
use crate::graph::Graph;
use crate::program::Module;
use crate::store::SymStore;

/// Outcome of a reachability run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Safe { states: usize },
    ErrorReached { id: StateId, state: String },
}

pub struct Reachability<S: SymStore> {
    eval: Evaluator<S>,
    db: Database<S, SubsetHit, ExplicitSpan>,
    graph: Graph<StateId>,
    rng: StdRng,
    ctx: CtxRef,
}

impl<S: SymStore> Reachability<S> {
    pub fn new(program: Rc<Module>, ctx: CtxRef) -> Result<Self, CheckError> {
        Ok(Reachability {
            eval: Evaluator::new(program, ctx.clone())?,
            db: Database::new(ctx.clone(), SubsetHit),
            graph: Graph::new(),
            rng: StdRng::seed_from_u64(ctx.settings.seed),
            ctx,
        })
    }

    pub fn run(&mut self) -> Result<Verdict, CheckError> {
        let initial = self.eval.write_blob(&[]);
        let (_, init_id) = self.db.insert_check(initial.clone());
        self.graph.add_vertex(init_id, ());

        let mut to_do: Vec<(StateId, Blob)> = vec![(init_id, initial)];

        while let Some((id, blob)) = to_do.pop() {
            self.eval.read_blob(&blob);
            let successors = self.eval.successors(&[])?;

            let mut fresh = Vec::new();
            for succ in successors {
                if succ.error {
                    let (_, error_id) = self.db.insert_check(succ.blob.clone());
                    self.graph.add_vertex(error_id, ());
                    self.graph.add_edge(&id, error_id, ());
                    self.eval.read_blob(&succ.blob);
                    return Ok(Verdict::ErrorReached {
                        id: error_id,
                        state: self.eval.describe(),
                    });
                }
                let (novel, succ_id) = self.db.insert_check(succ.blob.clone());
                self.graph.add_vertex(succ_id, ());
                self.graph.add_edge(&id, succ_id, ());
                if novel {
                    debug!(states = self.db.len(), "new state");
                    fresh.push((succ_id, succ.blob));
                }
            }

            fresh.shuffle(&mut self.rng);
            to_do.extend(fresh);
        }

        Ok(Verdict::Safe {
            states: self.db.len(),
        })
    }

    pub fn states_generated(&self) -> usize {
        self.db.len()
    }

    pub fn statistics(&self) -> String {
        self.ctx.dump_stats()
    }

    /// Graphviz rendering of the explored state space.
    pub fn output_state_space(&self) -> String {
        let mut out = String::new();
        let _ = self.graph.to_dot(
            &mut out,
            |id| format!("s{}_{}", id.exp, id.sym),
            |id| id.to_string(),
            |_| String::new(),
        );
        out
    }
}
