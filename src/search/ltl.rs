//! LTL checking by nested DFS over the product with a Büchi automaton.
//!
//! A product state is `(program state, BA state)`; the BA state index lives
//! in the blob's user region, so the database keys on it together with the
//! explicit bytes. The outer DFS colours vertices white/gray/black and, on
//! backtracking from an accepting vertex, an inner DFS hunts for a cycle
//! back to it. Inner-DFS visits are marked with a per-run epoch: only
//! vertices unvisited by the *current* inner pass are extensible.

use std::rc::Rc;

use tracing::debug;

use crate::buchi::BuchiAutomaton;
use crate::context::CtxRef;
use crate::db::{Database, ExplicitUserSpan, StateId, SubsetHit};
use crate::error::CheckError;
use crate::eval::Evaluator;
use crate::graph::Graph;
use crate::program::Module;
use crate::store::SymStore;

/// Outcome of an LTL run: the property of interest is encoded in the
/// automaton (negated before translation), so a cycle is a violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LtlVerdict {
    Holds { states: usize },
    CycleFound { on: StateId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

#[derive(Debug, Clone, Copy)]
struct VertexInfo {
    outer: Color,
    inner_epoch: u64,
    accepting: bool,
    expanded: bool,
}

impl VertexInfo {
    fn new(accepting: bool) -> Self {
        VertexInfo {
            outer: Color::White,
            inner_epoch: 0,
            accepting,
            expanded: false,
        }
    }
}

const INITIAL_DEPTH_BOUND: usize = 16;

pub struct Ltl<S: SymStore> {
    eval: Evaluator<S>,
    ba: BuchiAutomaton,
    db: Database<S, SubsetHit, ExplicitUserSpan>,
    graph: Graph<StateId, VertexInfo>,
    /// Iterative deepening: bound the outer DFS, doubling on exhaustion.
    iterative: bool,
    epoch: u64,
    ctx: CtxRef,
}

impl<S: SymStore> Ltl<S> {
    pub fn new(
        program: Rc<Module>,
        ba: BuchiAutomaton,
        ctx: CtxRef,
        iterative: bool,
    ) -> Result<Self, CheckError> {
        Ok(Ltl {
            eval: Evaluator::new(program, ctx.clone())?,
            ba,
            db: Database::new(ctx.clone(), SubsetHit),
            graph: Graph::new(),
            iterative,
            epoch: 0,
            ctx,
        })
    }

    pub fn run(&mut self) -> Result<LtlVerdict, CheckError> {
        let init_ba = self.ba.init();
        let user = (init_ba as u32).to_ne_bytes();
        let initial = self.eval.write_blob(&user);
        let (_, init_id) = self.db.insert_check(initial);
        self.graph
            .add_vertex(init_id, VertexInfo::new(self.ba.accepting(init_ba)));

        let mut bound = if self.iterative {
            INITIAL_DEPTH_BOUND
        } else {
            usize::MAX
        };

        loop {
            let (cycle, truncated) = self.outer_dfs(init_id, bound)?;
            if let Some(on) = cycle {
                return Ok(LtlVerdict::CycleFound { on });
            }
            if !truncated {
                return Ok(LtlVerdict::Holds {
                    states: self.db.len(),
                });
            }
            bound = bound.saturating_mul(2);
            debug!(bound, "search exhausted below the bound, deepening");
            self.graph.for_each_info_mut(|info| info.outer = Color::White);
        }
    }

    fn color(&self, id: StateId) -> Color {
        self.graph.info(&id).map(|i| i.outer).unwrap_or(Color::White)
    }

    fn set_color(&mut self, id: StateId, color: Color) {
        if let Some(info) = self.graph.info_mut(&id) {
            info.outer = color;
        }
    }

    fn outer_dfs(
        &mut self,
        root: StateId,
        bound: usize,
    ) -> Result<(Option<StateId>, bool), CheckError> {
        let mut truncated = false;
        let mut stack: Vec<(StateId, usize, usize)> = Vec::new();
        self.set_color(root, Color::Gray);
        stack.push((root, 0, 0));

        while let Some((vertex, child, depth)) = stack.pop() {
            let successors = self.successors_of(vertex)?;
            if child < successors.len() {
                stack.push((vertex, child + 1, depth));
                let next = successors[child];
                if self.color(next) == Color::White {
                    if depth + 1 >= bound {
                        truncated = true;
                    } else {
                        self.set_color(next, Color::Gray);
                        stack.push((next, 0, depth + 1));
                    }
                }
            } else {
                self.set_color(vertex, Color::Black);
                let accepting = self
                    .graph
                    .info(&vertex)
                    .map(|i| i.accepting)
                    .unwrap_or(false);
                if accepting && self.inner_dfs(vertex) {
                    return Ok((Some(vertex), truncated));
                }
            }
        }
        Ok((None, truncated))
    }

    /// Searches for a cycle through `seed` over the cached product graph.
    fn inner_dfs(&mut self, seed: StateId) -> bool {
        self.epoch += 1;
        let epoch = self.epoch;
        let mut stack = vec![seed];

        while let Some(vertex) = stack.pop() {
            for next in self.graph.successors(&vertex).to_vec() {
                if next == seed {
                    return true;
                }
                if let Some(info) = self.graph.info_mut(&next) {
                    if info.inner_epoch == epoch {
                        continue;
                    }
                    info.inner_epoch = epoch;
                    // Depth-cut vertices have no cached successors yet; the
                    // deepening pass will revisit them.
                    if info.expanded {
                        stack.push(next);
                    }
                }
            }
        }
        false
    }

    /// Product successors of a vertex: for every BA edge out of its BA
    /// state, guard the program state with the edge's proposition and
    /// advance. Cached in the graph so revisits cost nothing.
    fn successors_of(&mut self, vertex: StateId) -> Result<Vec<StateId>, CheckError> {
        let expanded = self
            .graph
            .info(&vertex)
            .map(|i| i.expanded)
            .unwrap_or(false);
        if expanded {
            return Ok(self.graph.successors(&vertex).to_vec());
        }

        let blob = self.db.get_state(vertex)?;
        let mut user_bytes = [0u8; 4];
        user_bytes.copy_from_slice(blob.user());
        let q = u32::from_ne_bytes(user_bytes) as usize;

        for edge in self.ba.edges(q).to_vec() {
            self.eval.read_blob(&blob);
            self.eval.push_prop_guard(&edge.guard);
            if self.eval.constraints_empty() {
                continue;
            }
            let user = (edge.target as u32).to_ne_bytes();
            for succ in self.eval.successors(&user)? {
                let (novel, succ_id) = self.db.insert_check(succ.blob);
                if novel {
                    debug!(states = self.db.len(), "new product state");
                }
                self.graph
                    .add_vertex(succ_id, VertexInfo::new(self.ba.accepting(edge.target)));
                self.graph.add_edge(&vertex, succ_id, ());
            }
        }

        if let Some(info) = self.graph.info_mut(&vertex) {
            info.expanded = true;
        }
        Ok(self.graph.successors(&vertex).to_vec())
    }

    pub fn states_generated(&self) -> usize {
        self.db.len()
    }

    pub fn statistics(&self) -> String {
        self.ctx.dump_stats()
    }

    /// Graphviz rendering of the product graph; accepting vertices are
    /// drawn with a double border.
    pub fn output_state_space(&self) -> String {
        let mut out = String::new();
        let _ = self.graph.to_dot(
            &mut out,
            |id| format!("s{}_{}", id.exp, id.sym),
            |id| id.to_string(),
            |id| {
                let accepting = self.graph.info(id).map(|i| i.accepting).unwrap_or(false);
                if accepting {
                    ", peripheries=2".to_string()
                } else {
                    String::new()
                }
            },
        );
        out
    }
}
