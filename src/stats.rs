//! Named run counters.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;

pub const INSTR_EXECUTED: &str = "Instructions executed";
pub const INSTR_OBSERVABLE: &str = "Instructions executed observable";
pub const SUBSETEQ_CALLS: &str = "Subseteq queries";
pub const SUBSETEQ_SYNTAX_EQUAL: &str = "Subseteq on syntax";
pub const SMT_CACHED: &str = "Equal query cached";
pub const QF_SIMP: &str = "QF queries solved via simplification";
pub const QF_SOLVER: &str = "QF queries solved via solver";
pub const Q_SIMP: &str = "Q queries solved via simplification";
pub const Q_SOLVER: &str = "Q queries solved via solver";
pub const SOLVER_UNKNOWN: &str = "Solver unknown";
pub const SIMPLIFY_CALLS: &str = "SMT simplify calls";
pub const EMPTY_CALLS: &str = "SMT calls Empty()";

/// Counter table owned by the process-wide [`crate::context::Context`].
#[derive(Debug, Default)]
pub struct Stats {
    counters: BTreeMap<&'static str, u64>,
}

impl Stats {
    pub fn bump(&mut self, name: &'static str) {
        *self.counters.entry(name).or_insert(0) += 1;
    }

    pub fn add(&mut self, name: &'static str, amount: u64) {
        *self.counters.entry(name).or_insert(0) += amount;
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.counters
                .iter()
                .map(|(name, value)| format!("{name}: {value}"))
                .format("\n")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut stats = Stats::default();
        stats.bump(SUBSETEQ_CALLS);
        stats.bump(SUBSETEQ_CALLS);
        stats.add(SOLVER_UNKNOWN, 3);
        assert_eq!(stats.get(SUBSETEQ_CALLS), 2);
        assert_eq!(stats.get(SOLVER_UNKNOWN), 3);
        assert_eq!(stats.get("missing"), 0);
    }
}
