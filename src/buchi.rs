//! Büchi automata and the atomic-proposition language.
//!
//! The LTL→BA translation itself is an external collaborator; this module
//! defines the automaton the translator yields and the default translator
//! from edge labels (`ap1`, `!ap2`, `&&`/`||` between them) to formulas over
//! program globals.

use crate::consts::GLOBAL_DATA_SEGMENT;
use crate::error::CheckError;
use crate::formula::{Formula, Ident, Op};

#[derive(Debug, Clone)]
pub struct BaEdge {
    pub target: usize,
    pub guard: Formula,
}

#[derive(Debug, Clone, Default)]
struct BaState {
    accepting: bool,
    edges: Vec<BaEdge>,
}

/// A labelled Büchi automaton over atomic-proposition guards.
#[derive(Debug, Clone, Default)]
pub struct BuchiAutomaton {
    states: Vec<BaState>,
    init: usize,
}

impl BuchiAutomaton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_state(&mut self, accepting: bool) -> usize {
        self.states.push(BaState {
            accepting,
            edges: Vec::new(),
        });
        self.states.len() - 1
    }

    pub fn set_init(&mut self, state: usize) {
        self.init = state;
    }

    pub fn init(&self) -> usize {
        self.init
    }

    pub fn add_edge(&mut self, from: usize, to: usize, guard: Formula) {
        self.states[from].edges.push(BaEdge { target: to, guard });
    }

    pub fn accepting(&self, state: usize) -> bool {
        self.states[state].accepting
    }

    pub fn edges(&self, state: usize) -> &[BaEdge] {
        &self.states[state].edges
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }
}

/// Declared atomic propositions: each is a predicate over named globals,
/// already lowered to a formula over the globals data segment.
#[derive(Debug, Clone, Default)]
pub struct ApTable {
    aps: Vec<(String, Formula)>,
}

impl ApTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: &str, predicate: Formula) {
        self.aps.push((name.to_string(), predicate));
    }

    /// Declares `name` as "the global cell at `offset` is non-zero" — the
    /// common shape for flag-like globals.
    pub fn declare_global_nonzero(&mut self, name: &str, offset: usize, bw: u8) {
        let cell = Formula::ident(Ident::new(GLOBAL_DATA_SEGMENT as u16, offset as u16, 0, bw));
        let predicate = Formula::binary(&cell, &Formula::constant(0, bw), Op::Ne);
        self.declare(name, predicate);
    }

    fn lookup(&self, name: &str) -> Result<&Formula, CheckError> {
        self.aps
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f)
            .ok_or_else(|| CheckError::AtomicProposition(name.to_string()))
    }

    fn translate_atom(&self, atom: &str) -> Result<Formula, CheckError> {
        let atom = atom.trim();
        if atom.is_empty() || atom == "1" || atom == "true" {
            return Ok(Formula::bool_val(true));
        }
        if let Some(rest) = atom.strip_prefix('!') {
            return Ok(self.lookup(rest.trim())?.negate());
        }
        Ok(self.lookup(atom)?.clone())
    }

    /// Translates an edge label. Conjunction binds tighter than disjunction,
    /// mirroring the translator's output format.
    pub fn translate(&self, label: &str) -> Result<Formula, CheckError> {
        let mut disjunction: Option<Formula> = None;
        for part in label.split("||") {
            let mut conjunction: Option<Formula> = None;
            for atom in part.split("&&") {
                let f = self.translate_atom(atom)?;
                conjunction = Some(match conjunction {
                    None => f,
                    Some(acc) => acc.conj(&f),
                });
            }
            let part = conjunction.unwrap_or_else(|| Formula::bool_val(true));
            disjunction = Some(match disjunction {
                None => part,
                Some(acc) => acc.disj(&part),
            });
        }
        Ok(disjunction.unwrap_or_else(|| Formula::bool_val(true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ApTable {
        let mut t = ApTable::new();
        t.declare_global_nonzero("ap1", 0, 32);
        t.declare_global_nonzero("ap2", 1, 32);
        t
    }

    #[test]
    fn atoms_translate_and_negate() {
        let t = table();
        let f = t.translate("ap1").unwrap();
        assert!(f.to_string().contains("seg1_off0_gen0"));

        let n = t.translate("!ap2").unwrap();
        assert!(n.to_string().starts_with('!'));
    }

    #[test]
    fn connectives_compose() {
        let t = table();
        let f = t.translate("ap1 && !ap2").unwrap();
        assert!(f.sane());
        let g = t.translate("ap1 || ap2 && ap1").unwrap();
        assert!(g.sane());
    }

    #[test]
    fn true_label_and_unknown_ap() {
        let t = table();
        assert_eq!(t.translate("1").unwrap(), Formula::bool_val(true));
        assert!(matches!(
            t.translate("ap9"),
            Err(CheckError::AtomicProposition(_))
        ));
    }

    #[test]
    fn automaton_bookkeeping() {
        let mut ba = BuchiAutomaton::new();
        let q0 = ba.add_state(false);
        let q1 = ba.add_state(true);
        ba.set_init(q0);
        ba.add_edge(q0, q0, Formula::bool_val(true));
        ba.add_edge(q0, q1, Formula::bool_val(true));
        ba.add_edge(q1, q1, Formula::bool_val(true));

        assert_eq!(ba.init(), q0);
        assert!(!ba.accepting(q0));
        assert!(ba.accepting(q1));
        assert_eq!(ba.edges(q0).len(), 2);
    }
}
