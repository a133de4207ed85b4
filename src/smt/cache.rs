//! Memoisation of solver queries by syntactic fingerprint.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use crate::formula::{Formula, Ident};

/// Fingerprint of one subsumption call: the two path conditions (definitions
/// folded in as `ident = body` formulas) plus the compared identifier pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SubsetQuery {
    pub pc_a: Vec<Formula>,
    pub pc_b: Vec<Formula>,
    pub distinct: Vec<(Ident, Ident)>,
}

/// Per-entry bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryInfo {
    pub time_us: u64,
    pub accessed: u64,
}

/// Plain hashmap cache; eviction is not required at this scale.
#[derive(Debug)]
pub struct QueryCache<Q, R> {
    entries: HashMap<Q, (R, QueryInfo)>,
    hits: u64,
    misses: u64,
    replacements: u64,
}

impl<Q, R> Default for QueryCache<Q, R> {
    fn default() -> Self {
        QueryCache {
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
            replacements: 0,
        }
    }
}

impl<Q: Eq + Hash, R: Clone> QueryCache<Q, R> {
    pub fn lookup(&mut self, query: &Q) -> Option<R> {
        match self.entries.get_mut(query) {
            Some((result, info)) => {
                info.accessed += 1;
                self.hits += 1;
                Some(result.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn place(&mut self, query: Q, result: R, time_us: u64) {
        if self.entries.contains_key(&query) {
            self.replacements += 1;
        }
        self.entries.insert(
            query,
            (
                result,
                QueryInfo {
                    time_us,
                    accessed: 0,
                },
            ),
        );
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn replacements(&self) -> u64 {
        self.replacements
    }

    /// Total solver time not spent thanks to cache hits.
    pub fn time_saved_us(&self) -> u64 {
        self.entries
            .values()
            .map(|(_, info)| info.time_us * info.accessed)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<Q: Eq + Hash, R: Clone> fmt::Display for QueryCache<Q, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Query cache statistics")?;
        writeln!(f, "----------------------")?;
        writeln!(f, "Hit count: {}", self.hits)?;
        writeln!(f, "Miss count: {}", self.misses)?;
        writeln!(f, "Replace count: {}", self.replacements)?;
        write!(f, "Time saved: {} us", self.time_saved_us())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smt::solver::CheckResult;

    #[test]
    fn hit_after_place() {
        let mut cache: QueryCache<SubsetQuery, CheckResult> = QueryCache::default();
        let q = SubsetQuery {
            pc_a: vec![Formula::constant(1, 1)],
            ..Default::default()
        };
        assert_eq!(cache.lookup(&q), None);
        cache.place(q.clone(), CheckResult::Unsat, 40);
        assert_eq!(cache.lookup(&q), Some(CheckResult::Unsat));
        assert_eq!(cache.lookup(&q), Some(CheckResult::Unsat));
        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.time_saved_us(), 80);
    }

    #[test]
    fn replacing_an_entry_is_counted() {
        let mut cache: QueryCache<SubsetQuery, CheckResult> = QueryCache::default();
        let q = SubsetQuery::default();
        cache.place(q.clone(), CheckResult::Sat, 1);
        cache.place(q, CheckResult::Unsat, 2);
        assert_eq!(cache.replacements(), 1);
        assert_eq!(cache.len(), 1);
    }
}
