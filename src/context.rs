//! The process-wide checking context.
//!
//! One [`Context`] is built at start and shared (via [`CtxRef`]) by the
//! stores, the database and the drivers. It owns the solver backend, the
//! subsumption cache and the statistics counters; the host process is
//! single-threaded cooperative, so interior mutability is plain `RefCell`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::{Settings, SimplifyLevel};
use crate::formula::Formula;
use crate::smt::cache::{QueryCache, SubsetQuery};
use crate::smt::solver::{CheckResult, EnumSolver, Solver, Tactic};
use crate::smt::term::Term;
use crate::smt::translate::{formula_of_term, term_of};
use crate::stats::{self, Stats};

pub type CtxRef = Rc<Context>;

pub struct Context {
    solver: RefCell<Box<dyn Solver>>,
    cache: RefCell<QueryCache<SubsetQuery, CheckResult>>,
    stats: RefCell<Stats>,
    /// Queries answered `unknown` so far; drives the timeout schedule.
    unknowns: Cell<u32>,
    pub settings: Settings,
}

impl Context {
    pub fn new(solver: Box<dyn Solver>, settings: Settings) -> CtxRef {
        Rc::new(Context {
            solver: RefCell::new(solver),
            cache: RefCell::new(QueryCache::default()),
            stats: RefCell::new(Stats::default()),
            unknowns: Cell::new(0),
            settings,
        })
    }

    pub fn with_defaults() -> CtxRef {
        Context::new(Box::<EnumSolver>::default(), Settings::default())
    }

    pub fn bump(&self, counter: &'static str) {
        self.stats.borrow_mut().bump(counter);
    }

    pub fn stat(&self, counter: &str) -> u64 {
        self.stats.borrow().get(counter)
    }

    /// Statistics dump: run counters followed by the cache summary.
    pub fn dump_stats(&self) -> String {
        format!("{}\n\n{}", self.stats.borrow(), self.cache.borrow())
    }

    /// Dynamic per-query timeout: starts at 1 ms and doubles with every
    /// fifth `unknown`, keeping progress under adversarial instances.
    pub fn query_timeout(&self) -> Option<Duration> {
        if !self.settings.timeout {
            return None;
        }
        let shift = (self.unknowns.get() / 5).min(16);
        Some(Duration::from_millis(1u64 << shift))
    }

    pub fn note_unknown(&self, reason: &str) {
        self.unknowns.set(self.unknowns.get() + 1);
        self.bump(stats::SOLVER_UNKNOWN);
        warn!(reason, "solver returned unknown");
    }

    /// Checks a query, first trying to discharge it by cheap simplification
    /// (a literal `true`/`false` needs no solver push).
    pub fn check(&self, query: &Term, quantified: bool) -> CheckResult {
        let mut solver = self.solver.borrow_mut();
        match solver.simplify(query, Tactic::Cheap) {
            Ok(Term::Bool(true)) => {
                self.bump(if quantified {
                    stats::Q_SIMP
                } else {
                    stats::QF_SIMP
                });
                return CheckResult::Sat;
            }
            Ok(Term::Bool(false)) => {
                self.bump(if quantified {
                    stats::Q_SIMP
                } else {
                    stats::QF_SIMP
                });
                return CheckResult::Unsat;
            }
            _ => {}
        }
        self.bump(if quantified {
            stats::Q_SOLVER
        } else {
            stats::QF_SOLVER
        });
        solver.check(query, self.query_timeout())
    }

    /// Checks and feeds the answer through the query cache.
    pub fn check_cached(&self, fingerprint: Option<SubsetQuery>, query: &Term) -> CheckResult {
        let fingerprint = fingerprint.filter(|_| self.settings.caching);
        if let Some(fp) = &fingerprint {
            if let Some(result) = self.cache.borrow_mut().lookup(fp) {
                self.bump(stats::SMT_CACHED);
                return result;
            }
        }

        let started = Instant::now();
        let result = self.check(query, true);
        let elapsed = started.elapsed().as_micros() as u64;

        if let Some(fp) = fingerprint {
            self.cache.borrow_mut().place(fp, result.clone(), elapsed);
        }
        result
    }

    /// Collapses a path condition into one formula. Solver failures are
    /// masked: the caller keeps the unsimplified formula.
    pub fn simplify_formula(&self, f: &Formula, level: SimplifyLevel) -> Formula {
        self.bump(stats::SIMPLIFY_CALLS);
        let tactic = match level {
            SimplifyLevel::Off => return f.clone(),
            SimplifyLevel::Cheap => Tactic::Cheap,
            SimplifyLevel::Full => Tactic::Full,
        };
        if f.is_empty() {
            return f.clone();
        }

        let term = match term_of(f, 'a') {
            Ok(term) => term,
            Err(err) => {
                warn!(%err, "cannot translate formula, keeping it unsimplified");
                return f.clone();
            }
        };
        let simplified = match self.solver.borrow_mut().simplify(&term, tactic) {
            Ok(Term::Bool(true)) => return Formula::default(),
            Ok(simplified) => simplified,
            Err(err) => {
                debug!(%err, "simplify failed, continuing with the original formula");
                return f.clone();
            }
        };
        match formula_of_term(&simplified) {
            Ok(formula) => formula,
            Err(err) => {
                debug!(%err, "simplified term not representable, keeping the original");
                f.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{Ident, Op};

    #[test]
    fn timeout_doubles_every_fifth_unknown() {
        let ctx = Context::with_defaults();
        assert_eq!(ctx.query_timeout(), Some(Duration::from_millis(1)));
        for _ in 0..5 {
            ctx.note_unknown("test");
        }
        assert_eq!(ctx.query_timeout(), Some(Duration::from_millis(2)));
        for _ in 0..5 {
            ctx.note_unknown("test");
        }
        assert_eq!(ctx.query_timeout(), Some(Duration::from_millis(4)));
    }

    #[test]
    fn timeout_disabled_by_settings() {
        let mut settings = Settings::default();
        settings.timeout = false;
        let ctx = Context::new(Box::<EnumSolver>::default(), settings);
        assert_eq!(ctx.query_timeout(), None);
    }

    #[test]
    fn simplify_drops_duplicate_conjuncts() {
        let ctx = Context::with_defaults();
        let x = Formula::ident(Ident::new(0, 0, 0, 8));
        let clause = Formula::binary(&x, &Formula::constant(4, 8), Op::Ult);
        let pc = clause.conj(&clause);
        let simplified = ctx.simplify_formula(&pc, SimplifyLevel::Full);
        assert_eq!(simplified, clause);
        // Idempotence: a second pass changes nothing.
        assert_eq!(ctx.simplify_formula(&simplified, SimplifyLevel::Full), simplified);
    }

    #[test]
    fn tautology_simplifies_to_empty() {
        let ctx = Context::with_defaults();
        let t = Formula::bool_val(true).conj(&Formula::bool_val(true));
        assert!(ctx.simplify_formula(&t, SimplifyLevel::Cheap).is_empty());
    }
}
