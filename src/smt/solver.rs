//! The solver backend interface and a bounded-enumeration reference backend.
//!
//! A production deployment plugs a real SMT solver in behind [`Solver`]; the
//! checker only needs quantified bit-vector `check` with per-query timeouts
//! and the two simplification tactics. [`EnumSolver`] decides small-width
//! queries by exhaustive evaluation and reports `unknown` once its budget is
//! exceeded, which every caller treats soundly.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::SolverError;
use crate::smt::term::{Term, TermOp};
use crate::store::{sign_extend, truncate};

/// Tri-state solver answer; `Unknown` carries the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    Sat,
    Unsat,
    Unknown(String),
}

impl CheckResult {
    pub fn is_unsat(&self) -> bool {
        matches!(self, CheckResult::Unsat)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, CheckResult::Unknown(_))
    }
}

/// Simplification tactics of §6.2: `ctx-simplify` and `ctx-solver-simplify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tactic {
    Cheap,
    Full,
}

/// The capability set expected from the external SMT solver.
pub trait Solver {
    fn check(&mut self, query: &Term, timeout: Option<Duration>) -> CheckResult;
    fn simplify(&mut self, term: &Term, tactic: Tactic) -> Result<Term, SolverError>;
}

/// Value of a term under an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Val {
    Bv { value: u64, bw: u8 },
    Bool(bool),
}

impl Val {
    fn as_bool(self) -> bool {
        match self {
            Val::Bool(b) => b,
            Val::Bv { value, .. } => value != 0,
        }
    }

    fn bv(self) -> (u64, u8) {
        match self {
            Val::Bv { value, bw } => (value, bw),
            Val::Bool(b) => (b as u64, 1),
        }
    }
}

/// Raised when the evaluation budget runs out; surfaces as `unknown`.
struct BudgetExceeded;

/// Exhaustive-evaluation backend. Sound and complete for queries whose free
/// and bound variables span few enough bits to enumerate.
#[derive(Debug, Clone)]
pub struct EnumSolver {
    /// Upper bound on term evaluations per `check`.
    pub budget: u64,
}

impl Default for EnumSolver {
    fn default() -> Self {
        EnumSolver { budget: 1 << 22 }
    }
}

type Env = HashMap<String, u64>;

impl EnumSolver {
    fn eval(&self, term: &Term, env: &mut Env, ticks: &mut u64) -> Result<Val, BudgetExceeded> {
        if *ticks == 0 {
            return Err(BudgetExceeded);
        }
        *ticks -= 1;

        match term {
            Term::Bv { value, bw } => Ok(Val::Bv {
                value: truncate(*value, *bw),
                bw: *bw,
            }),
            Term::Bool(b) => Ok(Val::Bool(*b)),
            Term::Var { name, bw } => {
                let value = env.get(name).copied().unwrap_or(0);
                Ok(Val::Bv {
                    value: truncate(value, *bw),
                    bw: *bw,
                })
            }
            Term::App { op, args } => self.eval_app(*op, args, env, ticks),
            Term::Forall { vars, body } => {
                let refuted = self.exists_assignment(vars, 0, body, env, ticks, false)?;
                Ok(Val::Bool(!refuted))
            }
            Term::Exists { vars, body } => {
                let witnessed = self.exists_assignment(vars, 0, body, env, ticks, true)?;
                Ok(Val::Bool(witnessed))
            }
        }
    }

    /// True iff some assignment of `vars` makes the body evaluate to
    /// `target`.
    fn exists_assignment(
        &self,
        vars: &[(String, u8)],
        idx: usize,
        body: &Term,
        env: &mut Env,
        ticks: &mut u64,
        target: bool,
    ) -> Result<bool, BudgetExceeded> {
        if idx == vars.len() {
            return Ok(self.eval(body, env, ticks)?.as_bool() == target);
        }
        let (name, bw) = &vars[idx];
        let count = 1u128 << (*bw).min(64) as u32;
        for value in 0..count {
            env.insert(name.clone(), value as u64);
            if self.exists_assignment(vars, idx + 1, body, env, ticks, target)? {
                env.remove(name);
                return Ok(true);
            }
        }
        env.remove(name);
        Ok(false)
    }

    fn eval_app(
        &self,
        op: TermOp,
        args: &[Term],
        env: &mut Env,
        ticks: &mut u64,
    ) -> Result<Val, BudgetExceeded> {
        use TermOp::*;

        match op {
            Not => {
                let v = self.eval(&args[0], env, ticks)?;
                return Ok(Val::Bool(!v.as_bool()));
            }
            BvNot => {
                let (value, bw) = self.eval(&args[0], env, ticks)?.bv();
                return Ok(Val::Bv {
                    value: truncate(!value, bw),
                    bw,
                });
            }
            ZExt(to) | SExt(to) | Extract(to) => {
                let (value, bw) = self.eval(&args[0], env, ticks)?.bv();
                let value = match op {
                    SExt(_) => truncate(sign_extend(value, bw) as u64, to),
                    _ => truncate(value, to),
                };
                return Ok(Val::Bv { value, bw: to });
            }
            // Short-circuited boolean connectives.
            And => {
                if !self.eval(&args[0], env, ticks)?.as_bool() {
                    return Ok(Val::Bool(false));
                }
                return Ok(Val::Bool(self.eval(&args[1], env, ticks)?.as_bool()));
            }
            Or => {
                if self.eval(&args[0], env, ticks)?.as_bool() {
                    return Ok(Val::Bool(true));
                }
                return Ok(Val::Bool(self.eval(&args[1], env, ticks)?.as_bool()));
            }
            _ => {}
        }

        let l = self.eval(&args[0], env, ticks)?;
        let r = self.eval(&args[1], env, ticks)?;

        match op {
            Eq => return Ok(Val::Bool(l == r)),
            Distinct => return Ok(Val::Bool(l != r)),
            _ => {}
        }

        let (a, bw) = l.bv();
        let (b, rbw) = r.bv();
        let sa = sign_extend(a, bw);
        let sb = sign_extend(b, bw);
        let bv = |value: u64| Val::Bv {
            value: truncate(value, bw),
            bw,
        };

        Ok(match op {
            BvAdd => bv(a.wrapping_add(b)),
            BvSub => bv(a.wrapping_sub(b)),
            BvMul => bv(a.wrapping_mul(b)),
            // Division by zero follows the SMT-LIB bit-vector theory.
            BvSDiv => bv(if b == 0 {
                if sa >= 0 {
                    u64::MAX
                } else {
                    1
                }
            } else {
                sa.wrapping_div(sb) as u64
            }),
            BvSRem => bv(if b == 0 { a } else { sa.wrapping_rem(sb) as u64 }),
            BvURem => bv(if b == 0 { a } else { a % b }),
            BvAnd => bv(a & b),
            BvOr => bv(a | b),
            BvXor => bv(a ^ b),
            BvShl => bv(if b >= bw as u64 { 0 } else { a << b }),
            BvLShr => bv(if b >= bw as u64 { 0 } else { a >> b }),
            Concat => Val::Bv {
                value: (a << rbw.min(63)) | b,
                bw: (bw + rbw).min(64),
            },
            BvSlt => Val::Bool(sa < sb),
            BvUlt => Val::Bool(a < b),
            BvSle => Val::Bool(sa <= sb),
            BvUle => Val::Bool(a <= b),
            BvSgt => Val::Bool(sa > sb),
            BvUgt => Val::Bool(a > b),
            BvSge => Val::Bool(sa >= sb),
            BvUge => Val::Bool(a >= b),
            _ => Val::Bool(false),
        })
    }

    /// Recursive constant folding with the unit laws of the connectives.
    fn fold(&self, term: &Term, ticks: &mut u64) -> Term {
        if !term.has_quantifier() && term.free_vars().is_empty() {
            let mut env = Env::new();
            if let Ok(v) = self.eval(term, &mut env, ticks) {
                return match v {
                    Val::Bv { value, bw } => Term::bv(value, bw),
                    Val::Bool(b) => Term::Bool(b),
                };
            }
        }
        match term {
            Term::App { op, args } => {
                let args: Vec<Term> = args.iter().map(|a| self.fold(a, ticks)).collect();
                match (*op, args.as_slice()) {
                    (TermOp::And, [Term::Bool(true), x]) | (TermOp::And, [x, Term::Bool(true)]) => {
                        x.clone()
                    }
                    (TermOp::And, [Term::Bool(false), _])
                    | (TermOp::And, [_, Term::Bool(false)]) => Term::Bool(false),
                    (TermOp::Or, [Term::Bool(false), x]) | (TermOp::Or, [x, Term::Bool(false)]) => {
                        x.clone()
                    }
                    (TermOp::Or, [Term::Bool(true), _]) | (TermOp::Or, [_, Term::Bool(true)]) => {
                        Term::Bool(true)
                    }
                    (TermOp::Not, [Term::Bool(b)]) => Term::Bool(!b),
                    (TermOp::Eq, [l, r]) if l == r => Term::Bool(true),
                    (op, _) => Term::App { op, args },
                }
            }
            Term::Forall { vars, body } => Term::Forall {
                vars: vars.clone(),
                body: Box::new(self.fold(body, ticks)),
            },
            Term::Exists { vars, body } => Term::Exists {
                vars: vars.clone(),
                body: Box::new(self.fold(body, ticks)),
            },
            other => other.clone(),
        }
    }

    fn conjuncts(term: &Term, out: &mut Vec<Term>) {
        match term {
            Term::App {
                op: TermOp::And,
                args,
            } => {
                Self::conjuncts(&args[0], out);
                Self::conjuncts(&args[1], out);
            }
            Term::Bool(true) => {}
            other => {
                if !out.contains(other) {
                    out.push(other.clone());
                }
            }
        }
    }
}

impl Solver for EnumSolver {
    fn check(&mut self, query: &Term, _timeout: Option<Duration>) -> CheckResult {
        let vars = query.free_vars();
        let mut ticks = self.budget;
        let mut env = Env::new();
        match self.exists_assignment(&vars, 0, query, &mut env, &mut ticks, true) {
            Ok(true) => CheckResult::Sat,
            Ok(false) => CheckResult::Unsat,
            Err(BudgetExceeded) => CheckResult::Unknown("enumeration budget exceeded".into()),
        }
    }

    fn simplify(&mut self, term: &Term, tactic: Tactic) -> Result<Term, SolverError> {
        let mut ticks = self.budget.min(1 << 12);
        let folded = self.fold(term, &mut ticks);
        match tactic {
            Tactic::Cheap => Ok(folded),
            Tactic::Full => {
                // Flatten the conjunction and drop duplicate conjuncts; the
                // result is stable, so a second pass is a no-op.
                let mut parts = Vec::new();
                Self::conjuncts(&folded, &mut parts);
                Ok(parts
                    .into_iter()
                    .fold(Term::Bool(true), |acc, part| acc.and(part)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smt::term::TermOp::*;

    fn x8() -> Term {
        Term::var("x".into(), 8)
    }

    #[test]
    fn unconstrained_var_is_sat() {
        let mut solver = EnumSolver::default();
        let q = Term::app2(Eq, x8(), Term::bv(7, 8));
        assert_eq!(solver.check(&q, None), CheckResult::Sat);
    }

    #[test]
    fn contradiction_is_unsat() {
        let mut solver = EnumSolver::default();
        let q =
            Term::app2(Eq, x8(), Term::bv(7, 8)).and(Term::app2(Distinct, x8(), Term::bv(7, 8)));
        assert_eq!(solver.check(&q, None), CheckResult::Unsat);
    }

    #[test]
    fn signed_comparison_uses_sign_extension() {
        let mut solver = EnumSolver::default();
        // 0xFF as i8 is -1, so 0xFF <s 0 holds.
        let q = Term::app2(BvSlt, Term::bv(0xFF, 8), Term::bv(0, 8));
        assert_eq!(solver.check(&q, None), CheckResult::Sat);
    }

    #[test]
    fn forall_blocks_counterexamples() {
        let mut solver = EnumSolver::default();
        // forall x. x != 3  — refuted by x = 3.
        let q = Term::forall(
            vec![("x".into(), 8)],
            Term::app2(Distinct, x8(), Term::bv(3, 8)),
        );
        assert_eq!(solver.check(&q, None), CheckResult::Unsat);
        // forall x. x >=u 0 — holds.
        let q = Term::forall(
            vec![("x".into(), 8)],
            Term::app2(BvUge, x8(), Term::bv(0, 8)),
        );
        assert_eq!(solver.check(&q, None), CheckResult::Sat);
    }

    #[test]
    fn exists_finds_witnesses() {
        let mut solver = EnumSolver::default();
        // exists x. x * 2 = 6
        let q = Term::exists(
            vec![("x".into(), 8)],
            Term::app2(Eq, Term::app2(BvMul, x8(), Term::bv(2, 8)), Term::bv(6, 8)),
        );
        assert_eq!(solver.check(&q, None), CheckResult::Sat);
    }

    #[test]
    fn budget_overrun_is_unknown() {
        let mut solver = EnumSolver { budget: 16 };
        let q = Term::app2(
            Eq,
            Term::var("wide".into(), 64),
            Term::var("other".into(), 64),
        );
        assert!(solver.check(&q, None).is_unknown());
    }

    #[test]
    fn simplify_is_idempotent() {
        let mut solver = EnumSolver::default();
        let part = Term::app2(BvUlt, x8(), Term::bv(9, 8));
        let q = part.clone().and(Term::Bool(true)).and(part.clone());
        let once = solver.simplify(&q, Tactic::Full).unwrap();
        let twice = solver.simplify(&once, Tactic::Full).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, part);
    }

    #[test]
    fn simplify_folds_constants() {
        let mut solver = EnumSolver::default();
        let q = Term::app2(BvAdd, Term::bv(200, 8), Term::bv(100, 8));
        let s = solver.simplify(&q, Tactic::Cheap).unwrap();
        assert_eq!(s, Term::bv(44, 8));
    }
}
