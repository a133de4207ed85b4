//! Solver-side expression AST.

/// Operators of the solver AST. Cast operators carry their target width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermOp {
    BvAdd,
    BvSub,
    BvMul,
    BvSDiv,
    BvSRem,
    BvURem,
    Eq,
    Distinct,
    BvSlt,
    BvUlt,
    BvSle,
    BvUle,
    BvSgt,
    BvUgt,
    BvSge,
    BvUge,
    And,
    Or,
    Not,
    BvAnd,
    BvOr,
    BvXor,
    BvNot,
    BvShl,
    BvLShr,
    Concat,
    ZExt(u8),
    SExt(u8),
    Extract(u8),
}

/// A bit-vector / boolean term, possibly quantified.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Bv { value: u64, bw: u8 },
    Bool(bool),
    Var { name: String, bw: u8 },
    App { op: TermOp, args: Vec<Term> },
    Forall { vars: Vec<(String, u8)>, body: Box<Term> },
    Exists { vars: Vec<(String, u8)>, body: Box<Term> },
}

impl Term {
    pub fn bv(value: u64, bw: u8) -> Term {
        Term::Bv { value, bw }
    }

    pub fn var(name: String, bw: u8) -> Term {
        Term::Var { name, bw }
    }

    pub fn app2(op: TermOp, l: Term, r: Term) -> Term {
        Term::App {
            op,
            args: vec![l, r],
        }
    }

    pub fn app1(op: TermOp, arg: Term) -> Term {
        Term::App {
            op,
            args: vec![arg],
        }
    }

    /// `self && other`, folding the `true` unit away.
    pub fn and(self, other: Term) -> Term {
        match (self, other) {
            (Term::Bool(true), r) => r,
            (l, Term::Bool(true)) => l,
            (l, r) => Term::app2(TermOp::And, l, r),
        }
    }

    /// `self || other`, folding the `false` unit away.
    pub fn or(self, other: Term) -> Term {
        match (self, other) {
            (Term::Bool(false), r) => r,
            (l, Term::Bool(false)) => l,
            (l, r) => Term::app2(TermOp::Or, l, r),
        }
    }

    pub fn negate(self) -> Term {
        Term::app1(TermOp::Not, self)
    }

    pub fn forall(vars: Vec<(String, u8)>, body: Term) -> Term {
        if vars.is_empty() {
            return body;
        }
        Term::Forall {
            vars,
            body: Box::new(body),
        }
    }

    pub fn exists(vars: Vec<(String, u8)>, body: Term) -> Term {
        if vars.is_empty() {
            return body;
        }
        Term::Exists {
            vars,
            body: Box::new(body),
        }
    }

    /// Free variables with their widths, first occurrence order.
    pub fn free_vars(&self) -> Vec<(String, u8)> {
        fn walk(t: &Term, bound: &mut Vec<String>, out: &mut Vec<(String, u8)>) {
            match t {
                Term::Bv { .. } | Term::Bool(_) => {}
                Term::Var { name, bw } => {
                    if !bound.iter().any(|b| b == name) && !out.iter().any(|(n, _)| n == name) {
                        out.push((name.clone(), *bw));
                    }
                }
                Term::App { args, .. } => {
                    for arg in args {
                        walk(arg, bound, out);
                    }
                }
                Term::Forall { vars, body } | Term::Exists { vars, body } => {
                    let depth = bound.len();
                    bound.extend(vars.iter().map(|(n, _)| n.clone()));
                    walk(body, bound, out);
                    bound.truncate(depth);
                }
            }
        }
        let mut out = Vec::new();
        walk(self, &mut Vec::new(), &mut out);
        out
    }

    pub fn has_quantifier(&self) -> bool {
        match self {
            Term::Bv { .. } | Term::Bool(_) | Term::Var { .. } => false,
            Term::App { args, .. } => args.iter().any(Term::has_quantifier),
            Term::Forall { .. } | Term::Exists { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_vars_skip_bound_occurrences() {
        let body = Term::app2(
            TermOp::Eq,
            Term::var("x".into(), 8),
            Term::var("y".into(), 8),
        );
        let quantified = Term::forall(vec![("x".into(), 8)], body);
        assert_eq!(quantified.free_vars(), vec![("y".to_string(), 8)]);
    }

    #[test]
    fn and_folds_true_unit() {
        let v = Term::var("x".into(), 1);
        assert_eq!(Term::Bool(true).and(v.clone()), v);
    }
}
