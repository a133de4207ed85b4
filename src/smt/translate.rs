//! Lowering RPN formulas to solver terms and reading simplified terms back.
//!
//! Identifier names encode `seg/off/gen` together with a caller-supplied
//! prefix; the prefix namespaces the two sides of a subsumption query.

use crate::error::SolverError;
use crate::formula::{CastOp, Formula, Ident, Item, Op};
use crate::smt::term::{Term, TermOp};
use crate::store::truncate;

/// Sort of a sub-term during the stack walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sort {
    Bv(u8),
    Bool,
}

pub fn var_name(prefix: char, id: Ident) -> String {
    format!("{prefix}_seg{}_off{}_gen{}", id.seg, id.off, id.gen)
}

/// Parses a name produced by [`var_name`] back into an identifier.
pub fn ident_of_name(name: &str, bw: u8) -> Result<Ident, SolverError> {
    let rest = name
        .split_once("_seg")
        .ok_or_else(|| SolverError::Unrepresentable(name.to_string()))?
        .1;
    let (seg, rest) = rest
        .split_once("_off")
        .ok_or_else(|| SolverError::Unrepresentable(name.to_string()))?;
    let (off, gen) = rest
        .split_once("_gen")
        .ok_or_else(|| SolverError::Unrepresentable(name.to_string()))?;
    let parse = |s: &str| {
        s.parse::<u16>()
            .map_err(|_| SolverError::Unrepresentable(name.to_string()))
    };
    Ok(Ident::new(parse(seg)?, parse(off)?, parse(gen)?, bw))
}

fn sort_of(term: &Term) -> Sort {
    match term {
        Term::Bv { bw, .. } | Term::Var { bw, .. } => Sort::Bv(*bw),
        Term::Bool(_) => Sort::Bool,
        Term::App { op, args } => match op {
            TermOp::BvAdd
            | TermOp::BvSub
            | TermOp::BvMul
            | TermOp::BvSDiv
            | TermOp::BvSRem
            | TermOp::BvURem
            | TermOp::BvAnd
            | TermOp::BvOr
            | TermOp::BvXor
            | TermOp::BvShl
            | TermOp::BvLShr => sort_of(&args[0]),
            TermOp::BvNot => sort_of(&args[0]),
            TermOp::Concat => match (sort_of(&args[0]), sort_of(&args[1])) {
                (Sort::Bv(a), Sort::Bv(b)) => Sort::Bv(a + b),
                _ => Sort::Bool,
            },
            TermOp::ZExt(bw) | TermOp::SExt(bw) | TermOp::Extract(bw) => Sort::Bv(*bw),
            _ => Sort::Bool,
        },
        Term::Forall { .. } | Term::Exists { .. } => Sort::Bool,
    }
}

fn binary_op(op: Op) -> TermOp {
    match op {
        Op::Add => TermOp::BvAdd,
        Op::Sub => TermOp::BvSub,
        Op::Mul => TermOp::BvMul,
        Op::Div => TermOp::BvSDiv,
        Op::SRem => TermOp::BvSRem,
        Op::URem => TermOp::BvURem,
        Op::Eq => TermOp::Eq,
        Op::Ne => TermOp::Distinct,
        Op::Slt => TermOp::BvSlt,
        Op::Ult => TermOp::BvUlt,
        Op::Sle => TermOp::BvSle,
        Op::Ule => TermOp::BvUle,
        Op::Sgt => TermOp::BvSgt,
        Op::Ugt => TermOp::BvUgt,
        Op::Sge => TermOp::BvSge,
        Op::Uge => TermOp::BvUge,
        Op::And => TermOp::And,
        Op::Or => TermOp::Or,
        Op::BitAnd => TermOp::BvAnd,
        Op::BitOr => TermOp::BvOr,
        Op::BitXor => TermOp::BvXor,
        Op::Shl => TermOp::BvShl,
        Op::Shr => TermOp::BvLShr,
        Op::Concat => TermOp::Concat,
        Op::Not | Op::BitNot => unreachable!("unary operator in binary position"),
    }
}

/// Translates a formula; the empty formula stands for `true`. Fails only on
/// width (sort) mismatches, which surface to the caller.
pub fn term_of(f: &Formula, prefix: char) -> Result<Term, SolverError> {
    let mut stack: Vec<Term> = Vec::new();
    for item in f.rpn() {
        match *item {
            Item::Constant { value, bw } => stack.push(Term::bv(truncate(value, bw), bw)),
            Item::Bool(b) => stack.push(Term::Bool(b)),
            Item::Ident(id) => stack.push(Term::var(var_name(prefix, id), id.bw)),
            Item::Op(op) if op.is_unary() => {
                let arg = stack
                    .pop()
                    .ok_or_else(|| SolverError::WidthMismatch("operand stack underflow".into()))?;
                let sort = sort_of(&arg);
                let term_op = match (op, sort) {
                    (Op::Not, Sort::Bool) => TermOp::Not,
                    (Op::BitNot, Sort::Bv(_)) => TermOp::BvNot,
                    _ => {
                        return Err(SolverError::WidthMismatch(format!(
                            "{op:?} applied to {sort:?}"
                        )))
                    }
                };
                stack.push(Term::app1(term_op, arg));
            }
            Item::Op(op) => {
                let r = stack
                    .pop()
                    .ok_or_else(|| SolverError::WidthMismatch("operand stack underflow".into()))?;
                let l = stack
                    .pop()
                    .ok_or_else(|| SolverError::WidthMismatch("operand stack underflow".into()))?;
                check_operands(op, sort_of(&l), sort_of(&r))?;
                stack.push(Term::app2(binary_op(op), l, r));
            }
            Item::Cast(op, bits) => {
                let arg = stack
                    .pop()
                    .ok_or_else(|| SolverError::WidthMismatch("operand stack underflow".into()))?;
                let Sort::Bv(bw) = sort_of(&arg) else {
                    return Err(SolverError::WidthMismatch(format!("{op:?} of a boolean")));
                };
                let term_op = match op {
                    CastOp::ZExt if bits >= bw => TermOp::ZExt(bits),
                    CastOp::SExt if bits >= bw => TermOp::SExt(bits),
                    CastOp::Trunc if bits <= bw => TermOp::Extract(bits),
                    _ => {
                        return Err(SolverError::WidthMismatch(format!(
                            "{op:?} from {bw} to {bits} bits"
                        )))
                    }
                };
                stack.push(Term::app1(term_op, arg));
            }
        }
    }
    match stack.len() {
        0 => Ok(Term::Bool(true)),
        1 => Ok(stack.pop().unwrap_or(Term::Bool(true))),
        n => Err(SolverError::WidthMismatch(format!(
            "formula leaves {n} stack entries"
        ))),
    }
}

fn check_operands(op: Op, l: Sort, r: Sort) -> Result<(), SolverError> {
    let ok = match op {
        Op::And | Op::Or => l == Sort::Bool && r == Sort::Bool,
        Op::Eq | Op::Ne => l == r,
        Op::Concat => matches!((l, r), (Sort::Bv(_), Sort::Bv(_))),
        _ => matches!((l, r), (Sort::Bv(a), Sort::Bv(b)) if a == b),
    };
    if ok {
        Ok(())
    } else {
        Err(SolverError::WidthMismatch(format!(
            "{op:?} on {l:?} and {r:?}"
        )))
    }
}

/// Conjoins translated formulas, starting from `true`.
pub fn conjoin<'a>(
    formulas: impl IntoIterator<Item = &'a Formula>,
    prefix: char,
) -> Result<Term, SolverError> {
    let mut acc = Term::Bool(true);
    for f in formulas {
        acc = acc.and(term_of(f, prefix)?);
    }
    Ok(acc)
}

/// Reads a quantifier-free term back into a formula (used by `simplify`).
pub fn formula_of_term(term: &Term) -> Result<Formula, SolverError> {
    match term {
        Term::Bv { value, bw } => Ok(Formula::constant(*value, *bw)),
        Term::Bool(b) => Ok(Formula::bool_val(*b)),
        Term::Var { name, bw } => Ok(Formula::ident(ident_of_name(name, *bw)?)),
        Term::App { op, args } => {
            let formula_op = |op: Op, args: &[Term]| -> Result<Formula, SolverError> {
                let l = formula_of_term(&args[0])?;
                let r = formula_of_term(&args[1])?;
                Ok(Formula::binary(&l, &r, op))
            };
            match op {
                TermOp::BvAdd => formula_op(Op::Add, args),
                TermOp::BvSub => formula_op(Op::Sub, args),
                TermOp::BvMul => formula_op(Op::Mul, args),
                TermOp::BvSDiv => formula_op(Op::Div, args),
                TermOp::BvSRem => formula_op(Op::SRem, args),
                TermOp::BvURem => formula_op(Op::URem, args),
                TermOp::Eq => formula_op(Op::Eq, args),
                TermOp::Distinct => formula_op(Op::Ne, args),
                TermOp::BvSlt => formula_op(Op::Slt, args),
                TermOp::BvUlt => formula_op(Op::Ult, args),
                TermOp::BvSle => formula_op(Op::Sle, args),
                TermOp::BvUle => formula_op(Op::Ule, args),
                TermOp::BvSgt => formula_op(Op::Sgt, args),
                TermOp::BvUgt => formula_op(Op::Ugt, args),
                TermOp::BvSge => formula_op(Op::Sge, args),
                TermOp::BvUge => formula_op(Op::Uge, args),
                TermOp::And => formula_op(Op::And, args),
                TermOp::Or => formula_op(Op::Or, args),
                TermOp::BvAnd => formula_op(Op::BitAnd, args),
                TermOp::BvOr => formula_op(Op::BitOr, args),
                TermOp::BvXor => formula_op(Op::BitXor, args),
                TermOp::BvShl => formula_op(Op::Shl, args),
                TermOp::BvLShr => formula_op(Op::Shr, args),
                TermOp::Concat => formula_op(Op::Concat, args),
                TermOp::Not => Ok(formula_of_term(&args[0])?.negate()),
                TermOp::BvNot => Ok(Formula::unary(&formula_of_term(&args[0])?, Op::BitNot)),
                TermOp::ZExt(bw) => Ok(formula_of_term(&args[0])?.cast(CastOp::ZExt, *bw)),
                TermOp::SExt(bw) => Ok(formula_of_term(&args[0])?.cast(CastOp::SExt, *bw)),
                TermOp::Extract(bw) => Ok(formula_of_term(&args[0])?.cast(CastOp::Trunc, *bw)),
            }
        }
        Term::Forall { .. } | Term::Exists { .. } => Err(SolverError::Unrepresentable(
            "quantified term".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        let id = Ident::new(3, 1, 7, 16);
        let name = var_name('a', id);
        assert_eq!(name, "a_seg3_off1_gen7");
        assert_eq!(ident_of_name(&name, 16).unwrap(), id);
    }

    #[test]
    fn width_mismatch_is_reported() {
        let l = Formula::constant(1, 8);
        let r = Formula::constant(1, 16);
        let f = Formula::binary(&l, &r, Op::Add);
        assert!(matches!(
            term_of(&f, 'a'),
            Err(SolverError::WidthMismatch(_))
        ));
    }

    #[test]
    fn formulas_round_trip_through_terms() {
        let x = Formula::ident(Ident::new(1, 0, 2, 8));
        let f = Formula::binary(&x, &Formula::constant(3, 8), Op::Ult)
            .conj(&Formula::binary(&x, &Formula::constant(0, 8), Op::Ne));
        let term = term_of(&f, 'a').unwrap();
        let back = formula_of_term(&term).unwrap();
        assert_eq!(back, f);
    }

    #[test]
    fn empty_formula_is_true() {
        assert_eq!(term_of(&Formula::default(), 'a').unwrap(), Term::Bool(true));
    }
}
