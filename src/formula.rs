//! Quantifier-free bit-vector formulas in reverse-Polish encoding.
//!
//! A [`Formula`] is a flat sequence of [`Item`]s; every item performs exactly
//! one action on a stack of sub-expressions and the last item is the root.
//! All combinators append to the tail, so building larger formulas out of
//! smaller ones is a pair of copies plus one push. Equality and ordering are
//! purely syntactic on the item sequence.

use std::fmt;

use crate::blob::{BlobReader, BlobRw, BlobWriter};

/// A program variable at a particular assignment generation.
///
/// `seg` is a *global* segment id (stable across segment erases), `gen` the
/// SSA-like generation counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ident {
    pub seg: u16,
    pub off: u16,
    pub gen: u16,
    pub bw: u8,
}

impl Ident {
    pub fn new(seg: u16, off: u16, gen: u16, bw: u8) -> Self {
        Ident { seg, off, gen, bw }
    }

    /// The variable irrespective of its generation.
    pub fn place(&self) -> (u16, u16) {
        (self.seg, self.off)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg{}_off{}_gen{}[{}]", self.seg, self.off, self.gen, self.bw)
    }
}

/// Binary and unary operators. Casts are a separate item kind because they
/// carry a target width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    SRem,
    URem,
    Eq,
    Ne,
    Slt,
    Ult,
    Sle,
    Ule,
    Sgt,
    Ugt,
    Sge,
    Uge,
    And,
    Or,
    Not,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    Shl,
    Shr,
    Concat,
}

impl Op {
    pub fn is_unary(self) -> bool {
        matches!(self, Op::Not | Op::BitNot)
    }

    fn symbol(self) -> &'static str {
        match self {
            Op::Add => " + ",
            Op::Sub => " - ",
            Op::Mul => " * ",
            Op::Div => " / ",
            Op::SRem | Op::URem => " % ",
            Op::Eq => " = ",
            Op::Ne => " != ",
            Op::Slt | Op::Ult => " < ",
            Op::Sle | Op::Ule => " <= ",
            Op::Sgt | Op::Ugt => " > ",
            Op::Sge | Op::Uge => " >= ",
            Op::And => " && ",
            Op::Or => " || ",
            Op::Not => "!",
            Op::BitAnd => " & ",
            Op::BitOr => " | ",
            Op::BitXor => " ^ ",
            Op::BitNot => "~",
            Op::Shl => " << ",
            Op::Shr => " >> ",
            Op::Concat => " . ",
        }
    }

    fn from_u8(raw: u8) -> Op {
        use Op::*;
        const TABLE: [Op; 26] = [
            Add, Sub, Mul, Div, SRem, URem, Eq, Ne, Slt, Ult, Sle, Ule, Sgt, Ugt, Sge, Uge, And,
            Or, Not, BitAnd, BitOr, BitXor, BitNot, Shl, Shr, Concat,
        ];
        TABLE[raw as usize]
    }
}

/// Bit-width casts; the payload is the target width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum CastOp {
    ZExt,
    SExt,
    Trunc,
}

impl CastOp {
    fn from_u8(raw: u8) -> CastOp {
        [CastOp::ZExt, CastOp::SExt, CastOp::Trunc][raw as usize]
    }
}

/// One step of the RPN stack machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Item {
    Constant { value: u64, bw: u8 },
    Bool(bool),
    Ident(Ident),
    Op(Op),
    Cast(CastOp, u8),
}

impl Item {
    /// Net effect on the expression stack.
    fn stack_delta(&self) -> i32 {
        match self {
            Item::Constant { .. } | Item::Bool(_) | Item::Ident(_) => 1,
            Item::Op(op) if op.is_unary() => 0,
            Item::Op(_) => -1,
            Item::Cast(..) => 0,
        }
    }

    fn depends_on(&self, seg: u16, off: u16, gen: u16) -> bool {
        matches!(self, Item::Ident(id) if id.seg == seg && id.off == off && id.gen == gen)
    }
}

impl BlobRw for Item {
    fn write(&self, w: &mut BlobWriter) {
        match *self {
            Item::Constant { value, bw } => {
                w.write_u8(0);
                w.write_u64(value);
                w.write_u8(bw);
            }
            Item::Bool(b) => {
                w.write_u8(1);
                w.write_bool(b);
            }
            Item::Ident(id) => {
                w.write_u8(2);
                w.write_u16(id.seg);
                w.write_u16(id.off);
                w.write_u16(id.gen);
                w.write_u8(id.bw);
            }
            Item::Op(op) => {
                w.write_u8(3);
                w.write_u8(op as u8);
            }
            Item::Cast(op, bits) => {
                w.write_u8(4);
                w.write_u8(op as u8);
                w.write_u8(bits);
            }
        }
    }

    fn read(r: &mut BlobReader) -> Self {
        match r.read_u8() {
            0 => {
                let value = r.read_u64();
                let bw = r.read_u8();
                Item::Constant { value, bw }
            }
            1 => Item::Bool(r.read_bool()),
            2 => {
                let seg = r.read_u16();
                let off = r.read_u16();
                let gen = r.read_u16();
                let bw = r.read_u8();
                Item::Ident(Ident::new(seg, off, gen, bw))
            }
            3 => Item::Op(Op::from_u8(r.read_u8())),
            _ => {
                let op = CastOp::from_u8(r.read_u8());
                Item::Cast(op, r.read_u8())
            }
        }
    }
}

/// An expression (or, when built from comparisons, a constraint) in postfix
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Formula {
    rpn: Vec<Item>,
}

impl Formula {
    pub fn constant(value: u64, bw: u8) -> Formula {
        debug_assert!(bw > 0);
        Formula {
            rpn: vec![Item::Constant { value, bw }],
        }
    }

    pub fn bool_val(value: bool) -> Formula {
        Formula {
            rpn: vec![Item::Bool(value)],
        }
    }

    pub fn ident(id: Ident) -> Formula {
        debug_assert!(id.bw > 0);
        Formula {
            rpn: vec![Item::Ident(id)],
        }
    }

    pub fn rpn(&self) -> &[Item] {
        &self.rpn
    }

    pub fn rpn_mut(&mut self) -> &mut [Item] {
        &mut self.rpn
    }

    pub fn len(&self) -> usize {
        self.rpn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rpn.is_empty()
    }

    /// A formula is sane iff running it as a stack machine leaves exactly one
    /// element. The empty formula stands for `true` and is sane by fiat.
    pub fn sane(&self) -> bool {
        if self.rpn.is_empty() {
            return true;
        }
        let mut depth = 0i32;
        for item in &self.rpn {
            if matches!(item, Item::Op(op) if !op.is_unary()) && depth < 2 {
                return false;
            }
            if matches!(item, Item::Op(_) | Item::Cast(..)) && depth < 1 {
                return false;
            }
            depth += item.stack_delta();
        }
        depth == 1
    }

    pub fn depends_on(&self, seg: u16, off: u16, gen: u16) -> bool {
        self.rpn.iter().any(|item| item.depends_on(seg, off, gen))
    }

    pub fn collect_variables(&self, out: &mut Vec<Ident>) {
        for item in &self.rpn {
            if let Item::Ident(id) = item {
                out.push(*id);
            }
        }
    }

    pub fn append(&mut self, other: &Formula) {
        self.rpn.extend_from_slice(&other.rpn);
    }

    /// Replaces every occurrence of `pattern` by splicing in `definition`.
    pub fn substitute(&self, pattern: Ident, definition: &Formula) -> Formula {
        debug_assert!(definition.sane());
        let occurrences: Vec<usize> = self
            .rpn
            .iter()
            .enumerate()
            .filter(|(_, item)| matches!(item, Item::Ident(id) if *id == pattern))
            .map(|(i, _)| i)
            .collect();

        if occurrences.is_empty() {
            return self.clone();
        }

        let mut result = Vec::with_capacity(
            self.rpn.len() + occurrences.len() * definition.rpn.len() - occurrences.len(),
        );
        let mut cursor = 0;
        for &pos in &occurrences {
            result.extend_from_slice(&self.rpn[cursor..pos]);
            result.extend_from_slice(&definition.rpn);
            cursor = pos + 1;
        }
        result.extend_from_slice(&self.rpn[cursor..]);

        let result = Formula { rpn: result };
        debug_assert!(result.sane());
        result
    }

    pub fn binary(l: &Formula, r: &Formula, op: Op) -> Formula {
        debug_assert!(!op.is_unary());
        if op == Op::And {
            if l.is_empty() {
                return r.clone();
            }
            if r.is_empty() {
                return l.clone();
            }
        }
        let mut rpn = Vec::with_capacity(l.rpn.len() + r.rpn.len() + 1);
        rpn.extend_from_slice(&l.rpn);
        rpn.extend_from_slice(&r.rpn);
        rpn.push(Item::Op(op));
        let result = Formula { rpn };
        debug_assert!(result.sane());
        result
    }

    pub fn unary(l: &Formula, op: Op) -> Formula {
        debug_assert!(op.is_unary());
        let mut rpn = Vec::with_capacity(l.rpn.len() + 1);
        rpn.extend_from_slice(&l.rpn);
        rpn.push(Item::Op(op));
        Formula { rpn }
    }

    pub fn cast(&self, op: CastOp, bits: u8) -> Formula {
        let mut rpn = Vec::with_capacity(self.rpn.len() + 1);
        rpn.extend_from_slice(&self.rpn);
        rpn.push(Item::Cast(op, bits));
        Formula { rpn }
    }

    /// Logical conjunction; the empty formula is the unit.
    pub fn conj(&self, other: &Formula) -> Formula {
        Formula::binary(self, other, Op::And)
    }

    /// Logical disjunction.
    pub fn disj(&self, other: &Formula) -> Formula {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        Formula::binary(self, other, Op::Or)
    }

    pub fn negate(&self) -> Formula {
        Formula::unary(self, Op::Not)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack: Vec<String> = Vec::new();
        for item in &self.rpn {
            match item {
                Item::Constant { value, bw } => stack.push(format!("{value}[{bw}]")),
                Item::Bool(b) => stack.push(b.to_string()),
                Item::Ident(id) => stack.push(id.to_string()),
                Item::Op(op) if op.is_unary() => {
                    let arg = stack.pop().unwrap_or_default();
                    stack.push(format!("{}{arg}", op.symbol()));
                }
                Item::Op(op) => {
                    let r = stack.pop().unwrap_or_default();
                    let l = stack.pop().unwrap_or_default();
                    stack.push(format!("({l}{}{r})", op.symbol()));
                }
                Item::Cast(op, bits) => {
                    let arg = stack.pop().unwrap_or_default();
                    let name = match op {
                        CastOp::ZExt => "ZeroExt",
                        CastOp::SExt => "SignExt",
                        CastOp::Trunc => "Trunc",
                    };
                    stack.push(format!("{name}:{bits} {arg}"));
                }
            }
        }
        if let Some(top) = stack.pop() {
            f.write_str(&top)
        } else {
            f.write_str("true")
        }
    }
}

impl BlobRw for Formula {
    fn write(&self, w: &mut BlobWriter) {
        self.rpn.write(w);
    }

    fn read(r: &mut BlobReader) -> Self {
        Formula {
            rpn: Vec::<Item>::read(r),
        }
    }
}

/// A definition `ident = body`; the logical building block of the symbolic
/// store. The derived ordering is `(ident, body.rpn)`, which keeps definition
/// sets canonical for the syntactic subsumption shortcut.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Definition {
    pub ident: Ident,
    pub body: Formula,
}

impl Definition {
    pub fn new(ident: Ident, body: Formula) -> Self {
        debug_assert!(!body.is_empty());
        Definition { ident, body }
    }

    pub fn to_formula(&self) -> Formula {
        Formula::binary(&Formula::ident(self.ident), &self.body, Op::Eq)
    }

    pub fn depends_on(&self, seg: u16, off: u16, gen: u16) -> bool {
        let own = self.ident.seg == seg && self.ident.off == off && self.ident.gen == gen;
        own || self.body.depends_on(seg, off, gen)
    }

    pub fn collect_variables(&self, out: &mut Vec<Ident>) {
        self.body.collect_variables(out);
        out.push(self.ident);
    }

    pub fn in_segment(&self, seg: u16) -> bool {
        self.ident.seg == seg
    }

    pub fn substitute(&self, pattern: Ident, definition: &Formula) -> Definition {
        Definition::new(self.ident, self.body.substitute(pattern, definition))
    }
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.ident, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    fn var(seg: u16, off: u16, gen: u16) -> Ident {
        Ident::new(seg, off, gen, 32)
    }

    /// Well-formed formula generator: random expression trees flattened to
    /// RPN.
    #[derive(Debug, Clone)]
    struct AnyFormula(Formula);

    impl Arbitrary for AnyFormula {
        fn arbitrary(g: &mut Gen) -> Self {
            fn gen_tree(g: &mut Gen, depth: usize) -> Formula {
                if depth == 0 || bool::arbitrary(g) {
                    if bool::arbitrary(g) {
                        Formula::constant(u64::arbitrary(g) % 256, 32)
                    } else {
                        Formula::ident(var(
                            u16::arbitrary(g) % 4,
                            u16::arbitrary(g) % 4,
                            u16::arbitrary(g) % 3,
                        ))
                    }
                } else {
                    let ops = [Op::Add, Op::Sub, Op::Mul, Op::BitAnd, Op::BitXor, Op::Shl];
                    let op = ops[usize::arbitrary(g) % ops.len()];
                    let l = gen_tree(g, depth - 1);
                    let r = gen_tree(g, depth - 1);
                    Formula::binary(&l, &r, op)
                }
            }
            AnyFormula(gen_tree(g, 4))
        }
    }

    #[quickcheck]
    fn generated_formulas_are_sane(f: AnyFormula) -> bool {
        f.0.sane()
    }

    #[quickcheck]
    fn substitution_preserves_sanity(f: AnyFormula, g: AnyFormula) -> bool {
        let pattern = var(0, 0, 0);
        let result = f.0.substitute(pattern, &g.0);
        result.sane()
    }

    #[quickcheck]
    fn substitution_eliminates_pattern(f: AnyFormula, g: AnyFormula) -> bool {
        let pattern = var(0, 0, 0);
        if g.0.depends_on(pattern.seg, pattern.off, pattern.gen) {
            return true;
        }
        let result = f.0.substitute(pattern, &g.0);
        !result.depends_on(pattern.seg, pattern.off, pattern.gen)
    }

    #[test]
    fn sanity_rejects_missing_operands() {
        let lone_op = Formula {
            rpn: vec![Item::Op(Op::Add)],
        };
        assert!(!lone_op.sane());

        let one_operand = Formula {
            rpn: vec![Item::Constant { value: 1, bw: 8 }, Item::Op(Op::Add)],
        };
        assert!(!one_operand.sane());
    }

    #[test]
    fn sanity_rejects_extra_operands() {
        let mut f = Formula::constant(1, 8);
        f.append(&Formula::constant(2, 8));
        assert!(!f.sane());
    }

    #[test]
    fn empty_formula_is_sane() {
        assert!(Formula::default().sane());
    }

    #[test]
    fn conj_treats_empty_as_unit() {
        let a = Formula::constant(1, 1);
        assert_eq!(Formula::default().conj(&a), a);
        assert_eq!(a.conj(&Formula::default()), a);
    }

    #[test]
    fn substitute_splices_every_occurrence() {
        let x = var(1, 0, 0);
        let fx = Formula::ident(x);
        // x + x
        let sum = Formula::binary(&fx, &fx, Op::Add);
        // substitute x := 2 * 3
        let repl = Formula::binary(&Formula::constant(2, 32), &Formula::constant(3, 32), Op::Mul);
        let result = sum.substitute(x, &repl);
        assert!(result.sane());
        assert_eq!(result.len(), 2 * repl.len() + 1);
        assert!(!result.depends_on(1, 0, 0));
    }

    #[test]
    fn definitions_order_by_ident_then_body() {
        let d1 = Definition::new(var(0, 0, 1), Formula::constant(5, 32));
        let d2 = Definition::new(var(0, 1, 0), Formula::constant(1, 32));
        let d3 = Definition::new(var(0, 1, 0), Formula::constant(2, 32));
        assert!(d1 < d2);
        assert!(d2 < d3);
    }

    #[test]
    fn display_renders_infix() {
        let x = Formula::ident(var(0, 1, 2));
        let f = Formula::binary(&x, &Formula::constant(7, 32), Op::Slt);
        assert_eq!(f.to_string(), "(seg0_off1_gen2[32] < 7[32])");
    }
}
