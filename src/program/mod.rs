//! In-memory model of an LLVM-like module.
//!
//! This is the interface the external bitcode loader targets: functions are
//! lowered to basic blocks of instructions whose operands refer to
//! pre-indexed registers, so the evaluator never re-analyses value maps at
//! run time. Test programs are assembled with [`build::ModuleBuilder`].

pub mod build;

pub use build::{FunctionBuilder, ModuleBuilder};

use crate::consts::PTR_BITS;
use crate::control::Pc;
use crate::store::ICmpOp;

pub type FunId = u16;
pub type BlockId = u16;
pub type Reg = u16;
pub type GlobalId = u16;

/// Shape of an allocated object, for `alloca` and `getelementptr` walks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDesc {
    Scalar(u8),
    Array(Box<TypeDesc>, u32),
    Struct(Vec<TypeDesc>),
}

impl TypeDesc {
    /// Bit widths of the flattened cells, in memory order.
    pub fn cell_widths(&self, out: &mut Vec<u8>) {
        match self {
            TypeDesc::Scalar(bw) => out.push(*bw),
            TypeDesc::Array(elem, count) => {
                for _ in 0..*count {
                    elem.cell_widths(out);
                }
            }
            TypeDesc::Struct(fields) => {
                for field in fields {
                    field.cell_widths(out);
                }
            }
        }
    }

    /// Number of cells the type occupies.
    pub fn cell_count(&self) -> usize {
        match self {
            TypeDesc::Scalar(_) => 1,
            TypeDesc::Array(elem, count) => elem.cell_count() * *count as usize,
            TypeDesc::Struct(fields) => fields.iter().map(TypeDesc::cell_count).sum(),
        }
    }
}

/// Instruction operand. Register indexes are stack-frame offsets assigned at
/// module build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg),
    Const { value: u64, bw: u8 },
    Global(GlobalId),
    Fun(FunId),
    Null,
}

impl Operand {
    pub fn imm(value: u64, bw: u8) -> Operand {
        Operand::Const { value, bw }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    ZExt,
    SExt,
    Trunc,
}

/// Functions without a body that the evaluator models directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    /// `__VERIFIER_nondet_*`: fresh unconstrained input of the given width.
    Input { bw: u8 },
    Assume,
    Assert,
    ThreadCreate,
    ThreadJoin,
    ThreadExit,
    MutexLock,
    MutexUnlock,
    Exit,
    AtomicBegin,
    AtomicEnd,
    /// Modelled as a no-op (I/O, mutex init/destroy, lifetime markers).
    Nop,
}

/// Resolves an external function name to its model, mirroring the SV-COMP
/// and pthread vocabulary.
pub fn intrinsic_of_name(name: &str) -> Option<Intrinsic> {
    const IGNORED: &[&str] = &[
        "printf",
        "puts",
        "fprintf",
        "pthread_mutex_init",
        "pthread_mutex_destroy",
        "llvm.lifetime.start",
        "llvm.lifetime.end",
        "llvm.stacksave",
        "llvm.stackrestore",
    ];
    if IGNORED.contains(&name) {
        return Some(Intrinsic::Nop);
    }
    if let Some(suffix) = name.strip_prefix("__VERIFIER_nondet_") {
        let bw = match suffix {
            "bool" => 1,
            "char" | "uchar" => 8,
            "short" | "ushort" => 16,
            "int" | "uint" => 32,
            "long" | "ulong" | "pointer" => 64,
            _ => 32,
        };
        return Some(Intrinsic::Input { bw });
    }
    match name {
        "__VERIFIER_assume" | "assume" => Some(Intrinsic::Assume),
        "__VERIFIER_assert" | "assert" => Some(Intrinsic::Assert),
        "__VERIFIER_atomic_begin" => Some(Intrinsic::AtomicBegin),
        "__VERIFIER_atomic_end" => Some(Intrinsic::AtomicEnd),
        "pthread_create" => Some(Intrinsic::ThreadCreate),
        "pthread_join" => Some(Intrinsic::ThreadJoin),
        "pthread_exit" => Some(Intrinsic::ThreadExit),
        "pthread_mutex_lock" => Some(Intrinsic::MutexLock),
        "pthread_mutex_unlock" => Some(Intrinsic::MutexUnlock),
        "exit" => Some(Intrinsic::Exit),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
    Fun(FunId),
    Intrinsic(Intrinsic),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Binary {
        op: BinOp,
        dst: Reg,
        a: Operand,
        b: Operand,
    },
    ICmp {
        op: ICmpOp,
        dst: Reg,
        a: Operand,
        b: Operand,
    },
    Cast {
        kind: CastKind,
        dst: Reg,
        a: Operand,
        to_bw: u8,
    },
    Select {
        dst: Reg,
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
    },
    Phi {
        dst: Reg,
        incoming: Vec<(BlockId, Operand)>,
    },
    Br {
        target: BlockId,
    },
    CondBr {
        cond: Operand,
        on_true: BlockId,
        on_false: BlockId,
    },
    Switch {
        cond: Operand,
        default: BlockId,
        cases: Vec<(u64, BlockId)>,
    },
    Load {
        dst: Reg,
        ptr: Operand,
    },
    Store {
        value: Operand,
        ptr: Operand,
    },
    Alloca {
        dst: Reg,
        ty: TypeDesc,
        count: Operand,
    },
    Gep {
        dst: Reg,
        base: Operand,
        ty: TypeDesc,
        indices: Vec<Operand>,
    },
    Call {
        dst: Option<Reg>,
        callee: Callee,
        args: Vec<Operand>,
    },
    Ret {
        value: Option<Operand>,
    },
}

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Br { .. }
                | Instruction::CondBr { .. }
                | Instruction::Switch { .. }
                | Instruction::Ret { .. }
        )
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Instruction::Call { .. })
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Instruction::Phi { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegInfo {
    pub bw: u8,
    pub pointer: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub instrs: Vec<Instruction>,
}

impl BasicBlock {
    pub fn starts_with_phi(&self) -> bool {
        self.instrs.first().is_some_and(Instruction::is_phi)
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    /// Registers receiving the call arguments, in order.
    pub params: Vec<Reg>,
    pub regs: Vec<RegInfo>,
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    pub fn reg_widths(&self) -> Vec<u8> {
        self.regs.iter().map(|r| r.bw).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Global {
    pub name: String,
    pub ty: TypeDesc,
    /// Cell initialisers; `None` leaves the global unconstrained.
    pub init: Option<Vec<u64>>,
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
}

impl Module {
    pub fn find_function(&self, name: &str) -> Option<FunId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| i as FunId)
    }

    pub fn function(&self, id: FunId) -> &Function {
        &self.functions[id as usize]
    }

    pub fn instr(&self, pc: Pc) -> &Instruction {
        &self.functions[pc.function as usize].blocks[pc.block as usize].instrs[pc.instr as usize]
    }

    pub fn block(&self, function: FunId, block: BlockId) -> &BasicBlock {
        &self.functions[function as usize].blocks[block as usize]
    }

    /// Cell widths of the globals data segment, flattened in declaration
    /// order.
    pub fn global_cell_widths(&self) -> Vec<u8> {
        let mut widths = Vec::new();
        for g in &self.globals {
            g.ty.cell_widths(&mut widths);
        }
        widths
    }

    /// Widths of the global pointer segment: one pointer cell per global.
    pub fn global_ptr_widths(&self) -> Vec<u8> {
        vec![PTR_BITS; self.globals.len()]
    }

    /// Cell offset of a global within the data segment.
    pub fn global_offset(&self, id: GlobalId) -> usize {
        self.globals[..id as usize]
            .iter()
            .map(|g| g.ty.cell_count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_desc_flattening() {
        let ty = TypeDesc::Struct(vec![
            TypeDesc::Scalar(32),
            TypeDesc::Array(Box::new(TypeDesc::Scalar(8)), 3),
        ]);
        let mut widths = Vec::new();
        ty.cell_widths(&mut widths);
        assert_eq!(widths, vec![32, 8, 8, 8]);
        assert_eq!(ty.cell_count(), 4);
    }

    #[test]
    fn extern_names_resolve() {
        assert_eq!(
            intrinsic_of_name("__VERIFIER_nondet_char"),
            Some(Intrinsic::Input { bw: 8 })
        );
        assert_eq!(intrinsic_of_name("pthread_mutex_lock"), Some(Intrinsic::MutexLock));
        assert_eq!(intrinsic_of_name("printf"), Some(Intrinsic::Nop));
        assert_eq!(intrinsic_of_name("fopen"), None);
    }

    #[test]
    fn global_offsets_accumulate() {
        let mut m = Module::default();
        m.globals.push(Global {
            name: "a".into(),
            ty: TypeDesc::Array(Box::new(TypeDesc::Scalar(32)), 2),
            init: None,
        });
        m.globals.push(Global {
            name: "b".into(),
            ty: TypeDesc::Scalar(8),
            init: None,
        });
        assert_eq!(m.global_offset(0), 0);
        assert_eq!(m.global_offset(1), 2);
        assert_eq!(m.global_cell_widths(), vec![32, 32, 8]);
    }
}
