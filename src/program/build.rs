//! Programmatic module construction.
//!
//! The fluent builders are what the test programs (and an embedder without a
//! bitcode file) use to lay out functions block by block. Functions must be
//! declared before bodies referencing them are defined, so mutual recursion
//! and `pthread_create` targets resolve by id.

use crate::consts::PTR_BITS;
use crate::program::{
    BasicBlock, BinOp, BlockId, Callee, CastKind, FunId, Function, Global, GlobalId, Instruction,
    Intrinsic, Module, Operand, Reg, RegInfo, TypeDesc,
};
use crate::store::ICmpOp;

#[derive(Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(&mut self, name: &str, ty: TypeDesc, init: Option<Vec<u64>>) -> GlobalId {
        self.module.globals.push(Global {
            name: name.to_string(),
            ty,
            init,
        });
        (self.module.globals.len() - 1) as GlobalId
    }

    pub fn global_scalar(&mut self, name: &str, bw: u8, init: u64) -> GlobalId {
        self.global(name, TypeDesc::Scalar(bw), Some(vec![init]))
    }

    /// Reserves a function slot so bodies can call it by id.
    pub fn declare(&mut self, name: &str) -> FunId {
        self.module.functions.push(Function {
            name: name.to_string(),
            params: Vec::new(),
            regs: Vec::new(),
            blocks: Vec::new(),
        });
        (self.module.functions.len() - 1) as FunId
    }

    pub fn define(&mut self, id: FunId, body: FunctionBuilder) {
        let name = self.module.functions[id as usize].name.clone();
        self.module.functions[id as usize] = body.finish(name);
    }

    pub fn finish(self) -> Module {
        self.module
    }
}

#[derive(Debug)]
pub struct FunctionBuilder {
    params: Vec<Reg>,
    regs: Vec<RegInfo>,
    blocks: Vec<BasicBlock>,
    current: usize,
}

impl Default for FunctionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionBuilder {
    pub fn new() -> Self {
        FunctionBuilder {
            params: Vec::new(),
            regs: Vec::new(),
            blocks: vec![BasicBlock::default()],
            current: 0,
        }
    }

    pub fn reg(&mut self, bw: u8) -> Reg {
        self.regs.push(RegInfo { bw, pointer: false });
        (self.regs.len() - 1) as Reg
    }

    pub fn ptr_reg(&mut self) -> Reg {
        self.regs.push(RegInfo {
            bw: PTR_BITS,
            pointer: true,
        });
        (self.regs.len() - 1) as Reg
    }

    pub fn param(&mut self, bw: u8) -> Reg {
        let reg = self.reg(bw);
        self.params.push(reg);
        reg
    }

    /// Opens a new basic block; instructions go to the most recently
    /// selected block.
    pub fn block(&mut self) -> BlockId {
        self.blocks.push(BasicBlock::default());
        (self.blocks.len() - 1) as BlockId
    }

    pub fn select_block(&mut self, block: BlockId) {
        self.current = block as usize;
    }

    pub fn ins(&mut self, instruction: Instruction) -> &mut Self {
        self.blocks[self.current].instrs.push(instruction);
        self
    }

    pub fn binary(&mut self, op: BinOp, dst: Reg, a: Operand, b: Operand) -> &mut Self {
        self.ins(Instruction::Binary { op, dst, a, b })
    }

    pub fn icmp(&mut self, op: ICmpOp, dst: Reg, a: Operand, b: Operand) -> &mut Self {
        self.ins(Instruction::ICmp { op, dst, a, b })
    }

    pub fn cast(&mut self, kind: CastKind, dst: Reg, a: Operand, to_bw: u8) -> &mut Self {
        self.ins(Instruction::Cast {
            kind,
            dst,
            a,
            to_bw,
        })
    }

    pub fn br(&mut self, target: BlockId) -> &mut Self {
        self.ins(Instruction::Br { target })
    }

    pub fn cond_br(&mut self, cond: Operand, on_true: BlockId, on_false: BlockId) -> &mut Self {
        self.ins(Instruction::CondBr {
            cond,
            on_true,
            on_false,
        })
    }

    pub fn load(&mut self, dst: Reg, ptr: Operand) -> &mut Self {
        self.ins(Instruction::Load { dst, ptr })
    }

    pub fn store(&mut self, value: Operand, ptr: Operand) -> &mut Self {
        self.ins(Instruction::Store { value, ptr })
    }

    pub fn alloca(&mut self, dst: Reg, ty: TypeDesc) -> &mut Self {
        self.ins(Instruction::Alloca {
            dst,
            ty,
            count: Operand::imm(1, 32),
        })
    }

    pub fn call_fun(&mut self, dst: Option<Reg>, target: FunId, args: Vec<Operand>) -> &mut Self {
        self.ins(Instruction::Call {
            dst,
            callee: Callee::Fun(target),
            args,
        })
    }

    pub fn call_intrinsic(
        &mut self,
        dst: Option<Reg>,
        intrinsic: Intrinsic,
        args: Vec<Operand>,
    ) -> &mut Self {
        self.ins(Instruction::Call {
            dst,
            callee: Callee::Intrinsic(intrinsic),
            args,
        })
    }

    pub fn ret(&mut self, value: Option<Operand>) -> &mut Self {
        self.ins(Instruction::Ret { value })
    }

    fn finish(self, name: String) -> Function {
        Function {
            name,
            params: self.params,
            regs: self.regs,
            blocks: self.blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_two_block_function() {
        let mut m = ModuleBuilder::new();
        let main = m.declare("main");

        let mut f = FunctionBuilder::new();
        let x = f.reg(32);
        let exit = f.block();
        f.icmp(ICmpOp::Eq, x, Operand::imm(0, 32), Operand::imm(0, 32));
        f.br(exit);
        f.select_block(exit);
        f.ret(None);
        m.define(main, f);

        let module = m.finish();
        assert_eq!(module.find_function("main"), Some(0));
        let main = module.function(0);
        assert_eq!(main.blocks.len(), 2);
        assert_eq!(main.blocks[0].instrs.len(), 2);
        assert!(main.blocks[1].instrs[0].is_terminator());
        assert_eq!(main.reg_widths(), vec![32]);
    }
}
