//! Per-opcode step handlers.
//!
//! Every handler starts from an immutable snapshot and clones it once per
//! branch, so a forked successor never aliases its sibling. The returned
//! flag marks observable boundaries: accesses visible to another thread,
//! thread lifecycle events, backward branches and assertion failures.

use crate::control::Pc;
use crate::error::CheckError;
use crate::eval::{Evaluator, State};
use crate::program::{
    BinOp, BlockId, Callee, CastKind, FunId, Instruction, Intrinsic, Operand, Reg, TypeDesc,
};
use crate::stats;
use crate::store::{sign_extend, DataStore, ICmpOp, Pointer, SymStore, Value};

type Branches<S> = Vec<(State<S>, bool)>;

fn store_of<'a, S: SymStore>(st: &'a mut State<S>, multival: bool) -> &'a mut dyn DataStore {
    if multival {
        &mut st.data
    } else {
        &mut st.explicit
    }
}

impl<S: SymStore> Evaluator<S> {
    /// Executes the instruction under `tid`'s program counter, yielding every
    /// non-empty branch.
    pub(crate) fn step(
        &self,
        st: State<S>,
        tid: usize,
    ) -> Result<Branches<S>, CheckError> {
        self.ctx.bump(stats::INSTR_EXECUTED);
        let pc = st.control.pc(tid);
        let inst = self.program.instr(pc).clone();

        let mut st = st;
        if !inst.is_phi() {
            st.control.clear_previous_block(tid);
        }
        let advance_after = !inst.is_terminator() && !inst.is_call();

        let mut branches = match inst {
            Instruction::Binary { op, dst, a, b } => self.step_binary(&st, tid, op, dst, a, b)?,
            Instruction::ICmp { op, dst, a, b } => self.step_icmp(&st, tid, op, dst, a, b)?,
            Instruction::Cast { kind, dst, a, to_bw } => {
                self.step_cast(&st, tid, kind, dst, a, to_bw)?
            }
            Instruction::Select {
                dst,
                cond,
                on_true,
                on_false,
            } => self.step_select(&st, tid, dst, cond, on_true, on_false)?,
            Instruction::Phi { dst, incoming } => self.step_phi(&st, tid, dst, &incoming)?,
            Instruction::Br { target } => self.step_br(&st, tid, pc, target)?,
            Instruction::CondBr {
                cond,
                on_true,
                on_false,
            } => self.step_cond_br(&st, tid, pc, cond, on_true, on_false)?,
            Instruction::Switch {
                cond,
                default,
                cases,
            } => self.step_switch(&st, tid, pc, cond, default, &cases)?,
            Instruction::Load { dst, ptr } => self.step_load(&st, tid, dst, ptr)?,
            Instruction::Store { value, ptr } => self.step_store(&st, tid, value, ptr)?,
            Instruction::Alloca { dst, ty, count } => {
                self.step_alloca(&st, tid, dst, &ty, count)?
            }
            Instruction::Gep {
                dst,
                base,
                ty,
                indices,
            } => self.step_gep(&st, tid, dst, base, &ty, &indices)?,
            Instruction::Call { dst, callee, args } => {
                self.step_call(&st, tid, dst, &callee, &args)?
            }
            Instruction::Ret { value } => self.step_ret(&st, tid, value)?,
        };

        if advance_after {
            for (s, _) in &mut branches {
                s.control.advance(tid, 1);
            }
        }
        Ok(branches)
    }

    fn jump_to(&self, st: &mut State<S>, target: BlockId, tid: usize) {
        let function = st.control.pc(tid).function;
        let pc = Pc {
            function,
            block: target,
            instr: 0,
        };
        let has_phi = self.program.block(function, target).starts_with_phi();
        st.control.jump_to(pc, tid, has_phi);
    }

    fn copy_value(st: &mut State<S>, dst: Value, src: Value) {
        let multival = st.layout.is_multival(src);
        if let Some(id) = dst.as_var() {
            st.layout.set_multival(id, multival);
        }
        store_of(st, multival).implement_store(dst, src);
    }

    fn step_binary(
        &self,
        st: &State<S>,
        tid: usize,
        op: BinOp,
        dst: Reg,
        a: Operand,
        b: Operand,
    ) -> Result<Branches<S>, CheckError> {
        let a_v = self.deref(st, a, tid, true, false)?;
        let b_v = self.deref(st, b, tid, true, false)?;
        let dst_v = self.deref(st, Operand::Reg(dst), tid, false, false)?;

        let mut s = st.clone();
        let multival = s.layout.is_multival(a_v) || s.layout.is_multival(b_v);
        if let Some(id) = dst_v.as_var() {
            s.layout.set_multival(id, multival);
        }
        let store = store_of(&mut s, multival);
        match op {
            BinOp::Add => store.implement_add(dst_v, a_v, b_v),
            BinOp::Sub => store.implement_sub(dst_v, a_v, b_v),
            BinOp::Mul => store.implement_mult(dst_v, a_v, b_v),
            BinOp::UDiv | BinOp::SDiv => store.implement_div(dst_v, a_v, b_v),
            BinOp::URem => store.implement_urem(dst_v, a_v, b_v),
            BinOp::SRem => store.implement_srem(dst_v, a_v, b_v),
            BinOp::And => store.implement_and(dst_v, a_v, b_v),
            BinOp::Or => store.implement_or(dst_v, a_v, b_v),
            BinOp::Xor => store.implement_xor(dst_v, a_v, b_v),
            BinOp::Shl => store.implement_left_shift(dst_v, a_v, b_v),
            BinOp::LShr => store.implement_right_shift(dst_v, a_v, b_v),
        }
        Ok(vec![(s, false)])
    }

    /// Forks on the predicate: one side assumes it and writes 1, the other
    /// assumes its negation and writes 0.
    fn step_icmp(
        &self,
        st: &State<S>,
        tid: usize,
        op: ICmpOp,
        dst: Reg,
        a: Operand,
        b: Operand,
    ) -> Result<Branches<S>, CheckError> {
        let a_v = self.deref(st, a, tid, true, false)?;
        let b_v = self.deref(st, b, tid, true, false)?;
        let dst_v = self.deref(st, Operand::Reg(dst), tid, false, false)?;
        let multival = st.layout.is_multival(a_v) || st.layout.is_multival(b_v);

        let mut branches = Vec::new();
        for (branch_op, bit) in [(op, 1u64), (op.negate(), 0)] {
            let mut s = st.clone();
            {
                let store = store_of(&mut s, multival);
                store.prune(a_v, b_v, branch_op);
                if store.empty() {
                    continue;
                }
            }
            if let Some(id) = dst_v.as_var() {
                s.layout.set_multival(id, false);
            }
            s.explicit.implement_store(dst_v, Value::constant(bit, 1));
            branches.push((s, false));
        }
        Ok(branches)
    }

    fn step_cast(
        &self,
        st: &State<S>,
        tid: usize,
        kind: CastKind,
        dst: Reg,
        a: Operand,
        to_bw: u8,
    ) -> Result<Branches<S>, CheckError> {
        let a_v = self.deref(st, a, tid, true, false)?;
        let dst_v = self.deref(st, Operand::Reg(dst), tid, false, false)?;

        let mut s = st.clone();
        let multival = s.layout.is_multival(a_v);
        if let Some(id) = dst_v.as_var() {
            s.layout.set_multival(id, multival);
        }
        let store = store_of(&mut s, multival);
        match kind {
            CastKind::ZExt => store.implement_zext(dst_v, a_v, to_bw),
            CastKind::SExt => store.implement_sext(dst_v, a_v, to_bw),
            CastKind::Trunc => store.implement_trunc(dst_v, a_v, to_bw),
        }
        Ok(vec![(s, false)])
    }

    fn step_select(
        &self,
        st: &State<S>,
        tid: usize,
        dst: Reg,
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
    ) -> Result<Branches<S>, CheckError> {
        let cond_v = self.deref(st, cond, tid, true, false)?;
        let Some(cond_val) = cond_v.as_const() else {
            return Err(CheckError::SymbolicSelect);
        };
        let chosen = if cond_val != 0 { on_true } else { on_false };
        let chosen_v = self.deref(st, chosen, tid, true, false)?;
        let dst_v = self.deref(st, Operand::Reg(dst), tid, false, false)?;

        let mut s = st.clone();
        Self::copy_value(&mut s, dst_v, chosen_v);
        Ok(vec![(s, false)])
    }

    fn step_phi(
        &self,
        st: &State<S>,
        tid: usize,
        dst: Reg,
        incoming: &[(BlockId, Operand)],
    ) -> Result<Branches<S>, CheckError> {
        let prev = st.control.previous_block(tid);
        let (_, operand) = incoming
            .iter()
            .find(|(block, _)| *block == prev.block)
            .ok_or_else(|| {
                CheckError::MalformedProgram(format!("phi has no edge from block {}", prev.block))
            })?;
        let incoming_v = self.deref(st, *operand, tid, true, false)?;
        let dst_v = self.deref(st, Operand::Reg(dst), tid, false, false)?;

        let mut s = st.clone();
        Self::copy_value(&mut s, dst_v, incoming_v);
        Ok(vec![(s, false)])
    }

    fn step_br(
        &self,
        st: &State<S>,
        tid: usize,
        pc: Pc,
        target: BlockId,
    ) -> Result<Branches<S>, CheckError> {
        let mut s = st.clone();
        self.jump_to(&mut s, target, tid);
        let back_edge = target <= pc.block;
        Ok(vec![(s, back_edge)])
    }

    fn step_cond_br(
        &self,
        st: &State<S>,
        tid: usize,
        pc: Pc,
        cond: Operand,
        on_true: BlockId,
        on_false: BlockId,
    ) -> Result<Branches<S>, CheckError> {
        let cond_v = self.deref(st, cond, tid, true, false)?;
        let multival = st.layout.is_multival(cond_v);

        let mut branches = Vec::new();
        for (target, bit) in [(on_true, 1u64), (on_false, 0)] {
            let mut s = st.clone();
            {
                let store = store_of(&mut s, multival);
                store.prune(cond_v, Value::constant(bit, 1), ICmpOp::Eq);
                if store.empty() {
                    continue;
                }
            }
            self.jump_to(&mut s, target, tid);
            branches.push((s, target <= pc.block));
        }
        Ok(branches)
    }

    /// Cases prune on equality; the default branch carries the conjunction
    /// of all the inequalities.
    fn step_switch(
        &self,
        st: &State<S>,
        tid: usize,
        pc: Pc,
        cond: Operand,
        default: BlockId,
        cases: &[(u64, BlockId)],
    ) -> Result<Branches<S>, CheckError> {
        let cond_v = self.deref(st, cond, tid, true, false)?;
        let multival = st.layout.is_multival(cond_v);
        let bw = self.value_bw(st, cond_v);

        let mut branches = Vec::new();
        for (case, target) in cases {
            let mut s = st.clone();
            {
                let store = store_of(&mut s, multival);
                store.prune(cond_v, Value::constant(*case, bw), ICmpOp::Eq);
                if store.empty() {
                    continue;
                }
            }
            self.jump_to(&mut s, *target, tid);
            branches.push((s, *target <= pc.block));
        }

        let mut s = st.clone();
        let feasible = {
            let store = store_of(&mut s, multival);
            for (case, _) in cases {
                store.prune(cond_v, Value::constant(*case, bw), ICmpOp::Ne);
            }
            !store.empty()
        };
        if feasible {
            self.jump_to(&mut s, default, tid);
            branches.push((s, default <= pc.block));
        }
        Ok(branches)
    }

    fn step_load(
        &self,
        st: &State<S>,
        tid: usize,
        dst: Reg,
        ptr: Operand,
    ) -> Result<Branches<S>, CheckError> {
        let ptr_v = self.deref(st, ptr, tid, true, false)?;
        let Some(word) = ptr_v.as_const() else {
            return Err(CheckError::SymbolicPointer);
        };
        let dst_v = self.deref(st, Operand::Reg(dst), tid, false, false)?;
        let from = Value::Var {
            id: Pointer::from(word).var(),
            pointer: dst_v.is_pointer(),
        };

        let mut s = st.clone();
        Self::copy_value(&mut s, dst_v, from);
        Ok(vec![(s, st.control.thread_count() > 1)])
    }

    fn step_store(
        &self,
        st: &State<S>,
        tid: usize,
        value: Operand,
        ptr: Operand,
    ) -> Result<Branches<S>, CheckError> {
        let value_v = self.deref(st, value, tid, true, false)?;
        let ptr_cell = self.deref(st, ptr, tid, false, false)?;
        if st.layout.is_multival(ptr_cell) {
            return Err(CheckError::SymbolicPointer);
        }
        let word = st.explicit.get(ptr_cell);
        let to = Value::Var {
            id: Pointer::from(word).var(),
            pointer: value_v.is_pointer(),
        };

        let mut s = st.clone();
        Self::copy_value(&mut s, to, value_v);
        Ok(vec![(s, st.control.thread_count() > 1)])
    }

    fn step_alloca(
        &self,
        st: &State<S>,
        tid: usize,
        dst: Reg,
        ty: &TypeDesc,
        count: Operand,
    ) -> Result<Branches<S>, CheckError> {
        let count_v = self.deref(st, count, tid, true, false)?;
        let Some(n) = count_v.as_const() else {
            return Err(CheckError::VariableLenArray);
        };

        let mut s = st.clone();
        let sid = s.layout.new_segment(tid);
        let mut widths = Vec::new();
        for _ in 0..n {
            ty.cell_widths(&mut widths);
        }
        s.data.add_segment(sid, &widths);
        s.explicit.add_segment(sid, &widths);
        s.layout.add_segment(sid, &widths);
        s.explicit.move_pointers(sid, 1);

        let dst_v = self.deref(&s, Operand::Reg(dst), tid, false, false)?;
        if let Some(id) = dst_v.as_var() {
            s.layout.set_multival(id, false);
        }
        s.explicit.store_pointer(dst_v, Pointer::new(sid, 0));
        Ok(vec![(s, false)])
    }

    /// Walks the pointee type, summing field offsets at constant indices.
    fn step_gep(
        &self,
        st: &State<S>,
        tid: usize,
        dst: Reg,
        base: Operand,
        ty: &TypeDesc,
        indices: &[Operand],
    ) -> Result<Branches<S>, CheckError> {
        let base_v = self.deref(st, base, tid, true, false)?;
        let Some(base_word) = base_v.as_const() else {
            return Err(CheckError::SymbolicPointer);
        };

        let mut offset: i64 = 0;
        let mut cursor = ty;
        for (position, index) in indices.iter().enumerate() {
            let index_v = self.deref(st, *index, tid, true, false)?;
            let Some(raw) = index_v.as_const() else {
                return Err(CheckError::SymbolicPointer);
            };
            let idx = sign_extend(raw, self.value_bw(st, index_v));
            if position == 0 {
                offset += idx * cursor.cell_count() as i64;
                continue;
            }
            match cursor {
                TypeDesc::Struct(fields) => {
                    let field = idx as usize;
                    offset += fields[..field]
                        .iter()
                        .map(|f| f.cell_count() as i64)
                        .sum::<i64>();
                    cursor = &fields[field];
                }
                TypeDesc::Array(elem, _) => {
                    offset += idx * elem.cell_count() as i64;
                    cursor = elem;
                }
                TypeDesc::Scalar(_) => {
                    return Err(CheckError::MalformedProgram(
                        "getelementptr walks through a scalar".into(),
                    ))
                }
            }
        }

        let mut p = Pointer::from(base_word);
        p.off = (p.off as i64 + offset) as u32;
        let dst_v = self.deref(st, Operand::Reg(dst), tid, false, false)?;

        let mut s = st.clone();
        if let Some(id) = dst_v.as_var() {
            s.layout.set_multival(id, false);
        }
        s.explicit.store_pointer(dst_v, p);
        Ok(vec![(s, false)])
    }

    fn step_ret(
        &self,
        st: &State<S>,
        tid: usize,
        value: Option<Operand>,
    ) -> Result<Branches<S>, CheckError> {
        let mut s = st.clone();
        if !s.control.last(tid) {
            if let Some(returned) = value {
                let ret_v = self.deref(&s, returned, tid, true, false)?;
                // The call site sits one instruction back from the caller's
                // resume point.
                let mut call_site = s.control.prev_pc(tid);
                call_site.instr -= 1;
                if let Instruction::Call { dst: Some(dreg), .. } = self.program.instr(call_site) {
                    let caller_v = self.deref(&s, Operand::Reg(*dreg), tid, false, true)?;
                    Self::copy_value(&mut s, caller_v, ret_v);
                }
            }
        }
        self.leave_frame(&mut s, tid);
        Ok(vec![(s, true)])
    }

    fn step_call(
        &self,
        st: &State<S>,
        tid: usize,
        dst: Option<Reg>,
        callee: &Callee,
        args: &[Operand],
    ) -> Result<Branches<S>, CheckError> {
        let mut s = st.clone();
        s.control.advance(tid, 1);

        match callee {
            Callee::Fun(f) => {
                let mut params = Vec::with_capacity(args.len());
                for arg in args {
                    params.push(self.deref(&s, *arg, tid, true, false)?);
                }
                self.enter_function(&mut s, *f, tid);
                let param_regs = self.program.function(*f).params.clone();
                for (value, reg) in params.into_iter().zip(param_regs) {
                    let dst_v = self.deref(&s, Operand::Reg(reg), tid, false, false)?;
                    Self::copy_value(&mut s, dst_v, value);
                }
                Ok(vec![(s, false)])
            }
            Callee::Intrinsic(intrinsic) => self.step_intrinsic(s, tid, dst, *intrinsic, args),
        }
    }

    fn step_intrinsic(
        &self,
        mut s: State<S>,
        tid: usize,
        dst: Option<Reg>,
        intrinsic: Intrinsic,
        args: &[Operand],
    ) -> Result<Branches<S>, CheckError> {
        let lonely = s.control.thread_count() == 1;
        match intrinsic {
            Intrinsic::Nop => Ok(vec![(s, false)]),

            Intrinsic::Input { bw } => {
                if let Some(reg) = dst {
                    let dst_v = self.deref(&s, Operand::Reg(reg), tid, false, false)?;
                    if let Some(id) = dst_v.as_var() {
                        s.layout.set_multival(id, true);
                    }
                    s.data.implement_input(dst_v, bw);
                }
                Ok(vec![(s, false)])
            }

            Intrinsic::Assume => {
                let cond = self.deref(&s, args[0], tid, false, false)?;
                let bw = self.value_bw(&s, cond);
                let multival = s.layout.is_multival(cond);
                let store = store_of(&mut s, multival);
                store.prune(cond, Value::constant(0, bw), ICmpOp::Ne);
                if store.empty() {
                    return Ok(Vec::new());
                }
                Ok(vec![(s, false)])
            }

            Intrinsic::Assert => {
                let cond = self.deref(&s, args[0], tid, false, false)?;
                let bw = self.value_bw(&s, cond);
                let multival = s.layout.is_multival(cond);

                let mut branches = Vec::new();
                let mut pass = s.clone();
                {
                    let store = store_of(&mut pass, multival);
                    store.prune(cond, Value::constant(0, bw), ICmpOp::Ne);
                    if !store.empty() {
                        branches.push((pass, false));
                    }
                }
                let mut fail = s;
                {
                    let store = store_of(&mut fail, multival);
                    store.prune(cond, Value::constant(0, bw), ICmpOp::Eq);
                    if !store.empty() {
                        fail.props.error = true;
                        branches.push((fail, true));
                    }
                }
                Ok(branches)
            }

            Intrinsic::ThreadCreate => {
                let target = match args.get(2) {
                    Some(Operand::Fun(f)) => *f,
                    _ => {
                        return Err(CheckError::UnknownExtern(
                            "pthread_create with an indirect start routine".into(),
                        ))
                    }
                };
                let new_tid = Self::start_thread_in(&self.program, &mut s, target);
                self.store_thread_handle(&mut s, tid, args[0], new_tid)?;
                self.pass_thread_argument(&mut s, tid, target, args.get(3).copied())?;
                Ok(vec![(s, true)])
            }

            Intrinsic::ThreadJoin => {
                let tid_v = self.deref(&s, args[0], tid, true, false)?;
                let Some(joined) = tid_v.as_const() else {
                    return Err(CheckError::MalformedProgram(
                        "pthread_join on a symbolic tid".into(),
                    ));
                };
                if s.control.has_tid(joined as u16) {
                    // Still running: rewind so the thread retries the join.
                    s.control.advance(tid, -1);
                }
                Ok(vec![(s, !lonely)])
            }

            Intrinsic::ThreadExit => {
                while !self.leave_frame(&mut s, tid) {}
                Ok(vec![(s, true)])
            }

            Intrinsic::Exit => {
                while s.control.thread_count() > 0 {
                    self.leave_frame(&mut s, 0);
                }
                Ok(vec![(s, true)])
            }

            Intrinsic::MutexLock => {
                let ptr = self.mutex_target(&s, tid, args[0])?;
                if s.explicit.get_ptr(ptr) != 0 {
                    // Held: rewind and retry at the next boundary.
                    s.control.advance(tid, -1);
                } else {
                    let cell = Value::var(ptr.seg as usize, ptr.off as usize);
                    let bw = s.explicit.width_of(cell);
                    s.layout.set_multival(ptr.var(), false);
                    s.explicit.store_through(ptr, Value::constant(1, bw));
                }
                Ok(vec![(s, !lonely)])
            }

            Intrinsic::MutexUnlock => {
                let ptr = self.mutex_target(&s, tid, args[0])?;
                let cell = Value::var(ptr.seg as usize, ptr.off as usize);
                let bw = s.explicit.width_of(cell);
                s.layout.set_multival(ptr.var(), false);
                s.explicit.store_through(ptr, Value::constant(0, bw));
                Ok(vec![(s, !lonely)])
            }

            Intrinsic::AtomicBegin => {
                s.control.enter_atomic(tid);
                Ok(vec![(s, false)])
            }

            Intrinsic::AtomicEnd => {
                s.control.leave_atomic(tid);
                Ok(vec![(s, true)])
            }
        }
    }

    fn mutex_target(
        &self,
        s: &State<S>,
        tid: usize,
        arg: Operand,
    ) -> Result<Pointer, CheckError> {
        let ptr_v = self.deref(s, arg, tid, true, false)?;
        let Some(word) = ptr_v.as_const() else {
            return Err(CheckError::SymbolicPointer);
        };
        Ok(Pointer::from(word))
    }

    fn store_thread_handle(
        &self,
        s: &mut State<S>,
        tid: usize,
        handle: Operand,
        new_tid: u16,
    ) -> Result<(), CheckError> {
        let ptr_v = self.deref(s, handle, tid, true, false)?;
        let Some(word) = ptr_v.as_const() else {
            return Err(CheckError::SymbolicPointer);
        };
        let ptr = Pointer::from(word);
        let cell = Value::var(ptr.seg as usize, ptr.off as usize);
        let bw = s.explicit.width_of(cell);
        s.layout.set_multival(ptr.var(), false);
        s.explicit
            .store_through(ptr, Value::constant(new_tid as u64, bw));
        Ok(())
    }

    /// Copies the start-routine argument into the child's first parameter.
    fn pass_thread_argument(
        &self,
        s: &mut State<S>,
        tid: usize,
        target: FunId,
        arg: Option<Operand>,
    ) -> Result<(), CheckError> {
        let function = self.program.function(target);
        let (Some(param), Some(arg)) = (function.params.first().copied(), arg) else {
            return Ok(());
        };
        let value = self.deref(s, arg, tid, false, false)?;
        let child = s.control.thread_count() - 1;
        let (seg, _) = s.layout.last_stack_segment_range(child, false);
        let dst = Value::Var {
            id: crate::store::VarId::new(seg, param as usize),
            pointer: function.regs[param as usize].pointer,
        };
        Self::copy_value(s, dst, value);
        Ok(())
    }
}
