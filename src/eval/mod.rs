//! The per-thread instruction evaluator.
//!
//! [`Evaluator::successors`] advances one thread at a time up to an
//! observable boundary and materialises every reachable boundary state as a
//! fresh blob; the search drivers own the decision which of them to expand.
//! Between boundaries a thread's actions are atomic, which is what keeps the
//! product with the scheduler small.

mod step;

use std::rc::Rc;

use tracing::trace;

use crate::blob::{Blob, BlobReader, BlobWriter};
use crate::consts::{GLOBAL_DATA_SEGMENT, GLOBAL_PTR_SEGMENT};
use crate::context::CtxRef;
use crate::control::Control;
use crate::error::CheckError;
use crate::formula::Formula;
use crate::layout::MemoryLayout;
use crate::program::{FunId, Module, Operand};
use crate::stats;
use crate::store::explicit::ExplicitStore;
use crate::store::{DataStore, Pointer, SymStore, Value, VarId};

/// Result flags of a state, serialised first in the explicit region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Properties {
    pub error: bool,
    pub empty: bool,
}

impl Properties {
    fn write(&self, w: &mut BlobWriter) {
        w.write_bool(self.error);
        w.write_bool(self.empty);
    }

    fn read(&mut self, r: &mut BlobReader) {
        self.error = r.read_bool();
        self.empty = r.read_bool();
    }
}

/// One full program configuration.
#[derive(Debug, Clone)]
pub(crate) struct State<S> {
    pub props: Properties,
    pub control: Control,
    pub layout: MemoryLayout,
    pub explicit: ExplicitStore,
    pub data: S,
}

/// A materialised boundary state.
#[derive(Debug, Clone)]
pub struct Successor {
    pub blob: Blob,
    pub error: bool,
}

pub struct Evaluator<S: SymStore> {
    program: Rc<Module>,
    ctx: CtxRef,
    state: State<S>,
}

impl<S: SymStore> Evaluator<S> {
    pub fn new(program: Rc<Module>, ctx: CtxRef) -> Result<Self, CheckError> {
        let mut eval = Evaluator {
            state: State {
                props: Properties::default(),
                control: Control::new(),
                layout: MemoryLayout::new(),
                explicit: ExplicitStore::new(),
                data: S::new(ctx.clone()),
            },
            program,
            ctx,
        };
        eval.initial()?;
        Ok(eval)
    }

    /// Resets to the module's initial configuration: two global segments,
    /// initialisers applied, `main` started as thread 0.
    fn initial(&mut self) -> Result<(), CheckError> {
        let main = self
            .program
            .find_function("main")
            .ok_or(CheckError::MissingMain)?;

        let st = &mut self.state;
        st.props = Properties::default();
        st.control.clear();
        st.layout.clear();
        st.explicit.clear();

        let ptr_widths = self.program.global_ptr_widths();
        let data_widths = self.program.global_cell_widths();

        st.explicit.add_segment(GLOBAL_PTR_SEGMENT, &ptr_widths);
        st.data.add_segment(GLOBAL_PTR_SEGMENT, &[]);
        st.layout.add_segment(GLOBAL_PTR_SEGMENT, &ptr_widths);

        st.explicit.add_segment(GLOBAL_DATA_SEGMENT, &data_widths);
        st.data.add_segment(GLOBAL_DATA_SEGMENT, &data_widths);
        st.layout.add_segment(GLOBAL_DATA_SEGMENT, &data_widths);

        let mut offset = 0;
        for (index, global) in self.program.globals.iter().enumerate() {
            if let Some(values) = &global.init {
                for (cell, value) in values.iter().enumerate() {
                    let dst = Value::var(GLOBAL_DATA_SEGMENT, offset + cell);
                    let bw = st.explicit.width_of(dst);
                    st.layout.set_multival(VarId::new(GLOBAL_DATA_SEGMENT, offset + cell), false);
                    st.explicit.implement_store(dst, Value::constant(*value, bw));
                }
            }
            // Uninitialised cells stay multival: unconstrained input.
            let ptr_cell = Value::var(GLOBAL_PTR_SEGMENT, index);
            st.layout.set_multival(VarId::new(GLOBAL_PTR_SEGMENT, index), false);
            st.explicit
                .store_pointer(ptr_cell, Pointer::new(GLOBAL_DATA_SEGMENT, offset));
            offset += global.ty.cell_count();
        }

        let state = &mut self.state;
        Self::start_thread_in(&self.program, state, main);
        Ok(())
    }

    /// Starts a thread running `function`; returns its tid.
    pub(crate) fn start_thread_in(program: &Module, st: &mut State<S>, function: FunId) -> u16 {
        let tid_value = st.control.start_thread(function);
        let index = st.control.thread_count() - 1;
        st.layout.start_thread();
        let (first, _) = st.layout.last_stack_segment_range(index, false);
        let widths = program.function(function).reg_widths();
        st.data.add_segment(first, &widths);
        st.explicit.add_segment(first, &widths);
        st.layout.add_segment(first, &widths);
        st.explicit.move_pointers(first, 1);
        tid_value
    }

    pub(crate) fn enter_function(&self, st: &mut State<S>, function: FunId, tid: usize) {
        st.control.enter_function(function, tid);
        st.layout.new_stack(tid);
        let sid = st.layout.new_segment(tid);
        let widths = self.program.function(function).reg_widths();
        st.data.add_segment(sid, &widths);
        st.explicit.add_segment(sid, &widths);
        st.layout.add_segment(sid, &widths);
        st.explicit.move_pointers(sid, 1);
    }

    /// Pops the innermost frame of `tid`, erasing its segments from all
    /// three stores and re-aiming surviving pointers. Returns true when the
    /// thread itself is gone.
    pub(crate) fn leave_frame(&self, st: &mut State<S>, tid: usize) -> bool {
        let gone = st.control.leave(tid);
        let (first, second) = st.layout.last_stack_segment_range(tid, false);
        for _ in first..second {
            st.data.erase_segment(first);
            st.explicit.erase_segment(first);
            st.layout.erase_segment(first);
        }
        st.explicit.move_pointers(second, -((second - first) as i32));
        st.layout.leave(tid);
        gone
    }

    /// Resolves an operand to a store value. With `expl2const`, cells whose
    /// value is concretely known collapse to constants. With `prev`, register
    /// operands resolve in the caller's frame.
    pub(crate) fn deref(
        &self,
        st: &State<S>,
        op: Operand,
        tid: usize,
        expl2const: bool,
        prev: bool,
    ) -> Result<Value, CheckError> {
        match op {
            Operand::Const { value, bw } => Ok(Value::constant(value, bw)),
            Operand::Null => Ok(Value::Const {
                value: 0,
                bw: 64,
                pointer: true,
            }),
            Operand::Global(g) => {
                let v = Value::Var {
                    id: VarId::new(GLOBAL_PTR_SEGMENT, g as usize),
                    pointer: true,
                };
                if expl2const && !st.layout.is_multival(v) {
                    Ok(Value::Const {
                        value: st.explicit.get(v),
                        bw: 64,
                        pointer: true,
                    })
                } else {
                    Ok(v)
                }
            }
            Operand::Reg(reg) => {
                let function = if prev {
                    st.control.prev_pc(tid).function
                } else {
                    st.control.pc(tid).function
                };
                let info = self.program.function(function).regs[reg as usize];
                let (seg, _) = st.layout.last_stack_segment_range(tid, prev);
                let v = Value::Var {
                    id: VarId::new(seg, reg as usize),
                    pointer: info.pointer,
                };
                if expl2const && !st.layout.is_multival(v) {
                    Ok(Value::Const {
                        value: st.explicit.get(v),
                        bw: info.bw,
                        pointer: info.pointer,
                    })
                } else {
                    Ok(v)
                }
            }
            Operand::Fun(_) => Err(CheckError::MalformedProgram(
                "function operand outside a call".into(),
            )),
        }
    }

    pub(crate) fn value_bw(&self, st: &State<S>, v: Value) -> u8 {
        match v {
            Value::Const { bw, .. } => bw,
            Value::Var { .. } => st.explicit.width_of(v),
        }
    }

    /// All boundary states reachable from the current state by advancing one
    /// eligible thread. `user` is copied into each emitted blob verbatim.
    pub fn successors(&mut self, user: &[u8]) -> Result<Vec<Successor>, CheckError> {
        if self.state.props.error {
            // Error states are terminal.
            return Ok(Vec::new());
        }
        let base = self.state.clone();
        let mut out = Vec::new();

        for tid in base.control.allowed_threads() {
            // Depth-first over the unobservable micro-steps of this thread;
            // boundary states become successors.
            let mut frontier = vec![base.clone()];
            while let Some(st) = frontier.pop() {
                let branches = self.step(st, tid)?;
                for (next, observable) in branches {
                    if observable || next.props.error || next.control.thread_count() == 0 {
                        self.ctx.bump(stats::INSTR_OBSERVABLE);
                        out.push(Successor {
                            error: next.props.error,
                            blob: Self::write_state(&next, user),
                        });
                    } else {
                        frontier.push(next);
                    }
                }
            }
        }

        self.state = base;
        Ok(out)
    }

    pub fn is_error(&self) -> bool {
        self.state.props.error
    }

    pub fn thread_count(&self) -> usize {
        self.state.control.thread_count()
    }

    /// Conjoins an atomic-proposition guard onto the current symbolic state.
    /// Cells whose value is concretely known are folded in as constants;
    /// only genuinely symbolic cells stay as identifiers for the store to
    /// rename.
    pub fn push_prop_guard(&mut self, guard: &Formula) {
        use crate::formula::Item;

        let mut f = guard.clone();
        for item in f.rpn_mut() {
            if let Item::Ident(id) = item {
                let (seg, off, bw) = (id.seg as usize, id.off as usize, id.bw);
                let cell = Value::var(seg, off);
                if !self.state.layout.is_multival(cell) {
                    *item = Item::Constant {
                        value: self.state.explicit.get(cell),
                        bw,
                    };
                }
            }
        }
        self.state.data.push_prop_guard(&f);
    }

    /// True iff the current symbolic constraints are unsatisfiable.
    pub fn constraints_empty(&mut self) -> bool {
        self.state.data.empty()
    }

    pub fn write_blob(&self, user: &[u8]) -> Blob {
        Self::write_state(&self.state, user)
    }

    fn write_state(st: &State<S>, user: &[u8]) -> Blob {
        let mut explicit = BlobWriter::new();
        st.props.write(&mut explicit);
        st.control.write(&mut explicit);
        st.layout.write(&mut explicit);
        st.explicit.write(&mut explicit);

        let mut symbolic = BlobWriter::new();
        st.data.write(&mut symbolic);

        Blob::assemble(user, explicit, symbolic)
    }

    pub fn read_blob(&mut self, blob: &Blob) {
        let mut r = BlobReader::new(blob.explicit());
        self.state.props.read(&mut r);
        self.state.control.read(&mut r);
        self.state.layout.read(&mut r);
        self.state.explicit.read(&mut r);
        debug_assert!(r.exhausted());

        let mut sym = BlobReader::new(blob.symbolic());
        self.state.data.read(&mut sym);
        trace!(threads = self.state.control.thread_count(), "state restored");
    }

    /// Human-readable rendering of the current state, for verdicts.
    pub fn describe(&self) -> String {
        if self.state.control.thread_count() == 0 {
            return "exit".to_string();
        }
        let mut out = String::new();
        if self.is_error() {
            out.push_str("Error state.\n");
        }
        for tid in 0..self.state.control.thread_count() {
            let pc = self.state.control.pc(tid);
            let name = &self.program.function(pc.function).name;
            out.push_str(&format!(
                "thread {tid}: {name}.{}.{}\n",
                pc.block, pc.instr
            ));
        }
        out.push_str(&format!("{:?}", self.state.data));
        out
    }
}
