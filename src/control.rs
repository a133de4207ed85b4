//! Per-thread call stacks of program counters.

use crate::blob::{BlobReader, BlobRw, BlobWriter};
use crate::program::{BlockId, FunId};

/// Position of one instruction: function, basic block, instruction index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Pc {
    pub function: FunId,
    pub block: BlockId,
    pub instr: u16,
}

impl Pc {
    pub fn entry(function: FunId) -> Pc {
        Pc {
            function,
            block: 0,
            instr: 0,
        }
    }
}

impl BlobRw for Pc {
    fn write(&self, w: &mut BlobWriter) {
        w.write_u16(self.function);
        w.write_u16(self.block);
        w.write_u16(self.instr);
    }

    fn read(r: &mut BlobReader) -> Self {
        Pc {
            function: r.read_u16(),
            block: r.read_u16(),
            instr: r.read_u16(),
        }
    }
}

/// Pure state container for thread control flow. The evaluator drives every
/// transition; nothing here consults the program.
#[derive(Debug, Clone, Default)]
pub struct Control {
    /// Per-thread call stack, innermost frame last.
    context: Vec<Vec<Pc>>,
    /// Block the thread came from, for phi nodes; cleared outside phi runs.
    previous_bb: Vec<Pc>,
    tids: Vec<u16>,
    /// Threads currently inside atomic sections, innermost last. Only the
    /// top one may run until it leaves its section.
    atomic_section: Vec<u16>,
    next_free_tid: u16,
}

impl Control {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.context.clear();
        self.previous_bb.clear();
        self.tids.clear();
        self.atomic_section.clear();
        self.next_free_tid = 0;
    }

    pub fn thread_count(&self) -> usize {
        self.context.len()
    }

    pub fn has_tid(&self, tid: u16) -> bool {
        self.tids.contains(&tid)
    }

    /// Starts a new thread in `function`; returns its tid.
    pub fn start_thread(&mut self, function: FunId) -> u16 {
        self.context.push(vec![Pc::entry(function)]);
        self.previous_bb.push(Pc::default());
        self.tids.push(self.next_free_tid);
        self.next_free_tid += 1;
        *self.tids.last().unwrap_or(&0)
    }

    pub fn enter_function(&mut self, function: FunId, tid: usize) {
        self.context[tid].push(Pc::entry(function));
    }

    pub fn jump_to(&mut self, pc: Pc, tid: usize, remember_previous: bool) {
        self.previous_bb[tid] = if remember_previous {
            *self.context[tid].last().unwrap_or(&Pc::default())
        } else {
            Pc::default()
        };
        if let Some(top) = self.context[tid].last_mut() {
            *top = pc;
        }
    }

    /// Pops the innermost frame; removes the thread when its stack empties.
    /// Returns true when the thread is gone.
    pub fn leave(&mut self, tid: usize) -> bool {
        self.context[tid].pop();
        if self.context[tid].is_empty() {
            self.context.remove(tid);
            self.previous_bb.remove(tid);
            self.tids.remove(tid);
            true
        } else {
            false
        }
    }

    pub fn advance(&mut self, tid: usize, relative: i32) {
        if let Some(top) = self.context[tid].last_mut() {
            top.instr = (top.instr as i32 + relative) as u16;
        }
    }

    pub fn pc(&self, tid: usize) -> Pc {
        *self.context[tid].last().unwrap_or(&Pc::default())
    }

    /// The caller's call-site PC (one frame up).
    pub fn prev_pc(&self, tid: usize) -> Pc {
        let stack = &self.context[tid];
        stack[stack.len() - 2]
    }

    /// True when the thread is in its outermost frame.
    pub fn last(&self, tid: usize) -> bool {
        self.context[tid].len() == 1
    }

    pub fn previous_block(&self, tid: usize) -> Pc {
        self.previous_bb[tid]
    }

    pub fn clear_previous_block(&mut self, tid: usize) {
        self.previous_bb[tid] = Pc::default();
    }

    pub fn enter_atomic(&mut self, tid: usize) {
        self.atomic_section.push(tid as u16);
    }

    pub fn leave_atomic(&mut self, tid: usize) {
        debug_assert_eq!(self.atomic_section.last(), Some(&(tid as u16)));
        self.atomic_section.pop();
    }

    /// Thread indexes eligible at the next boundary: all of them, unless an
    /// atomic section gates scheduling down to one.
    pub fn allowed_threads(&self) -> Vec<usize> {
        match self.atomic_section.last() {
            Some(tid) => vec![*tid as usize],
            None => (0..self.context.len()).collect(),
        }
    }

    pub fn write(&self, w: &mut BlobWriter) {
        self.context.write(w);
        self.previous_bb.write(w);
        self.tids.write(w);
        w.write_u16(self.next_free_tid);
        // The atomic gate must survive the blob round-trip or sections
        // spanning observable instructions would silently unlock.
        self.atomic_section.write(w);
    }

    pub fn read(&mut self, r: &mut BlobReader) {
        self.context = Vec::<Vec<Pc>>::read(r);
        self.previous_bb = Vec::<Pc>::read(r);
        self.tids = Vec::<u16>::read(r);
        self.next_free_tid = r.read_u16();
        self.atomic_section = Vec::<u16>::read(r);
        debug_assert_eq!(self.context.len(), self.previous_bb.len());
        debug_assert_eq!(self.context.len(), self.tids.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tids_are_never_reused() {
        let mut c = Control::new();
        let t0 = c.start_thread(0);
        let t1 = c.start_thread(1);
        assert_eq!((t0, t1), (0, 1));

        c.leave(0);
        assert!(!c.has_tid(0));
        let t2 = c.start_thread(2);
        assert_eq!(t2, 2);
    }

    #[test]
    fn leave_pops_frames_then_the_thread() {
        let mut c = Control::new();
        c.start_thread(0);
        c.enter_function(3, 0);
        assert!(!c.last(0));
        assert_eq!(c.pc(0), Pc::entry(3));
        assert_eq!(c.prev_pc(0), Pc::entry(0));

        assert!(!c.leave(0));
        assert!(c.last(0));
        assert!(c.leave(0));
        assert_eq!(c.thread_count(), 0);
    }

    #[test]
    fn atomic_sections_gate_scheduling() {
        let mut c = Control::new();
        c.start_thread(0);
        c.start_thread(1);
        assert_eq!(c.allowed_threads(), vec![0, 1]);
        c.enter_atomic(1);
        assert_eq!(c.allowed_threads(), vec![1]);
        c.leave_atomic(1);
        assert_eq!(c.allowed_threads(), vec![0, 1]);
    }

    #[test]
    fn round_trip_preserves_the_atomic_gate() {
        let mut c = Control::new();
        c.start_thread(0);
        c.start_thread(5);
        c.advance(1, 2);
        c.enter_atomic(0);

        let mut w = BlobWriter::new();
        c.write(&mut w);
        let blob = crate::blob::Blob::assemble(&[], w, BlobWriter::new());
        let mut back = Control::new();
        back.read(&mut BlobReader::new(blob.explicit()));

        assert_eq!(back.thread_count(), 2);
        assert_eq!(back.pc(1).instr, 2);
        assert_eq!(back.allowed_threads(), vec![0]);
    }
}
