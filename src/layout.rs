//! Per-thread segment bookkeeping and the multival flag set.
//!
//! Segments 0 and 1 belong to the module globals; every thread owns a run of
//! stack segments after them. Inserting a segment in the middle shifts the
//! ids of every later segment, which is why the callers must pair
//! `new_segment` with `ExplicitStore::move_pointers`.

use bitflags::bitflags;

use crate::blob::{BlobReader, BlobRw, BlobWriter};
use crate::store::{Value, VarId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CellFlags: u8 {
        /// The cell's current value is tracked symbolically.
        const MULTIVAL = 0x1;
    }
}

impl Default for CellFlags {
    /// New slots default to multival; segment churn must never leave a
    /// lowered flag behind on a reused slot.
    fn default() -> Self {
        CellFlags::MULTIVAL
    }
}

impl BlobRw for CellFlags {
    fn write(&self, w: &mut BlobWriter) {
        w.write_u8(self.bits());
    }

    fn read(r: &mut BlobReader) -> Self {
        CellFlags::from_bits_truncate(r.read_u8())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLayout {
    /// Per thread, the segment ids it owns, innermost stack last.
    thread_segments: Vec<Vec<u16>>,
    /// Per thread, how many segments each open stack frame holds.
    segments_in_stack: Vec<Vec<u16>>,
    flags: Vec<Vec<CellFlags>>,
}

impl MemoryLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.thread_segments.clear();
        self.segments_in_stack.clear();
        self.flags.clear();
    }

    pub fn thread_count(&self) -> usize {
        self.thread_segments.len()
    }

    pub fn add_segment(&mut self, sid: usize, widths: &[u8]) {
        self.flags.insert(sid, vec![CellFlags::default(); widths.len()]);
    }

    pub fn erase_segment(&mut self, sid: usize) {
        self.flags.remove(sid);
    }

    pub fn is_multival(&self, v: Value) -> bool {
        match v {
            Value::Const { .. } => false,
            Value::Var { id, .. } => self.flags[id.seg as usize][id.off as usize]
                .contains(CellFlags::MULTIVAL),
        }
    }

    pub fn set_multival(&mut self, id: VarId, multival: bool) {
        let cell = &mut self.flags[id.seg as usize][id.off as usize];
        cell.set(CellFlags::MULTIVAL, multival);
    }

    pub fn start_thread(&mut self) {
        self.thread_segments.push(Vec::new());
        self.segments_in_stack.push(Vec::new());
        let tid = self.thread_segments.len() - 1;
        self.new_stack(tid);
        self.new_segment(tid);
    }

    pub fn new_stack(&mut self, tid: usize) {
        self.segments_in_stack[tid].push(0);
    }

    /// Allocates the next segment id right after the thread's last segment,
    /// shifting the ids of every later thread's segments.
    pub fn new_segment(&mut self, tid: usize) -> usize {
        let wanted = match self.thread_segments[tid].last() {
            Some(last) => *last as usize + 1,
            // The first two segments belong to the globals.
            None if tid == 0 => 2,
            None => self.thread_segments[tid - 1]
                .last()
                .map(|s| *s as usize + 1)
                .unwrap_or(2),
        };
        self.thread_segments[tid].push(wanted as u16);
        for later in self.thread_segments.iter_mut().skip(tid + 1) {
            for sid in later.iter_mut() {
                *sid += 1;
            }
        }
        if let Some(frames) = self.segments_in_stack[tid].last_mut() {
            *frames += 1;
        }
        wanted
    }

    /// Segment range `[first, second)` of the innermost (or with `prev`, the
    /// caller's) stack frame.
    pub fn last_stack_segment_range(&self, tid: usize, prev: bool) -> (usize, usize) {
        let segments = &self.thread_segments[tid];
        let frames = &self.segments_in_stack[tid];
        if prev {
            let inner = *frames.last().unwrap_or(&0) as usize;
            let last = segments[segments.len() - 1 - inner] as usize;
            let first = last + 1 - frames[frames.len() - 2] as usize;
            (first, last + 1)
        } else {
            let last = *segments.last().unwrap_or(&0) as usize;
            let first = last + 1 - *frames.last().unwrap_or(&0) as usize;
            (first, last + 1)
        }
    }

    /// Drops the innermost stack frame, compacting the segment ids of every
    /// thread; removes the thread's rows once its last frame is gone.
    pub fn drop_last_stack(&mut self, tid: usize) {
        let (first, second) = self.last_stack_segment_range(tid, false);
        let width = (second - first) as u16;
        for sids in self.thread_segments.iter_mut() {
            for sid in sids.iter_mut() {
                if *sid as usize >= second {
                    *sid -= width;
                }
            }
        }
        let own = &mut self.thread_segments[tid];
        own.truncate(own.len() - width as usize);
        if own.is_empty() {
            self.thread_segments.remove(tid);
            self.segments_in_stack.remove(tid);
        } else {
            self.segments_in_stack[tid].pop();
        }
    }

    pub fn leave(&mut self, tid: usize) {
        self.drop_last_stack(tid);
    }

    pub fn write(&self, w: &mut BlobWriter) {
        self.thread_segments.write(w);
        self.segments_in_stack.write(w);
        self.flags.write(w);
    }

    pub fn read(&mut self, r: &mut BlobReader) {
        self.thread_segments = Vec::<Vec<u16>>::read(r);
        self.segments_in_stack = Vec::<Vec<u16>>::read(r);
        self.flags = Vec::<Vec<CellFlags>>::read(r);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout_with_globals() -> MemoryLayout {
        let mut l = MemoryLayout::new();
        l.add_segment(0, &[64, 64]);
        l.add_segment(1, &[32, 32]);
        l
    }

    #[test]
    fn first_thread_segment_is_two() {
        let mut l = layout_with_globals();
        l.start_thread();
        l.add_segment(2, &[32]);
        assert_eq!(l.last_stack_segment_range(0, false), (2, 3));
    }

    #[test]
    fn new_segment_shifts_later_threads() {
        let mut l = layout_with_globals();
        l.start_thread(); // thread 0 → segment 2
        l.add_segment(2, &[32]);
        l.start_thread(); // thread 1 → segment 3
        l.add_segment(3, &[32]);

        // Thread 0 allocates; thread 1's segment moves from 3 to 4.
        let sid = l.new_segment(0);
        assert_eq!(sid, 3);
        l.add_segment(3, &[8]);
        assert_eq!(l.last_stack_segment_range(0, false), (2, 4));
        assert_eq!(l.last_stack_segment_range(1, false), (4, 5));
    }

    #[test]
    fn drop_last_stack_reverses_new_segment() {
        let mut l = layout_with_globals();
        l.start_thread();
        l.add_segment(2, &[32]);
        l.start_thread();
        l.add_segment(3, &[32]);

        // Thread 0 enters a function: a fresh frame with one segment.
        l.new_stack(0);
        let sid = l.new_segment(0);
        assert_eq!(sid, 3);
        l.add_segment(3, &[16, 16]);
        assert_eq!(l.last_stack_segment_range(0, false), (3, 4));
        assert_eq!(l.last_stack_segment_range(0, true), (2, 3));
        assert_eq!(l.last_stack_segment_range(1, false), (4, 5));

        l.erase_segment(3);
        l.drop_last_stack(0);
        assert_eq!(l.last_stack_segment_range(0, false), (2, 3));
        assert_eq!(l.last_stack_segment_range(1, false), (3, 4));
    }

    #[test]
    fn dropping_the_last_frame_removes_the_thread() {
        let mut l = layout_with_globals();
        l.start_thread();
        l.add_segment(2, &[32]);
        l.start_thread();
        l.add_segment(3, &[32]);
        assert_eq!(l.thread_count(), 2);

        l.erase_segment(2);
        l.drop_last_stack(0);
        assert_eq!(l.thread_count(), 1);
        // The surviving thread's segments compacted down.
        assert_eq!(l.last_stack_segment_range(0, false), (2, 3));
    }

    #[test]
    fn multival_defaults_to_set_and_survives_round_trip() {
        let mut l = layout_with_globals();
        assert!(l.is_multival(Value::var(1, 0)));
        l.set_multival(VarId::new(1, 0), false);
        assert!(!l.is_multival(Value::var(1, 0)));

        // Erasing and re-adding restores the default.
        l.erase_segment(1);
        l.add_segment(1, &[32, 32]);
        assert!(l.is_multival(Value::var(1, 0)));

        let mut w = BlobWriter::new();
        l.set_multival(VarId::new(1, 1), false);
        l.write(&mut w);
        let blob = crate::blob::Blob::assemble(&[], w, BlobWriter::new());
        let mut back = MemoryLayout::new();
        back.read(&mut BlobReader::new(blob.explicit()));
        assert!(!back.is_multival(Value::var(1, 1)));
        assert!(back.is_multival(Value::var(1, 0)));
    }
}
