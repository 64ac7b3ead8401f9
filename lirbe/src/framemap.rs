//! The stack frame layout planner.
//!
//! A frame is carved into four contiguous regions, low to high address:
//!
//! ```text
//!   | outgoing call args | spill slots | monitors | stack-allocated blocks |
//! ```
//!
//! The outgoing-argument and spill areas share the same slot-index address
//! space below the monitor area, which forces an ordering protocol: the
//! outgoing reservation may only grow while spill-slot allocation has not
//! started, and no address can be resolved until [FrameMap::finalize_frame]
//! has fixed the total size. Both rules are asserted, not checked: a violation
//! is a bug in the allocator or the lowering phase.
//!
//! Slot indices handed to [FrameMap::to_stack_address] are the same ones that
//! appear in [Operand::Stack](crate::lir::Operand): non-negative for the
//! spill/outgoing area, negative for incoming arguments (which live in the
//! caller's frame, above ours).

use crate::target::{MethodDesc, TargetDesc};

/// A frame-pointer-relative address, the common currency between code
/// emission and debug-info recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameAddress {
    /// Byte offset from the frame base (the lowest address of the frame).
    pub offset: i32,
}

index_vec::define_index_type! {
    /// Identifies one stack-allocated block requested by lowering.
    pub struct StackBlockIdx = u32;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SpillState {
    /// No spill slot handed out yet; the outgoing area may still grow.
    Open,
    /// Spill allocation has begun; the outgoing area is frozen.
    Started,
}

#[derive(Debug)]
pub struct FrameMap {
    word_size: u32,
    stack_align: u32,
    monitor_size_in_words: u32,
    /// Incoming argument slots (negative [Operand::Stack] indices resolve
    /// into the caller's frame).
    incoming_arg_slots: u32,
    /// Outgoing call argument area, in slots.
    outgoing_slots: u32,
    spill_state: SpillState,
    /// Fixed by [FrameMap::finalize_frame].
    spill_slots: Option<u32>,
    monitor_count: u32,
    /// Byte sizes of stack-allocated blocks, in request order. Offsets are
    /// only meaningful once the frame is finalized.
    stack_blocks: Vec<u32>,
    /// Total frame size in bytes, aligned; `None` until finalized.
    frame_size: Option<u32>,
}

impl FrameMap {
    pub fn new(target: &TargetDesc, method: &MethodDesc, monitor_count: u32) -> Self {
        Self {
            word_size: target.word_size,
            stack_align: target.stack_align,
            monitor_size_in_words: target.monitor_size_in_words,
            // The receiver of a non-static method arrives as one extra slot
            // ahead of the explicit arguments.
            incoming_arg_slots: method.arg_slots + u32::from(!method.is_static),
            outgoing_slots: 0,
            spill_state: SpillState::Open,
            spill_slots: None,
            monitor_count,
            stack_blocks: Vec::new(),
            frame_size: None,
        }
    }

    /// Grow the outgoing-argument area to at least `slots`. Only legal while
    /// spill allocation has not started.
    pub fn reserve_outgoing(&mut self, slots: u32) {
        assert_eq!(
            self.spill_state,
            SpillState::Open,
            "outgoing area frozen once spill allocation starts"
        );
        self.outgoing_slots = self.outgoing_slots.max(slots);
    }

    /// Reserve a stack-allocated block of `size` bytes (rounded up to whole
    /// words); only legal before the frame is finalized.
    pub fn reserve_stack_block(&mut self, size: u32) -> StackBlockIdx {
        assert!(self.frame_size.is_none(), "frame already finalized");
        let idx = StackBlockIdx::from_usize(self.stack_blocks.len());
        self.stack_blocks.push(size.next_multiple_of(self.word_size));
        idx
    }

    /// The first free spill slot index. The first call flips the planner into
    /// the started state, freezing the outgoing area.
    pub fn initial_spill_slot(&mut self) -> u32 {
        self.spill_state = SpillState::Started;
        self.outgoing_slots
    }

    /// Fix the spill area at `spill_slots` slots and compute the total frame
    /// size. After this, addresses can be resolved and nothing may grow.
    pub fn finalize_frame(&mut self, spill_slots: u32) {
        assert!(self.frame_size.is_none(), "frame finalized twice");
        self.spill_state = SpillState::Started;
        self.spill_slots = Some(spill_slots);
        let below_monitors = (self.outgoing_slots + spill_slots) * self.word_size;
        let monitors = self.monitor_count * self.monitor_size_in_words * self.word_size;
        let blocks: u32 = self.stack_blocks.iter().sum();
        let total = below_monitors + monitors + blocks;
        self.frame_size = Some(total.next_multiple_of(self.stack_align));
    }

    /// Total frame size in bytes.
    ///
    /// # Panics
    ///
    /// Panics if the frame has not been finalized.
    pub fn frame_size(&self) -> u32 {
        self.frame_size.expect("frame size not finalized")
    }

    pub fn monitor_count(&self) -> u32 {
        self.monitor_count
    }

    pub fn incoming_arg_slots(&self) -> u32 {
        self.incoming_arg_slots
    }

    /// Size of the frame in word-sized slots, the name space used by oop maps
    /// for stack locations.
    pub fn frame_slots(&self) -> u32 {
        self.frame_size() / self.word_size
    }

    fn checked(&self, offset: i32) -> FrameAddress {
        let fs = self.frame_size();
        assert!(
            offset >= 0 && (offset as u32) < fs,
            "frame offset {offset} outside frame of {fs} bytes"
        );
        FrameAddress { offset }
    }

    /// Resolve a slot index from an [Operand::Stack](crate::lir::Operand) to
    /// a concrete frame address. Negative slots are incoming arguments and
    /// resolve above the frame (into the caller's outgoing area).
    pub fn to_stack_address(&self, slot: i32) -> FrameAddress {
        if slot < 0 {
            let arg = (-slot - 1) as u32;
            assert!(arg < self.incoming_arg_slots, "argument slot {arg} out of range");
            // One word above the frame top per argument slot, skipping the
            // return address pushed by the call.
            let off = self.frame_size() + (1 + arg) * self.word_size;
            FrameAddress { offset: off as i32 }
        } else {
            let spill = self.spill_slots.expect("spill area not fixed");
            assert!((slot as u32) < self.outgoing_slots + spill, "slot {slot} out of range");
            self.checked(slot * self.word_size as i32)
        }
    }

    /// Address of monitor `index`'s lock record.
    pub fn to_monitor_stack_address(&self, index: u32) -> FrameAddress {
        assert!(index < self.monitor_count, "monitor {index} out of range");
        let spill = self.spill_slots.expect("spill area not fixed");
        let base = (self.outgoing_slots + spill) * self.word_size;
        self.checked((base + index * self.monitor_size_in_words * self.word_size) as i32)
    }

    /// Address of a stack-allocated block.
    pub fn to_stack_block_address(&self, idx: StackBlockIdx) -> FrameAddress {
        let spill = self.spill_slots.expect("spill area not fixed");
        let mut off = (self.outgoing_slots + spill) * self.word_size
            + self.monitor_count * self.monitor_size_in_words * self.word_size;
        for (i, sz) in self.stack_blocks.iter().enumerate() {
            if i == usize::from(idx) {
                return self.checked(off as i32);
            }
            off += sz;
        }
        panic!("unknown stack block {idx:?}");
    }
}
