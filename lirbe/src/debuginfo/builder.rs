//! Turns frame snapshots into serialized debug info.
//!
//! The builder is the only component that knows how to translate allocator
//! answers ([ValueLoc]) into the serialized vocabulary of scope values and
//! oop maps. It walks the inline scope chain outermost-first so a consumer
//! can rebuild interpreter frames top-down, and it trims trailing dead
//! locals from each scope before serializing.

use crate::{
    debuginfo::{
        oop_map::MapLocation,
        recorder::DebugInfoRecorder,
        scope_value::{Location, LocationType, MonitorValue, ScopeValue},
        CodeEmitInfo, FrameState, OopMap, ValueId, ValueLoc,
    },
    framemap::FrameMap,
    target::TargetDesc,
};

pub struct DebugInfoBuilder<'a> {
    target: &'a TargetDesc,
    frame_map: &'a FrameMap,
}

impl<'a> DebugInfoBuilder<'a> {
    pub fn new(target: &'a TargetDesc, frame_map: &'a FrameMap) -> Self {
        Self { target, frame_map }
    }

    /// The stack-location extent of an oop map: the frame's own slots plus
    /// the incoming arguments, plus the return-address word that sits between
    /// them.
    fn oop_map_arg_extent(&self) -> u32 {
        self.frame_map.incoming_arg_slots() + 1
    }

    /// Map an operand stack slot index onto the oop-map stack numbering.
    fn oop_map_stack_slot(&self, slot: i32) -> u32 {
        if slot < 0 {
            let arg = (-slot - 1) as u32;
            self.frame_map.frame_slots() + 1 + arg
        } else {
            self.frame_map.to_stack_address(slot).offset as u32 / self.target.word_size
        }
    }

    /// Build the oop map covering every live value of `frame` and its inline
    /// callers, plus the object words of held monitors.
    pub fn build_oop_map<F>(&self, frame: &FrameState, locate: &mut F) -> OopMap
    where
        F: FnMut(ValueId) -> ValueLoc,
    {
        let mut map = OopMap::new(
            self.target.oop_map_reg_count,
            self.frame_map.frame_slots(),
            self.oop_map_arg_extent(),
        );
        self.fill_oop_map(frame, locate, &mut map);
        map
    }

    /// Returns the next free monitor index: monitors are numbered cumulatively
    /// down the inline chain, caller frames first, matching how [FrameMap]
    /// sizes the monitor region by the total count.
    fn fill_oop_map<F>(&self, frame: &FrameState, locate: &mut F, map: &mut OopMap) -> u32
    where
        F: FnMut(ValueId) -> ValueLoc,
    {
        let monitor_base = match &frame.caller {
            Some(caller) => self.fill_oop_map(caller, locate, map),
            None => 0,
        };
        let live = frame
            .locals
            .iter()
            .filter_map(|l| *l)
            .chain(frame.stack.iter().copied());
        for vid in live {
            match locate(vid) {
                ValueLoc::Register(reg, lt) => {
                    let mark = match lt {
                        LocationType::Oop => OopMap::set_oop,
                        LocationType::NarrowOop => OopMap::set_narrow_oop,
                        _ => continue,
                    };
                    mark(map, MapLocation::Register(self.target.ref_map_index(reg)));
                }
                ValueLoc::Stack(slot, lt) => {
                    let mark = match lt {
                        LocationType::Oop => OopMap::set_oop,
                        LocationType::NarrowOop => OopMap::set_narrow_oop,
                        _ => continue,
                    };
                    mark(map, MapLocation::Stack(self.oop_map_stack_slot(slot)));
                }
                ValueLoc::ConstInt(_) | ValueLoc::ConstLong(_) | ValueLoc::ConstObject(_) => (),
            }
        }
        // The object word of each lock record holds a reference for as long
        // as the monitor is held.
        for i in 0..frame.locks.len() as u32 {
            let addr = self.frame_map.to_monitor_stack_address(monitor_base + i);
            let owner_slot = addr.offset as u32 / self.target.word_size
                + (self.target.monitor_size_in_words - 1);
            map.set_oop(MapLocation::Stack(owner_slot));
        }
        monitor_base + frame.locks.len() as u32
    }

    fn to_scope_value<F>(&self, vid: ValueId, locate: &mut F) -> ScopeValue
    where
        F: FnMut(ValueId) -> ValueLoc,
    {
        match locate(vid) {
            ValueLoc::Register(reg, lt) => {
                ScopeValue::Location(Location::register(reg.index() as u16, lt))
            }
            ValueLoc::Stack(slot, lt) => {
                ScopeValue::Location(Location::stack(self.frame_map.to_stack_address(slot).offset, lt))
            }
            ValueLoc::ConstInt(v) => ScopeValue::ConstInt(v),
            ValueLoc::ConstLong(v) => ScopeValue::ConstLong(v),
            ValueLoc::ConstObject(v) => ScopeValue::ConstObject(v),
        }
    }

    /// Serialize one scope level: locals (trailing dead ones trimmed), stack,
    /// and monitors, in that order.
    fn scope_values<F>(&self, frame: &FrameState, locate: &mut F, monitor_base: u32) -> ScopeLists
    where
        F: FnMut(ValueId) -> ValueLoc,
    {
        let live_len = frame
            .locals
            .iter()
            .rposition(|l| l.is_some())
            .map_or(0, |i| i + 1);
        let locals = frame.locals[..live_len]
            .iter()
            .map(|l| match l {
                Some(vid) => self.to_scope_value(*vid, locate),
                // Dead locals inside the live prefix keep their index with a
                // placeholder constant.
                None => ScopeValue::ConstInt(0),
            })
            .collect();
        let stack = frame
            .stack
            .iter()
            .map(|vid| self.to_scope_value(*vid, locate))
            .collect();
        let monitors = frame
            .locks
            .iter()
            .enumerate()
            .map(|(i, vid)| MonitorValue {
                owner: self.to_scope_value(*vid, locate),
                basic_lock: Location::stack(
                    self.frame_map.to_monitor_stack_address(monitor_base + i as u32).offset,
                    LocationType::Normal,
                ),
                eliminated: false,
            })
            .collect();
        ScopeLists { locals, stack, monitors }
    }

    fn record_scopes<F>(
        &self,
        frame: &FrameState,
        locate: &mut F,
        out: &mut Vec<(FrameHeader, ScopeLists)>,
    ) -> u32
    where
        F: FnMut(ValueId) -> ValueLoc,
    {
        let monitor_base = match &frame.caller {
            Some(caller) => self.record_scopes(caller, locate, out),
            None => 0,
        };
        let header = FrameHeader { method: frame.method.0, bci: frame.bci };
        out.push((header, self.scope_values(frame, locate, monitor_base)));
        monitor_base + frame.locks.len() as u32
    }

    /// Build and attach the oop map for `info`, serialize its scope chain and
    /// register the safepoint with `recorder` at `pc_offset`.
    pub fn record_safepoint<F>(
        &self,
        pc_offset: u32,
        info: &mut CodeEmitInfo,
        locate: &mut F,
        recorder: &mut DebugInfoRecorder,
    ) where
        F: FnMut(ValueId) -> ValueLoc,
    {
        info.set_oop_map(self.build_oop_map(&info.frame, locate));
        let mut scopes = Vec::new();
        self.record_scopes(&info.frame, locate, &mut scopes);
        recorder.add_safepoint(pc_offset, &scopes, info.oop_map.as_ref().unwrap());
    }

    /// Like [DebugInfoBuilder::record_safepoint] but for out-of-line stubs,
    /// whose emit info is shared immutably; the oop map is recorded without
    /// being attached.
    pub fn record_stub_safepoint<F>(
        &self,
        pc_offset: u32,
        frame: &FrameState,
        locate: &mut F,
        recorder: &mut DebugInfoRecorder,
    ) where
        F: FnMut(ValueId) -> ValueLoc,
    {
        let map = self.build_oop_map(frame, locate);
        let mut scopes = Vec::new();
        self.record_scopes(frame, locate, &mut scopes);
        recorder.add_safepoint(pc_offset, &scopes, &map);
    }
}

/// Method and bytecode position of one scope level.
#[derive(Clone, Copy, Debug)]
pub struct FrameHeader {
    pub method: u64,
    pub bci: u32,
}

/// The three serialized value lists of one scope level.
pub struct ScopeLists {
    pub locals: Vec<ScopeValue>,
    pub stack: Vec<ScopeValue>,
    pub monitors: Vec<MonitorValue>,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        debuginfo::{testing, PcKind},
        target::{testing as target_testing, MethodRef, Reg, RegClass},
    };

    fn finalized_frame_map(monitors: u32) -> FrameMap {
        let mut fm = FrameMap::new(&target_testing::target(), &target_testing::method(), monitors);
        fm.finalize_frame(4);
        fm
    }

    #[test]
    fn oop_map_covers_registers_and_slots() {
        let target = target_testing::target();
        let fm = finalized_frame_map(0);
        let b = DebugInfoBuilder::new(&target, &fm);
        let frame = testing::frame(5, &[1, 2, 3]);
        let mut locate = |vid: ValueId| match vid.0 {
            1 => ValueLoc::Register(Reg::new(RegClass::Int, 2), LocationType::Oop),
            2 => ValueLoc::Stack(1, LocationType::Oop),
            _ => ValueLoc::ConstInt(9),
        };
        let map = b.build_oop_map(&frame, &mut locate);
        assert_eq!(map.entry_count(), 2);
    }

    #[test]
    fn non_reference_values_do_not_appear_in_oop_map() {
        let target = target_testing::target();
        let fm = finalized_frame_map(0);
        let b = DebugInfoBuilder::new(&target, &fm);
        let frame = testing::frame(0, &[1, 2]);
        let mut locate = |vid: ValueId| match vid.0 {
            1 => ValueLoc::Register(Reg::new(RegClass::Float, 0), LocationType::Dbl),
            _ => ValueLoc::Stack(0, LocationType::Normal),
        };
        assert_eq!(b.build_oop_map(&frame, &mut locate).entry_count(), 0);
    }

    #[test]
    fn held_monitors_mark_their_object_word() {
        let target = target_testing::target();
        let fm = finalized_frame_map(1);
        let b = DebugInfoBuilder::new(&target, &fm);
        let mut frame = Arc::try_unwrap(testing::frame(0, &[])).unwrap();
        frame.locks.push(ValueId(1));
        let mut locate = |_| ValueLoc::Stack(0, LocationType::Oop);
        let map = b.build_oop_map(&frame, &mut locate);
        // One entry for the lock owner's slot, one for the monitor record.
        assert_eq!(map.entry_count(), 2);
    }

    #[test]
    fn inlined_frames_number_monitors_cumulatively() {
        let target = target_testing::target();
        let fm = finalized_frame_map(2);
        let b = DebugInfoBuilder::new(&target, &fm);
        let mut outer = Arc::try_unwrap(testing::frame(1, &[])).unwrap();
        outer.locks.push(ValueId(1));
        let inner = FrameState {
            method: MethodRef(50),
            bci: 2,
            locals: Vec::new(),
            stack: Vec::new(),
            locks: vec![ValueId(2)],
            caller: Some(Arc::new(outer)),
        };
        let mut locate = |vid: ValueId| ValueLoc::ConstObject(u64::from(vid.0));

        // Each held lock owns a distinct record: one object word per frame,
        // never a collision on record zero.
        let map = b.build_oop_map(&inner, &mut locate);
        assert_eq!(map.entry_count(), 2);

        let mut out = Vec::new();
        b.record_scopes(&inner, &mut locate, &mut out);
        let outer_lock = out[0].1.monitors[0].basic_lock;
        let inner_lock = out[1].1.monitors[0].basic_lock;
        assert_ne!(outer_lock, inner_lock);
        // The caller's monitor takes the lower record; the inlined callee's
        // sits above it.
        assert_eq!(
            outer_lock,
            Location::stack(fm.to_monitor_stack_address(0).offset, LocationType::Normal)
        );
        assert_eq!(
            inner_lock,
            Location::stack(fm.to_monitor_stack_address(1).offset, LocationType::Normal)
        );
    }

    #[test]
    fn trailing_dead_locals_are_trimmed() {
        let target = target_testing::target();
        let fm = finalized_frame_map(0);
        let b = DebugInfoBuilder::new(&target, &fm);
        let frame = FrameState {
            method: MethodRef(1),
            bci: 0,
            locals: vec![Some(ValueId(1)), None, Some(ValueId(2)), None, None],
            stack: Vec::new(),
            locks: Vec::new(),
            caller: None,
        };
        let mut locate = |_| ValueLoc::ConstInt(1);
        let lists = b.scope_values(&frame, &mut locate, 0);
        // The two trailing dead locals vanish; the interior one is kept as a
        // placeholder so indices stay aligned.
        assert_eq!(lists.locals.len(), 3);
        assert_eq!(lists.locals[1], ScopeValue::ConstInt(0));
    }

    #[test]
    fn scope_chain_is_recorded_outermost_first() {
        let target = target_testing::target();
        let fm = finalized_frame_map(0);
        let b = DebugInfoBuilder::new(&target, &fm);
        let outer = testing::frame(10, &[]);
        let inner = FrameState {
            method: MethodRef(99),
            bci: 3,
            locals: Vec::new(),
            stack: Vec::new(),
            locks: Vec::new(),
            caller: Some(outer),
        };
        let mut out = Vec::new();
        let mut locate = |_| ValueLoc::ConstInt(0);
        b.record_scopes(&inner, &mut locate, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0.bci, 10);
        assert_eq!(out[1].0.method, 99);
    }

    #[test]
    fn safepoint_lands_in_recorder() {
        let target = target_testing::target();
        let fm = finalized_frame_map(0);
        let b = DebugInfoBuilder::new(&target, &fm);
        let mut info = CodeEmitInfo::new(testing::frame(7, &[1]), None);
        let mut recorder = DebugInfoRecorder::new();
        let mut locate = |_| ValueLoc::Register(Reg::new(RegClass::Int, 0), LocationType::Oop);
        b.record_safepoint(0x40, &mut info, &mut locate, &mut recorder);
        assert!(info.oop_map.is_some());
        let (pcs, _, _) = recorder.into_tables();
        assert_eq!(pcs.len(), 1);
        assert_eq!(pcs[0].pc_offset, 0x40);
        assert_eq!(pcs[0].kind, PcKind::Safepoint);
    }
}
