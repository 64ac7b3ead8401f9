//! Oop maps: which locations hold object references at a safepoint.
//!
//! Each entry is a 16-bit [OopMapValue] packing a 5-bit type mask and an
//! 11-bit location number. Location numbers name registers first (using the
//! target's oop-map register numbering, `0..reg_count`) and then frame slots
//! (`reg_count + slot`, with incoming argument slots following the frame's
//! own). Callee-saved and derived entries carry one extra location naming the
//! content register.

use lirpack::{CompressedReadStream, CompressedWriteStream};
use static_assertions::const_assert;
use vob::Vob;

/// Type bits of an [OopMapValue].
pub mod flags {
    pub const OOP: u16 = 1;
    pub const VALUE: u16 = 2;
    pub const NARROW_OOP: u16 = 4;
    pub const CALLEE_SAVED: u16 = 8;
    pub const DERIVED_OOP: u16 = 16;
}

const TYPE_BITS: u32 = 5;
const LOCATION_BITS: u32 = 11;
const TYPE_MASK: u16 = (1 << TYPE_BITS) - 1;
const MAX_LOCATION: u32 = (1 << LOCATION_BITS) - 1;

// The packed form must fit its carrier exactly.
const_assert!(TYPE_BITS + LOCATION_BITS == 16);
const_assert!(flags::DERIVED_OOP < (1 << TYPE_BITS));

/// A location within the unified register-then-stack numbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapLocation {
    Register(u16),
    /// A frame slot index; incoming arguments continue past the frame's own
    /// slots.
    Stack(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OopMapValue {
    bits: u16,
    /// Content location for callee-saved and derived entries.
    content: Option<u16>,
}

impl OopMapValue {
    fn new(location: u32, type_bits: u16, content: Option<u16>) -> Self {
        assert!(location <= MAX_LOCATION, "oop map location {location} too large");
        Self { bits: ((location as u16) << TYPE_BITS) | type_bits, content }
    }

    pub fn location(&self) -> u32 {
        u32::from(self.bits >> TYPE_BITS)
    }

    pub fn type_bits(&self) -> u16 {
        self.bits & TYPE_MASK
    }

    pub fn is_oop(&self) -> bool {
        self.type_bits() & flags::OOP != 0
    }

    pub fn is_narrow_oop(&self) -> bool {
        self.type_bits() & flags::NARROW_OOP != 0
    }

    pub fn content_location(&self) -> Option<u16> {
        self.content
    }

    fn write(&self, w: &mut CompressedWriteStream) {
        w.write_int(u32::from(self.bits));
        if let Some(c) = self.content {
            w.write_int(u32::from(c));
        }
    }

    fn read(r: &mut CompressedReadStream) -> Self {
        let bits = r.read_int() as u16;
        let content =
            if bits & (flags::CALLEE_SAVED | flags::DERIVED_OOP) != 0 { Some(r.read_int() as u16) } else { None };
        Self { bits, content }
    }
}

/// The oop map of one safepoint, under construction. Inserting the same
/// location twice is a bug in the debug-info builder and panics.
#[derive(Clone, Debug)]
pub struct OopMap {
    reg_count: u16,
    frame_slots: u32,
    arg_count: u32,
    used: Vob,
    entries: Vec<OopMapValue>,
}

impl OopMap {
    pub fn new(reg_count: u16, frame_slots: u32, arg_count: u32) -> Self {
        let size = u32::from(reg_count) + frame_slots + arg_count;
        Self {
            reg_count,
            frame_slots,
            arg_count,
            used: Vob::from_elem(false, size as usize),
            entries: Vec::new(),
        }
    }

    fn number(&self, loc: MapLocation) -> u32 {
        match loc {
            MapLocation::Register(r) => {
                assert!(r < self.reg_count, "register {r} outside oop map numbering");
                u32::from(r)
            }
            MapLocation::Stack(slot) => {
                assert!(
                    slot < self.frame_slots + self.arg_count,
                    "frame slot {slot} outside frame of {} slots",
                    self.frame_slots + self.arg_count
                );
                u32::from(self.reg_count) + slot
            }
        }
    }

    fn insert(&mut self, loc: MapLocation, type_bits: u16, content: Option<u16>) {
        let n = self.number(loc);
        assert!(
            !self.used.get(n as usize).unwrap(),
            "location {loc:?} recorded twice in one oop map"
        );
        self.used.set(n as usize, true);
        self.entries.push(OopMapValue::new(n, type_bits, content));
    }

    pub fn set_oop(&mut self, loc: MapLocation) {
        self.insert(loc, flags::OOP, None);
    }

    pub fn set_narrow_oop(&mut self, loc: MapLocation) {
        self.insert(loc, flags::NARROW_OOP, None);
    }

    pub fn set_value(&mut self, loc: MapLocation) {
        self.insert(loc, flags::VALUE, None);
    }

    pub fn set_callee_saved(&mut self, loc: MapLocation, content_reg: u16) {
        self.insert(loc, flags::CALLEE_SAVED, Some(content_reg));
    }

    pub fn set_derived_oop(&mut self, loc: MapLocation, base_loc: u16) {
        self.insert(loc, flags::DERIVED_OOP, Some(base_loc));
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn write_to(&self, w: &mut CompressedWriteStream) {
        w.write_int(self.entries.len() as u32);
        for e in &self.entries {
            e.write(w);
        }
    }
}

/// Reads the entries of one serialized oop map back out.
pub struct OopMapStream<'a, 'b> {
    stream: &'a mut CompressedReadStream<'b>,
    remaining: u32,
}

impl<'a, 'b> OopMapStream<'a, 'b> {
    pub fn new(stream: &'a mut CompressedReadStream<'b>) -> Self {
        let remaining = stream.read_int();
        Self { stream, remaining }
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    pub fn next(&mut self) -> OopMapValue {
        assert!(self.remaining > 0, "oop map stream exhausted");
        self.remaining -= 1;
        OopMapValue::read(self.stream)
    }
}
