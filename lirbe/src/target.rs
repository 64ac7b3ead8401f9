//! Read-only target and method description services.
//!
//! Everything in here is immutable for the lifetime of a compilation and may be
//! shared freely across concurrent compilations. The actual instruction encoder
//! lives behind [crate::asm::TargetEmitter]; this module only carries the facts
//! the target-independent core needs: word size, stack alignment, the register
//! set, and the register-to-reference-map-index table used when recording oop
//! maps.

use std::fmt;

use crate::lir::{Scale, ValueKind};

/// A physical register, packed into 16 bits: the low 6 bits are the hardware
/// encoding, the next 2 bits the [RegClass]. Virtual registers never appear
/// here; they are [crate::lir::Operand::Var]s until the allocator resolves
/// them.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg(u16);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegClass {
    Int = 0,
    Float = 1,
}

impl Reg {
    pub const fn new(class: RegClass, num: u8) -> Self {
        assert!(num < 64);
        Reg(((class as u16) << 6) | num as u16)
    }

    /// The hardware encoding within the register's class.
    pub fn num(self) -> u8 {
        (self.0 & 0x3f) as u8
    }

    pub fn class(self) -> RegClass {
        match (self.0 >> 6) & 0x3 {
            0 => RegClass::Int,
            1 => RegClass::Float,
            _ => unreachable!(),
        }
    }

    /// A dense index across all classes, suitable for table lookups.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Debug for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class() {
            RegClass::Int => write!(f, "r{}", self.num()),
            RegClass::Float => write!(f, "f{}", self.num()),
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An opaque handle to a VM heap object (e.g. a constant `String` or a class
/// mirror). The backend never dereferences these; they flow through constants
/// and scope values back to the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef(pub u64);

/// An opaque handle to a resolved class, used by type checks and the exception
/// handler table (`None` catch type means catch-all).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClassRef(pub u64);

/// An opaque handle to a resolved method, used by call instructions and debug
/// info scopes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef(pub u64);

/// The target description consulted by the frame layout planner, the debug-info
/// builder and the assembler driver. One instance per target, shared read-only.
#[derive(Debug)]
pub struct TargetDesc {
    /// Word size in bytes.
    pub word_size: u32,
    /// Required stack frame alignment in bytes.
    pub stack_align: u32,
    /// Size of one monitor (lock record) in words.
    pub monitor_size_in_words: u32,
    /// Whether call sites must be aligned so they can be patched atomically
    /// (true on multiprocessor targets).
    pub align_calls: bool,
    /// For each [Reg::index], the index of that register in per-safepoint
    /// register reference maps, or `None` if the register can never hold an
    /// object reference (e.g. float registers).
    ref_map_indices: Vec<Option<u16>>,
    /// Number of register numbers in the oop-map name space; stack slots are
    /// numbered starting here. See [crate::debuginfo::OopMap].
    pub oop_map_reg_count: u16,
}

impl TargetDesc {
    pub fn new(
        word_size: u32,
        stack_align: u32,
        monitor_size_in_words: u32,
        align_calls: bool,
        ref_map_indices: Vec<Option<u16>>,
        oop_map_reg_count: u16,
    ) -> Self {
        assert!(word_size.is_power_of_two() && stack_align.is_power_of_two());
        Self {
            word_size,
            stack_align,
            monitor_size_in_words,
            align_calls,
            ref_map_indices,
            oop_map_reg_count,
        }
    }

    /// The index of `reg` in register reference maps.
    ///
    /// # Panics
    ///
    /// Panics if `reg` cannot legally hold an object reference: observing an
    /// oop in such a register means the lowering phase or the allocator is
    /// broken.
    pub fn ref_map_index(&self, reg: Reg) -> u16 {
        match self.ref_map_indices.get(reg.index()).copied().flatten() {
            Some(i) => i,
            None => panic!("register {reg} cannot hold an object reference"),
        }
    }

    /// The default address scale for indexing an array of `kind` elements.
    pub fn scale_for(&self, kind: ValueKind) -> Scale {
        Scale::for_element_size(kind.size_in_bytes(self.word_size))
    }
}

/// The slice of method metadata this core needs: enough to size the incoming
/// argument convention and to name scopes in debug info.
#[derive(Clone, Debug)]
pub struct MethodDesc {
    pub method: MethodRef,
    pub is_static: bool,
    /// Number of explicit incoming argument slots (longs/doubles take two);
    /// the receiver of a non-static method is not counted here.
    pub arg_slots: u32,
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A small fictional target: 8-byte words, 16-byte stack alignment, 8 int
    /// registers (all oop-capable) and 8 float registers (none oop-capable).
    pub(crate) fn target() -> TargetDesc {
        let mut ref_map = vec![None; 128];
        for i in 0..8u16 {
            ref_map[Reg::new(RegClass::Int, i as u8).index()] = Some(i);
        }
        TargetDesc::new(8, 16, 2, true, ref_map, 8)
    }

    pub(crate) fn method() -> MethodDesc {
        MethodDesc {
            method: MethodRef(0x1234),
            is_static: true,
            arg_slots: 2,
        }
    }
}
