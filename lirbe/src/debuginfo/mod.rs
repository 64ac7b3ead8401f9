//! Debug-info side tables: the per-instruction frame snapshots lowering
//! attaches to LIR, and the machinery that serializes them (plus oop maps)
//! into the compact streams carried by a [CompiledCode](crate::artifact::CompiledCode).

use std::sync::Arc;

use crate::target::{ClassRef, MethodRef, Reg};

pub mod builder;
pub mod oop_map;
pub mod recorder;
pub mod scope_value;

pub use builder::DebugInfoBuilder;
pub use oop_map::{OopMap, OopMapStream, OopMapValue};
pub use recorder::{DebugInfoRecorder, PcDesc, PcKind};
pub use scope_value::{Location, LocationType, MonitorValue, ScopeValue, WhereKind};

/// Names an abstract value in the frontend's value numbering; the register
/// allocator answers where each one lives at a given point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

/// Where the allocator says a [ValueId] lives when a frame snapshot is
/// serialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueLoc {
    /// In a register, with the location type describing how to interpret it.
    Register(Reg, LocationType),
    /// In a stack slot, using the same slot indices as stack operands
    /// (negative for incoming arguments).
    Stack(i32, LocationType),
    /// A compile-time constant int.
    ConstInt(i32),
    /// A compile-time constant long.
    ConstLong(i64),
    /// A compile-time constant object reference.
    ConstObject(u64),
}

/// One level of the (possibly inlined) interpreter frame at a point where
/// execution can be observed: a method, a bytecode index, and the abstract
/// values of locals, operand stack, and held locks. Shared immutably between
/// all instructions that observe the same state.
#[derive(Debug)]
pub struct FrameState {
    pub method: MethodRef,
    pub bci: u32,
    /// `None` entries are dead locals.
    pub locals: Vec<Option<ValueId>>,
    pub stack: Vec<ValueId>,
    pub locks: Vec<ValueId>,
    /// The next-outer inlined frame, if any.
    pub caller: Option<Arc<FrameState>>,
}

impl FrameState {
    /// Depth of the inline chain, innermost frame included.
    pub fn depth(&self) -> usize {
        1 + self.caller.as_ref().map_or(0, |c| c.depth())
    }
}

/// A bytecode-range exception handler attached to an instruction that can
/// throw. The handler lists are built once per frame state and shared, never
/// deep-copied per instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_bci: u32,
    pub end_bci: u32,
    pub handler_bci: u32,
    /// `None` catches everything.
    pub catch_type: Option<ClassRef>,
}

/// Everything the assembler needs to record debug info for one emitted
/// instruction: the frame snapshot, the handlers covering it, and the oop map
/// filled in by the debug-info builder.
#[derive(Clone, Debug)]
pub struct CodeEmitInfo {
    pub frame: Arc<FrameState>,
    pub exception_handlers: Option<Arc<[ExceptionHandler]>>,
    pub oop_map: Option<OopMap>,
}

impl CodeEmitInfo {
    pub fn new(frame: Arc<FrameState>, exception_handlers: Option<Arc<[ExceptionHandler]>>) -> Self {
        Self { frame, exception_handlers, oop_map: None }
    }

    /// # Panics
    ///
    /// Panics if an oop map was already attached.
    pub fn set_oop_map(&mut self, map: OopMap) {
        assert!(self.oop_map.is_none(), "oop map attached twice");
        self.oop_map = Some(map);
    }
}
