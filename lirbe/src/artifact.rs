//! The finished product of a backend run: machine code plus every side table
//! the runtime needs to install, patch, unwind and deoptimize it.

use crate::{
    debuginfo::recorder::PcDesc,
    lir::inst::CallKind,
    target::{ClassRef, MethodRef},
};

/// A call instruction's location in the emitted code, for later patching
/// (e.g. inline-cache transitions). `return_offset` is the pc of the
/// instruction after the call, which is also the pc its safepoint record is
/// keyed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallSite {
    pub offset: u32,
    pub return_offset: u32,
    pub kind: CallKind,
    pub method: MethodRef,
}

/// One row of the exception handler table, fully resolved: bytecode range,
/// catch type, and the code offset of the handler's entry block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_bci: u32,
    pub end_bci: u32,
    pub handler_bci: u32,
    /// `None` catches everything.
    pub catch_type: Option<ClassRef>,
    pub handler_pc_offset: u32,
}

/// Frame facts the runtime's stack walker needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// Total frame size in bytes.
    pub frame_size: u32,
    /// Number of locations in this method's reference maps (registers plus
    /// stack slots); sizes the bitmaps a collector allocates per safepoint.
    pub ref_map_size: u32,
    pub monitor_count: u32,
}

#[derive(Debug)]
pub struct CompiledCode {
    pub code: Vec<u8>,
    pub frame: FrameDescriptor,
    pub pc_descs: Vec<PcDesc>,
    pub call_sites: Vec<CallSite>,
    /// Compressed scope descriptions; [PcDesc::scope_offset] indexes here.
    pub scopes: Vec<u8>,
    /// Compressed oop maps; [PcDesc::oop_map_offset] indexes here.
    pub oop_maps: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
}

impl CompiledCode {
    /// The pc descriptor covering `pc_offset`, if one was recorded there.
    pub fn pc_desc_at(&self, pc_offset: u32) -> Option<&PcDesc> {
        self.pc_descs.iter().find(|p| p.pc_offset == pc_offset)
    }

    pub fn code_size(&self) -> usize {
        self.code.len()
    }
}
