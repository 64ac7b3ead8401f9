//! The LIR: machine-near instructions over virtual registers.
//!
//! A method arrives at this backend as an ordered list of [Block]s in layout
//! order, each carrying a list of [LirInst]s produced by the (external)
//! lowering phase and already processed by the (external) register allocator.
//! This module defines the operand model ([operand]), the closed instruction
//! set ([inst]), the allocator-facing operand-role protocol ([visit]) and the
//! out-of-line slow-path stubs ([stubs]).

pub mod inst;
pub mod operand;
pub mod stubs;
pub mod visit;

pub use inst::{Inst, InstT, LirInst};
pub use operand::{Address, Constant, Operand, Scale, ValueKind, VarIdx};

use std::fmt::Write as _;

index_vec::define_index_type! {
    /// A code label. Binding (label -> machine code offset) is owned by the
    /// assembler driver; LIR and stubs only carry indices.
    pub struct LabelIdx = u32;
}

/// Hands out method-unique [LabelIdx]s. The lowering phase allocates labels
/// for blocks and stubs from one of these and passes the final count to the
/// assembler so it can size its binding table.
#[derive(Debug, Default)]
pub struct LabelAlloc {
    next: u32,
}

impl LabelAlloc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> LabelIdx {
        let l = LabelIdx::from_usize(self.next as usize);
        self.next += 1;
        l
    }

    pub fn count(&self) -> usize {
        self.next as usize
    }
}

/// Per-block flags the assembler driver acts on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockFlags {
    /// Block is the entry of an exception handler: its code offset must be
    /// recorded for the exception handler table.
    pub exception_entry: bool,
    /// Block is the target of a backward branch: the driver may align its
    /// entry.
    pub backward_branch_target: bool,
}

/// One basic block in layout order. The label is bound to the block's first
/// emitted byte.
#[derive(Debug)]
pub struct Block {
    pub label: LabelIdx,
    pub flags: BlockFlags,
    pub insts: Vec<LirInst>,
}

impl Block {
    pub fn new(label: LabelIdx) -> Self {
        Self {
            label,
            flags: BlockFlags::default(),
            insts: Vec::new(),
        }
    }
}

/// Render a whole block list, one instruction per line. This is what the
/// `LIRBE_LOG_IR` dumps print.
pub fn print_lir(blocks: &[Block]) -> String {
    let mut out = String::new();
    for (i, b) in blocks.iter().enumerate() {
        let mut flags = String::new();
        if b.flags.exception_entry {
            flags.push_str(" [ex]");
        }
        if b.flags.backward_branch_target {
            flags.push_str(" [bbt]");
        }
        writeln!(out, "B{i} (L{}){flags}:", usize::from(b.label)).ok();
        for inst in &b.insts {
            writeln!(out, "  {inst}").ok();
        }
    }
    out
}
