//! A target-independent compiler backend core: LIR over virtual registers,
//! the operand-role protocol a register allocator programs against, a frame
//! layout planner, an assembler driver with out-of-line slow-path stubs, and
//! the compressed debug-info side tables (scope values and oop maps) the
//! runtime consumes for stack walking and deoptimization.
//!
//! The pipeline, in the order a method moves through it:
//!
//!  1. An external lowering phase builds [lir::Block]s of [lir::LirInst]s
//!     over virtual registers and reserves frame space via
//!     [framemap::FrameMap].
//!  2. An external register allocator queries each instruction's operand
//!     roles through [lir::visit], rewrites operands in place, and fixes the
//!     spill area with [framemap::FrameMap::finalize_frame].
//!  3. [asm::LirAssembler] walks the blocks, drives a [asm::TargetEmitter],
//!     and produces an [artifact::CompiledCode] with machine code, pc
//!     records, call sites, exception table and the compressed streams.
//!
//! Compression lives in the separate `lirpack` crate; everything here writes
//! through its streams.

pub mod artifact;
pub mod asm;
pub mod debuginfo;
pub mod error;
pub mod framemap;
pub mod lir;
pub mod log;
pub mod target;

pub use error::CompileError;
