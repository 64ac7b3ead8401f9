//! The assembler driver: walks allocated LIR in block layout order, calls the
//! target's per-opcode emit hooks, binds labels, accumulates detached slow
//! path stubs for out-of-line emission, and records debug info at every pc
//! where the runtime may observe the frame.
//!
//! The driver is deliberately target-blind. Everything byte-level lives
//! behind [TargetEmitter]; the driver owns sequencing and the side tables.
//! One [LirAssembler] emits exactly one method and is consumed doing so.
//!
//! Error handling is two-tier: running out of code buffer space is a
//! recoverable [CompileError::Bailout] (the caller retries with a bigger
//! buffer or gives up on compiling the method), while structural breakage
//! (an unbound label, a doubly bound label, a doubly inserted oop map entry)
//! panics, because retrying cannot fix a broken lowering phase.

use std::sync::Arc;

use crate::{
    artifact::{CallSite, CompiledCode, ExceptionTableEntry, FrameDescriptor},
    debuginfo::{builder::DebugInfoBuilder, recorder::DebugInfoRecorder, ExceptionHandler, FrameState, ValueId, ValueLoc},
    error::CompileError,
    framemap::FrameMap,
    lir::{
        inst::{
            Abs, Add, And, ArrayCopy, Branch, Breakpoint, Call, CallKind, Cmove, Cmp,
            CompareAndSwap, Convert, Div, Idiv, InstT, Irem, Lea, Lock, Membar, Move, Mul, Neg,
            NullCheck, Or, Rem, Return, Safepoint, Shl, Shr, Snippet, Sqrt, Sub, Trig, TypeCheck,
            Ushr, Xor,
        },
        stubs::{CodeStub, CodeStubT},
        print_lir, Block, Inst, LabelIdx,
    },
    log::{log_ir, should_log_ir, IRPhase, Log, Verbosity},
    target::TargetDesc,
};

/// A fixed-capacity code buffer. Running off the end is reported as a
/// [CompileError::Bailout], never grown silently: the capacity was chosen by
/// the caller as the compilation's budget.
#[derive(Debug)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
    capacity: usize,
}

impl CodeBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { bytes: Vec::with_capacity(capacity), capacity }
    }

    pub fn position(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn push_bytes(&mut self, bs: &[u8]) -> Result<(), CompileError> {
        if self.bytes.len() + bs.len() > self.capacity {
            return Err(CompileError::Bailout(format!(
                "code buffer exhausted at {} bytes",
                self.capacity
            )));
        }
        self.bytes.extend_from_slice(bs);
        Ok(())
    }

    /// Pad with `fill` bytes until the position is a multiple of `align`.
    pub fn align_to(&mut self, align: u32, fill: u8) -> Result<(), CompileError> {
        debug_assert!(align.is_power_of_two());
        while self.position() % align != 0 {
            self.push_bytes(&[fill])?;
        }
        Ok(())
    }

    /// Overwrite four already emitted bytes, little-endian.
    ///
    /// # Panics
    ///
    /// Panics if the range was never emitted.
    pub fn patch_u32(&mut self, at: u32, value: u32) {
        let at = at as usize;
        assert!(at + 4 <= self.bytes.len(), "patch at {at} outside emitted code");
        self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[derive(Clone, Copy, Debug)]
enum FixupKind {
    /// 32-bit pc-relative displacement, relative to the end of the field.
    Rel32,
    /// 32-bit absolute code offset.
    Abs32,
}

#[derive(Clone, Copy, Debug)]
struct Fixup {
    at: u32,
    label: LabelIdx,
    kind: FixupKind,
}

/// Label-to-offset binding plus the forward references waiting on it.
/// Binding a label twice, or finishing with one unbound, is fatal.
#[derive(Debug)]
pub struct LabelTable {
    offsets: Vec<Option<u32>>,
    fixups: Vec<Fixup>,
}

impl LabelTable {
    pub fn new(label_count: usize) -> Self {
        Self { offsets: vec![None; label_count], fixups: Vec::new() }
    }

    pub fn bind(&mut self, label: LabelIdx, offset: u32) {
        let slot = &mut self.offsets[usize::from(label)];
        assert!(slot.is_none(), "label L{} bound twice", usize::from(label));
        *slot = Some(offset);
    }

    pub fn offset(&self, label: LabelIdx) -> Option<u32> {
        self.offsets[usize::from(label)]
    }

    fn resolve(&self, label: LabelIdx) -> u32 {
        match self.offset(label) {
            Some(o) => o,
            None => panic!("label L{} never bound", usize::from(label)),
        }
    }

    /// Patch every recorded fixup. All referenced labels must be bound.
    fn apply_fixups(&mut self, buf: &mut CodeBuffer) {
        for f in self.fixups.drain(..) {
            let target = match self.offsets[usize::from(f.label)] {
                Some(o) => o,
                None => panic!("label L{} never bound", usize::from(f.label)),
            };
            let value = match f.kind {
                FixupKind::Rel32 => (target as i64 - (f.at as i64 + 4)) as u32,
                FixupKind::Abs32 => target,
            };
            buf.patch_u32(f.at, value);
        }
    }
}

/// What an emit hook sees: the buffer to append to and the label table for
/// emitting label references.
pub struct EmitCtx<'a> {
    pub buf: &'a mut CodeBuffer,
    pub labels: &'a mut LabelTable,
}

impl EmitCtx<'_> {
    /// Emit a 32-bit pc-relative reference to `label`, patched once the label
    /// is bound.
    pub fn emit_rel32(&mut self, label: LabelIdx) -> Result<(), CompileError> {
        let at = self.buf.position();
        self.labels.fixups.push(Fixup { at, label, kind: FixupKind::Rel32 });
        self.buf.push_bytes(&[0; 4])
    }

    /// Emit a 32-bit absolute code offset of `label`.
    pub fn emit_abs32(&mut self, label: LabelIdx) -> Result<(), CompileError> {
        let at = self.buf.position();
        self.labels.fixups.push(Fixup { at, label, kind: FixupKind::Abs32 });
        self.buf.push_bytes(&[0; 4])
    }
}

/// The byte-level side of the assembler: one hook per instruction kind, plus
/// frame entry/exit and out-of-line stub bodies. Hooks append to
/// `cx.buf` and may emit label references through `cx`; every hook reports
/// buffer exhaustion by propagating the error from the
/// [CodeBuffer::push_bytes] that hit the limit.
#[allow(unused_variables)]
pub trait TargetEmitter {
    /// Alignment applied to blocks that are backward branch targets.
    fn block_align(&self) -> u32 {
        1
    }

    /// Alignment applied to patchable call sites when the target requires it.
    fn call_align(&self) -> u32 {
        1
    }

    /// Filler byte for alignment padding (a single-byte nop).
    fn pad_byte(&self) -> u8 {
        0
    }

    fn emit_prologue(&mut self, cx: &mut EmitCtx<'_>, frame_size: u32) -> Result<(), CompileError>;
    fn emit_epilogue(&mut self, cx: &mut EmitCtx<'_>, frame_size: u32) -> Result<(), CompileError>;

    fn emit_membar(&mut self, cx: &mut EmitCtx<'_>, inst: &Membar) -> Result<(), CompileError>;
    fn emit_breakpoint(&mut self, cx: &mut EmitCtx<'_>, inst: &Breakpoint) -> Result<(), CompileError>;
    fn emit_safepoint(&mut self, cx: &mut EmitCtx<'_>, inst: &Safepoint) -> Result<(), CompileError>;
    fn emit_move(&mut self, cx: &mut EmitCtx<'_>, inst: &Move) -> Result<(), CompileError>;
    fn emit_lea(&mut self, cx: &mut EmitCtx<'_>, inst: &Lea) -> Result<(), CompileError>;
    fn emit_return(&mut self, cx: &mut EmitCtx<'_>, inst: &Return) -> Result<(), CompileError>;
    fn emit_neg(&mut self, cx: &mut EmitCtx<'_>, inst: &Neg) -> Result<(), CompileError>;
    fn emit_abs(&mut self, cx: &mut EmitCtx<'_>, inst: &Abs) -> Result<(), CompileError>;
    fn emit_sqrt(&mut self, cx: &mut EmitCtx<'_>, inst: &Sqrt) -> Result<(), CompileError>;
    fn emit_trig(&mut self, cx: &mut EmitCtx<'_>, inst: &Trig) -> Result<(), CompileError>;
    fn emit_convert(&mut self, cx: &mut EmitCtx<'_>, inst: &Convert) -> Result<(), CompileError>;
    fn emit_null_check(&mut self, cx: &mut EmitCtx<'_>, inst: &NullCheck) -> Result<(), CompileError>;
    fn emit_add(&mut self, cx: &mut EmitCtx<'_>, inst: &Add) -> Result<(), CompileError>;
    fn emit_sub(&mut self, cx: &mut EmitCtx<'_>, inst: &Sub) -> Result<(), CompileError>;
    fn emit_mul(&mut self, cx: &mut EmitCtx<'_>, inst: &Mul) -> Result<(), CompileError>;
    fn emit_div(&mut self, cx: &mut EmitCtx<'_>, inst: &Div) -> Result<(), CompileError>;
    fn emit_rem(&mut self, cx: &mut EmitCtx<'_>, inst: &Rem) -> Result<(), CompileError>;
    fn emit_idiv(&mut self, cx: &mut EmitCtx<'_>, inst: &Idiv) -> Result<(), CompileError>;
    fn emit_irem(&mut self, cx: &mut EmitCtx<'_>, inst: &Irem) -> Result<(), CompileError>;
    fn emit_shl(&mut self, cx: &mut EmitCtx<'_>, inst: &Shl) -> Result<(), CompileError>;
    fn emit_shr(&mut self, cx: &mut EmitCtx<'_>, inst: &Shr) -> Result<(), CompileError>;
    fn emit_ushr(&mut self, cx: &mut EmitCtx<'_>, inst: &Ushr) -> Result<(), CompileError>;
    fn emit_and(&mut self, cx: &mut EmitCtx<'_>, inst: &And) -> Result<(), CompileError>;
    fn emit_or(&mut self, cx: &mut EmitCtx<'_>, inst: &Or) -> Result<(), CompileError>;
    fn emit_xor(&mut self, cx: &mut EmitCtx<'_>, inst: &Xor) -> Result<(), CompileError>;
    fn emit_cmp(&mut self, cx: &mut EmitCtx<'_>, inst: &Cmp) -> Result<(), CompileError>;
    fn emit_cmove(&mut self, cx: &mut EmitCtx<'_>, inst: &Cmove) -> Result<(), CompileError>;
    fn emit_branch(&mut self, cx: &mut EmitCtx<'_>, inst: &Branch) -> Result<(), CompileError>;
    fn emit_call_static(&mut self, cx: &mut EmitCtx<'_>, inst: &Call) -> Result<(), CompileError>;
    fn emit_call_optimized_virtual(&mut self, cx: &mut EmitCtx<'_>, inst: &Call) -> Result<(), CompileError>;
    fn emit_call_ic_virtual(&mut self, cx: &mut EmitCtx<'_>, inst: &Call) -> Result<(), CompileError>;
    fn emit_call_vtable(&mut self, cx: &mut EmitCtx<'_>, inst: &Call, index: u32) -> Result<(), CompileError>;
    fn emit_type_check(&mut self, cx: &mut EmitCtx<'_>, inst: &TypeCheck) -> Result<(), CompileError>;
    fn emit_lock(&mut self, cx: &mut EmitCtx<'_>, inst: &Lock) -> Result<(), CompileError>;
    fn emit_array_copy(&mut self, cx: &mut EmitCtx<'_>, inst: &ArrayCopy) -> Result<(), CompileError>;
    fn emit_compare_and_swap(&mut self, cx: &mut EmitCtx<'_>, inst: &CompareAndSwap) -> Result<(), CompileError>;
    fn emit_snippet(&mut self, cx: &mut EmitCtx<'_>, inst: &Snippet) -> Result<(), CompileError>;

    /// Emit the body of one out-of-line stub. The driver binds the stub's
    /// entry label just before calling this.
    fn emit_stub(&mut self, cx: &mut EmitCtx<'_>, stub: &CodeStub) -> Result<(), CompileError>;
}

/// Pairs an exception handler with the label of the block that implements it.
/// The driver resolves the label once all code is emitted.
#[derive(Clone, Debug)]
pub struct HandlerSpec {
    pub handler: ExceptionHandler,
    pub entry: LabelIdx,
}

pub struct LirAssembler<'a, E> {
    target: &'a TargetDesc,
    frame_map: &'a FrameMap,
    log: &'a Log,
    emitter: E,
    buf: CodeBuffer,
    labels: LabelTable,
    recorder: DebugInfoRecorder,
    /// Stubs detached from instructions during the block walk, emitted after
    /// the last block.
    stubs: Vec<Box<CodeStub>>,
    call_sites: Vec<CallSite>,
    /// Labels of blocks flagged as exception handler entries.
    handler_entries: Vec<LabelIdx>,
    /// A position record not yet written: it is dropped if a safepoint lands
    /// on the same pc, flushed the moment a later pc gets recorded.
    pending_non_safepoint: Option<(u32, Arc<FrameState>)>,
    last_position: Option<(u64, u32)>,
}

impl<'a, E: TargetEmitter> LirAssembler<'a, E> {
    pub fn new(
        target: &'a TargetDesc,
        frame_map: &'a FrameMap,
        log: &'a Log,
        emitter: E,
        label_count: usize,
        code_capacity: usize,
    ) -> Self {
        Self {
            target,
            frame_map,
            log,
            emitter,
            buf: CodeBuffer::new(code_capacity),
            labels: LabelTable::new(label_count),
            recorder: DebugInfoRecorder::new(),
            stubs: Vec::new(),
            call_sites: Vec::new(),
            handler_entries: Vec::new(),
            pending_non_safepoint: None,
            last_position: None,
        }
    }

    fn flush_pending(&mut self, upto: u32) {
        if let Some((pc, frame)) = self.pending_non_safepoint.take() {
            if pc < upto {
                self.recorder.add_non_safepoint(pc, &frame);
            }
            // A record at the same pc subsumes the position.
        }
    }

    fn record_safepoint_at<F>(
        &mut self,
        pc: u32,
        inst: &mut Inst,
        locate: &mut F,
    ) where
        F: FnMut(ValueId) -> ValueLoc,
    {
        self.flush_pending(pc);
        let builder = DebugInfoBuilder::new(self.target, self.frame_map);
        let info = inst.info_mut().unwrap();
        builder.record_safepoint(pc, info, locate, &mut self.recorder);
    }

    fn emit_inst<F>(&mut self, inst: &mut Inst, frame_size: u32, locate: &mut F) -> Result<(), CompileError>
    where
        F: FnMut(ValueId) -> ValueLoc,
    {
        // Patchable call sites are padded first so the site offset and the
        // position record both name the aligned pc.
        if self.target.align_calls && matches!(inst, Inst::Call(_)) {
            let align = self.emitter.call_align();
            let fill = self.emitter.pad_byte();
            self.buf.align_to(align, fill)?;
        }

        // Track the source position for profiler pc records.
        if let Some(info) = inst.info() {
            let pos = (info.frame.method.0, info.frame.bci);
            if self.last_position != Some(pos) {
                let at = self.buf.position();
                self.flush_pending(at);
                self.pending_non_safepoint = Some((at, Arc::clone(&info.frame)));
                self.last_position = Some(pos);
            }
        }

        let start = self.buf.position();
        if let Inst::Label(l) = &*inst {
            self.labels.bind(l.label, start);
            return Ok(());
        }
        let cx = &mut EmitCtx { buf: &mut self.buf, labels: &mut self.labels };
        match &*inst {
            Inst::Label(_) => unreachable!(),
            Inst::StdEntry(_) => self.emitter.emit_prologue(cx, frame_size)?,
            Inst::Membar(i) => self.emitter.emit_membar(cx, i)?,
            Inst::Breakpoint(i) => self.emitter.emit_breakpoint(cx, i)?,
            Inst::Safepoint(i) => self.emitter.emit_safepoint(cx, i)?,
            Inst::Move(i) => self.emitter.emit_move(cx, i)?,
            Inst::Lea(i) => self.emitter.emit_lea(cx, i)?,
            Inst::Return(i) => {
                self.emitter.emit_epilogue(cx, frame_size)?;
                self.emitter.emit_return(cx, i)?;
            }
            Inst::Neg(i) => self.emitter.emit_neg(cx, i)?,
            Inst::Abs(i) => self.emitter.emit_abs(cx, i)?,
            Inst::Sqrt(i) => self.emitter.emit_sqrt(cx, i)?,
            Inst::Trig(i) => self.emitter.emit_trig(cx, i)?,
            Inst::Convert(i) => self.emitter.emit_convert(cx, i)?,
            Inst::NullCheck(i) => self.emitter.emit_null_check(cx, i)?,
            Inst::Add(i) => self.emitter.emit_add(cx, i)?,
            Inst::Sub(i) => self.emitter.emit_sub(cx, i)?,
            Inst::Mul(i) => self.emitter.emit_mul(cx, i)?,
            Inst::Div(i) => self.emitter.emit_div(cx, i)?,
            Inst::Rem(i) => self.emitter.emit_rem(cx, i)?,
            Inst::Idiv(i) => self.emitter.emit_idiv(cx, i)?,
            Inst::Irem(i) => self.emitter.emit_irem(cx, i)?,
            Inst::Shl(i) => self.emitter.emit_shl(cx, i)?,
            Inst::Shr(i) => self.emitter.emit_shr(cx, i)?,
            Inst::Ushr(i) => self.emitter.emit_ushr(cx, i)?,
            Inst::And(i) => self.emitter.emit_and(cx, i)?,
            Inst::Or(i) => self.emitter.emit_or(cx, i)?,
            Inst::Xor(i) => self.emitter.emit_xor(cx, i)?,
            Inst::Cmp(i) => self.emitter.emit_cmp(cx, i)?,
            Inst::Cmove(i) => self.emitter.emit_cmove(cx, i)?,
            Inst::Branch(i) => self.emitter.emit_branch(cx, i)?,
            Inst::Call(i) => {
                let site = start;
                match i.kind {
                    CallKind::Static => self.emitter.emit_call_static(cx, i)?,
                    CallKind::OptimizedVirtual => self.emitter.emit_call_optimized_virtual(cx, i)?,
                    CallKind::IcVirtual => self.emitter.emit_call_ic_virtual(cx, i)?,
                    CallKind::Vtable { index } => self.emitter.emit_call_vtable(cx, i, index)?,
                }
                self.call_sites.push(CallSite {
                    offset: site,
                    return_offset: cx.buf.position(),
                    kind: i.kind,
                    method: i.method,
                });
            }
            Inst::TypeCheck(i) => self.emitter.emit_type_check(cx, i)?,
            Inst::Lock(i) => self.emitter.emit_lock(cx, i)?,
            Inst::ArrayCopy(i) => self.emitter.emit_array_copy(cx, i)?,
            Inst::CompareAndSwap(i) => self.emitter.emit_compare_and_swap(cx, i)?,
            Inst::Snippet(i) => self.emitter.emit_snippet(cx, i)?,
        }

        if inst.info().is_some() {
            // Calls are observed at the return address; everything else at
            // the potentially faulting pc.
            let pc = if inst.has_call() { self.buf.position() } else { start };
            self.record_safepoint_at(pc, inst, locate);
        }

        if let Some(stub) = inst.take_stub() {
            self.stubs.push(stub);
        }
        Ok(())
    }

    fn emit_stubs<F>(&mut self, locate: &mut F) -> Result<(), CompileError>
    where
        F: FnMut(ValueId) -> ValueLoc,
    {
        let stubs = std::mem::take(&mut self.stubs);
        for stub in &stubs {
            let at = self.buf.position();
            self.labels.bind(stub.entry(), at);
            let cx = &mut EmitCtx { buf: &mut self.buf, labels: &mut self.labels };
            self.emitter.emit_stub(cx, stub)?;
            if let Some(info) = stub.info() {
                // Stub bodies call into the runtime; that call needs a frame
                // record like any other.
                self.flush_pending(at);
                let builder = DebugInfoBuilder::new(self.target, self.frame_map);
                builder.record_stub_safepoint(self.buf.position(), &info.frame, locate, &mut self.recorder);
            }
            // Returning stubs must have somewhere to return to: the fast path
            // binds the continuation, and a stub whose fast path never did is
            // a lowering bug.
            if let Some(cont) = stub.continuation() {
                assert!(
                    self.labels.offset(cont).is_some(),
                    "stub continuation label L{} never bound",
                    usize::from(cont)
                );
            }
        }
        Ok(())
    }

    /// Emit the whole method. Consumes the assembler; a second method needs a
    /// fresh one.
    pub fn emit_method<F>(
        self,
        blocks: &mut [Block],
        handlers: &[HandlerSpec],
        locate: &mut F,
    ) -> Result<CompiledCode, CompileError>
    where
        F: FnMut(ValueId) -> ValueLoc,
    {
        let log = self.log;
        let res = self.emit_method_inner(blocks, handlers, locate);
        match &res {
            Ok(code) => log.log(
                Verbosity::CompileEvent,
                &format!(
                    "emitted {} bytes, {} pc records, {} call sites",
                    code.code.len(),
                    code.pc_descs.len(),
                    code.call_sites.len()
                ),
            ),
            Err(e) => log.log(Verbosity::Error, &e.to_string()),
        }
        res
    }

    fn emit_method_inner<F>(
        mut self,
        blocks: &mut [Block],
        handlers: &[HandlerSpec],
        locate: &mut F,
    ) -> Result<CompiledCode, CompileError>
    where
        F: FnMut(ValueId) -> ValueLoc,
    {
        let frame_size = self.frame_map.frame_size();

        if should_log_ir(IRPhase::Lir) {
            log_ir(&format!("--- Begin lir ---\n{}--- End lir ---\n", print_lir(blocks)));
        }

        for block in blocks.iter_mut() {
            if block.flags.backward_branch_target {
                let align = self.emitter.block_align();
                let fill = self.emitter.pad_byte();
                self.buf.align_to(align, fill)?;
            }
            self.labels.bind(block.label, self.buf.position());
            if block.flags.exception_entry {
                self.handler_entries.push(block.label);
            }
            for inst in &mut block.insts {
                self.emit_inst(&mut inst.inst, frame_size, locate)?;
            }
        }

        self.emit_stubs(locate)?;
        self.flush_pending(u32::MAX);

        // From here on everything is structural: all labels must be bound.
        self.labels.apply_fixups(&mut self.buf);

        // The exception table is finalized last, once handler entry offsets
        // are known.
        let exception_table = handlers
            .iter()
            .map(|spec| {
                assert!(
                    self.handler_entries.contains(&spec.entry),
                    "handler label L{} is not an exception entry block",
                    usize::from(spec.entry)
                );
                ExceptionTableEntry {
                    start_bci: spec.handler.start_bci,
                    end_bci: spec.handler.end_bci,
                    handler_bci: spec.handler.handler_bci,
                    catch_type: spec.handler.catch_type,
                    handler_pc_offset: self.labels.resolve(spec.entry),
                }
            })
            .collect();

        let (pc_descs, scopes, oop_maps) = self.recorder.into_tables();
        let frame = FrameDescriptor {
            frame_size,
            ref_map_size: u32::from(self.target.oop_map_reg_count)
                + self.frame_map.frame_slots()
                + self.frame_map.incoming_arg_slots()
                + 1,
            monitor_count: self.frame_map.monitor_count(),
        };
        let code = CompiledCode {
            code: self.buf.into_bytes(),
            frame,
            pc_descs,
            call_sites: self.call_sites,
            scopes,
            oop_maps,
            exception_table,
        };
        if should_log_ir(IRPhase::Asm) {
            log_ir(&format!(
                "--- Begin asm ---\n{} bytes, frame size {}, {} pc records, {} call sites\n--- End asm ---\n",
                code.code.len(),
                code.frame.frame_size,
                code.pc_descs.len(),
                code.call_sites.len()
            ));
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;
    use crate::{
        debuginfo::{testing as di_testing, CodeEmitInfo, PcKind},
        lir::{
            inst::{Condition, ConvertOp, Label, LirInst},
            stubs::{ConversionStub, DivByZeroStub, RangeCheckStub},
            LabelAlloc,
        },
        target::{testing as t, MethodRef, Reg, RegClass},
        lir::{Operand, ValueKind},
    };

    use std::{cell::RefCell, rc::Rc};

    /// Records hook order (observable through the shared log even after the
    /// assembler consumes the emitter) and emits fixed-size filler so tests
    /// can reason about offsets.
    #[derive(Default)]
    struct TestEmitter {
        ops: Rc<RefCell<Vec<&'static str>>>,
    }

    macro_rules! rec_hook {
        ($($meth:ident($ty:ty)),* $(,)?) => {
            $(
                fn $meth(&mut self, cx: &mut EmitCtx<'_>, _inst: &$ty) -> Result<(), CompileError> {
                    self.ops.borrow_mut().push(stringify!($meth));
                    cx.buf.push_bytes(&[0xaa])
                }
            )*
        };
    }

    impl TargetEmitter for TestEmitter {
        fn block_align(&self) -> u32 {
            4
        }

        fn call_align(&self) -> u32 {
            4
        }

        fn pad_byte(&self) -> u8 {
            0x90
        }

        fn emit_prologue(&mut self, cx: &mut EmitCtx<'_>, _frame_size: u32) -> Result<(), CompileError> {
            self.ops.borrow_mut().push("prologue");
            cx.buf.push_bytes(&[0x01, 0x02])
        }

        fn emit_epilogue(&mut self, cx: &mut EmitCtx<'_>, _frame_size: u32) -> Result<(), CompileError> {
            self.ops.borrow_mut().push("epilogue");
            cx.buf.push_bytes(&[0x03])
        }

        fn emit_branch(&mut self, cx: &mut EmitCtx<'_>, inst: &Branch) -> Result<(), CompileError> {
            self.ops.borrow_mut().push("emit_branch");
            cx.buf.push_bytes(&[0xeb])?;
            cx.emit_rel32(inst.target)
        }

        fn emit_call_vtable(&mut self, cx: &mut EmitCtx<'_>, _inst: &Call, _index: u32) -> Result<(), CompileError> {
            self.ops.borrow_mut().push("emit_call_vtable");
            cx.buf.push_bytes(&[0xff, 0x00])
        }

        fn emit_stub(&mut self, cx: &mut EmitCtx<'_>, _stub: &CodeStub) -> Result<(), CompileError> {
            self.ops.borrow_mut().push("emit_stub");
            cx.buf.push_bytes(&[0x5b, 0x5b])
        }

        rec_hook!(
            emit_membar(Membar),
            emit_breakpoint(Breakpoint),
            emit_safepoint(Safepoint),
            emit_move(Move),
            emit_lea(Lea),
            emit_return(Return),
            emit_neg(Neg),
            emit_abs(Abs),
            emit_sqrt(Sqrt),
            emit_trig(Trig),
            emit_convert(Convert),
            emit_null_check(NullCheck),
            emit_add(Add),
            emit_sub(Sub),
            emit_mul(Mul),
            emit_div(Div),
            emit_rem(Rem),
            emit_idiv(Idiv),
            emit_irem(Irem),
            emit_shl(Shl),
            emit_shr(Shr),
            emit_ushr(Ushr),
            emit_and(And),
            emit_or(Or),
            emit_xor(Xor),
            emit_cmp(Cmp),
            emit_cmove(Cmove),
            emit_call_static(Call),
            emit_call_optimized_virtual(Call),
            emit_call_ic_virtual(Call),
            emit_type_check(TypeCheck),
            emit_lock(Lock),
            emit_array_copy(ArrayCopy),
            emit_compare_and_swap(CompareAndSwap),
            emit_snippet(Snippet),
        );
    }

    fn int_reg(n: u8) -> Operand {
        Operand::reg_of(Reg::new(RegClass::Int, n), ValueKind::Int)
    }

    fn locate(_v: crate::debuginfo::ValueId) -> ValueLoc {
        ValueLoc::Register(Reg::new(RegClass::Int, 0), crate::debuginfo::LocationType::Oop)
    }

    fn finalized_fm(target: &TargetDesc) -> FrameMap {
        let mut fm = FrameMap::new(target, &t::method(), 0);
        fm.finalize_frame(2);
        fm
    }

    #[test]
    fn forward_branch_is_patched() {
        let target = t::target();
        let fm = finalized_fm(&target);
        let mut la = LabelAlloc::new();
        let (b0, b1) = (la.fresh(), la.fresh());

        let mut blocks = vec![Block::new(b0), Block::new(b1)];
        blocks[0].insts.push(LirInst::new(Inst::Branch(Branch::to_label(Condition::Always, b1))));
        blocks[1].insts.push(LirInst::new(Inst::Return(Return { value: Operand::Illegal })));

        let log = Log::new().unwrap();
        let asm = LirAssembler::new(&target, &fm, &log, TestEmitter::default(), la.count(), 256);
        let code = asm.emit_method(&mut blocks, &[], &mut locate).unwrap();

        // Block 1 starts after the 5-byte branch; the rel32 at offset 1 is
        // relative to offset 5.
        let rel = i32::from_le_bytes(code.code[1..5].try_into().unwrap());
        assert_eq!(rel, 0);
        assert_eq!(code.code.len(), 5 + 2);
    }

    #[test]
    fn plain_move_and_return_leaves_no_metadata() {
        let target = t::target();
        let fm = finalized_fm(&target);
        let mut la = LabelAlloc::new();
        let b0 = la.fresh();

        let mut blocks = vec![Block::new(b0)];
        blocks[0]
            .insts
            .push(LirInst::new(Inst::Move(Move::new(Operand::int(42), int_reg(0)))));
        blocks[0].insts.push(LirInst::new(Inst::Return(Return { value: int_reg(0) })));

        let log = Log::new().unwrap();
        let asm = LirAssembler::new(&target, &fm, &log, TestEmitter::default(), la.count(), 256);
        let code = asm.emit_method(&mut blocks, &[], &mut locate).unwrap();

        // Nothing here carries debug info, so no pc records, no call sites,
        // no scope or oop map bytes.
        assert!(code.pc_descs.is_empty());
        assert!(code.call_sites.is_empty());
        assert!(code.scopes.is_empty());
        assert!(code.oop_maps.is_empty());
        assert!(code.exception_table.is_empty());

        // With zero monitors the frame is just the aligned spill area.
        assert_eq!(code.frame.monitor_count, 0);
        assert_eq!(code.frame.frame_size, fm.frame_size());
        assert_eq!(code.frame.frame_size % target.stack_align, 0);
    }

    #[test]
    fn backward_branch_target_is_aligned() {
        let target = t::target();
        let fm = finalized_fm(&target);
        let mut la = LabelAlloc::new();
        let (b0, b1) = (la.fresh(), la.fresh());

        let mut blocks = vec![Block::new(b0), Block::new(b1)];
        blocks[1].flags.backward_branch_target = true;
        // 2-byte prologue leaves block 1 unaligned without padding.
        blocks[0].insts.push(LirInst::new(Inst::StdEntry(crate::lir::inst::StdEntry)));
        blocks[1].insts.push(LirInst::new(Inst::Branch(Branch::to_label(Condition::Always, b1))));

        let log = Log::new().unwrap();
        let asm = LirAssembler::new(&target, &fm, &log, TestEmitter::default(), la.count(), 256);
        let code = asm.emit_method(&mut blocks, &[], &mut locate).unwrap();
        assert_eq!(&code.code[..4], &[0x01, 0x02, 0x90, 0x90]);
        // The self-branch at offset 4 jumps to itself: rel32 == -5.
        let rel = i32::from_le_bytes(code.code[5..9].try_into().unwrap());
        assert_eq!(rel, -5);
    }

    #[test]
    fn stubs_are_emitted_after_all_blocks() {
        let target = t::target();
        let fm = finalized_fm(&target);
        let mut la = LabelAlloc::new();
        let b0 = la.fresh();

        let stub = Box::new(CodeStub::DivByZeroStub(DivByZeroStub {
            entry: la.fresh(),
            info: CodeEmitInfo::new(di_testing::frame(3, &[1]), None),
        }));
        let mut blocks = vec![Block::new(b0)];
        blocks[0].insts.push(LirInst::new(Inst::Branch(Branch::to_stub(Condition::Eq, stub))));
        blocks[0].insts.push(LirInst::new(Inst::Return(Return { value: Operand::Illegal })));

        let emitter = TestEmitter::default();
        let ops = Rc::clone(&emitter.ops);
        let log = Log::new().unwrap();
        let asm = LirAssembler::new(&target, &fm, &log, emitter, la.count(), 256);
        let code = asm.emit_method(&mut blocks, &[], &mut locate).unwrap();

        // The stub body is the last thing any hook emitted.
        assert_eq!(
            *ops.borrow(),
            vec!["emit_branch", "epilogue", "emit_return", "emit_stub"]
        );

        // branch(5) + epilogue(1) + return(1), stub body after everything.
        assert_eq!(&code.code[7..9], &[0x5b, 0x5b]);
        // Stub entry label resolves into the stub area.
        let rel = i32::from_le_bytes(code.code[1..5].try_into().unwrap());
        assert_eq!(rel, 2);
        // The stub's runtime call got a safepoint record with an oop map.
        assert_eq!(code.pc_descs.len(), 1);
        assert_eq!(code.pc_descs[0].kind, PcKind::Safepoint);
        assert!(code.pc_descs[0].oop_map_offset.is_some());
    }

    #[test]
    fn call_sites_are_aligned_and_recorded() {
        let target = t::target(); // align_calls is set
        let fm = finalized_fm(&target);
        let mut la = LabelAlloc::new();
        let b0 = la.fresh();

        let mut blocks = vec![Block::new(b0)];
        blocks[0].insts.push(LirInst::new(Inst::StdEntry(crate::lir::inst::StdEntry)));
        blocks[0].insts.push(LirInst::new(Inst::Call(Call {
            kind: CallKind::Static,
            method: MethodRef(0x77),
            args: smallvec![int_reg(0)],
            result: int_reg(0),
            info: CodeEmitInfo::new(di_testing::frame(9, &[1]), None),
        })));
        blocks[0].insts.push(LirInst::new(Inst::Return(Return { value: int_reg(0) })));

        let log = Log::new().unwrap();
        let asm = LirAssembler::new(&target, &fm, &log, TestEmitter::default(), la.count(), 256);
        let code = asm.emit_method(&mut blocks, &[], &mut locate).unwrap();

        assert_eq!(code.call_sites.len(), 1);
        let site = code.call_sites[0];
        assert_eq!(site.offset % 4, 0);
        assert_eq!(site.offset, 4); // 2-byte prologue padded to 4
        assert_eq!(site.return_offset, 5);
        assert_eq!(site.method, MethodRef(0x77));
        // Safepoint keyed on the return address; the call's position record
        // precedes it at the site.
        assert!(code.pc_desc_at(5).is_some());
        assert_eq!(code.pc_desc_at(4).unwrap().kind, PcKind::NonSafepoint);
    }

    #[test]
    fn buffer_exhaustion_bails_out() {
        let target = t::target();
        let fm = finalized_fm(&target);
        let mut la = LabelAlloc::new();
        let b0 = la.fresh();

        let mut blocks = vec![Block::new(b0)];
        for _ in 0..10 {
            blocks[0].insts.push(LirInst::new(Inst::Add(Add {
                left: int_reg(0),
                right: int_reg(1),
                result: int_reg(0),
            })));
        }
        let log = Log::new().unwrap();
        let asm = LirAssembler::new(&target, &fm, &log, TestEmitter::default(), la.count(), 4);
        match asm.emit_method(&mut blocks, &[], &mut locate) {
            Err(CompileError::Bailout(_)) => (),
            other => panic!("expected bailout, got {other:?}"),
        }
    }

    #[test]
    fn bailouts_are_logged() {
        let target = t::target();
        let fm = finalized_fm(&target);
        let mut la = LabelAlloc::new();
        let b0 = la.fresh();

        let mut blocks = vec![Block::new(b0)];
        for _ in 0..4 {
            blocks[0].insts.push(LirInst::new(Inst::Add(Add {
                left: int_reg(0),
                right: int_reg(1),
                result: int_reg(0),
            })));
        }
        let path = std::env::temp_dir().join("lirbe_asm_bailout_log");
        let log = Log::with_path(path.clone(), Verbosity::Error);
        let asm = LirAssembler::new(&target, &fm, &log, TestEmitter::default(), la.count(), 1);
        assert!(matches!(
            asm.emit_method(&mut blocks, &[], &mut locate),
            Err(CompileError::Bailout(_))
        ));
        let out = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert!(out.contains("lirbe-error: bailout: code buffer exhausted"), "got: {out}");
    }

    #[test]
    fn bound_stub_continuation_is_accepted() {
        let target = t::target();
        let fm = finalized_fm(&target);
        let mut la = LabelAlloc::new();
        let b0 = la.fresh();
        let cont = la.fresh();

        let stub = Box::new(CodeStub::ConversionStub(ConversionStub {
            entry: la.fresh(),
            continuation: cont,
            op: ConvertOp::L2I,
            value: int_reg(1),
            result: int_reg(2),
        }));
        let mut blocks = vec![Block::new(b0)];
        blocks[0].insts.push(LirInst::new(Inst::Branch(Branch::to_stub(Condition::Eq, stub))));
        blocks[0].insts.push(LirInst::new(Inst::Label(Label { label: cont })));
        blocks[0].insts.push(LirInst::new(Inst::Return(Return { value: int_reg(2) })));

        let log = Log::new().unwrap();
        let asm = LirAssembler::new(&target, &fm, &log, TestEmitter::default(), la.count(), 256);
        let code = asm.emit_method(&mut blocks, &[], &mut locate).unwrap();
        // The continuation sits right after the 5-byte branch, inside the
        // mainline code, before the stub body.
        assert_eq!(&code.code[7..9], &[0x5b, 0x5b]);
    }

    #[test]
    #[should_panic(expected = "stub continuation label")]
    fn dangling_stub_continuation_is_fatal() {
        let target = t::target();
        let fm = finalized_fm(&target);
        let mut la = LabelAlloc::new();
        let b0 = la.fresh();

        let stub = Box::new(CodeStub::ConversionStub(ConversionStub {
            entry: la.fresh(),
            continuation: la.fresh(),
            op: ConvertOp::L2I,
            value: int_reg(1),
            result: int_reg(2),
        }));
        let mut blocks = vec![Block::new(b0)];
        blocks[0].insts.push(LirInst::new(Inst::Branch(Branch::to_stub(Condition::Eq, stub))));
        blocks[0].insts.push(LirInst::new(Inst::Return(Return { value: Operand::Illegal })));

        let log = Log::new().unwrap();
        let asm = LirAssembler::new(&target, &fm, &log, TestEmitter::default(), la.count(), 256);
        let _ = asm.emit_method(&mut blocks, &[], &mut locate);
    }

    #[test]
    #[should_panic(expected = "never bound")]
    fn unbound_label_is_fatal() {
        let target = t::target();
        let fm = finalized_fm(&target);
        let mut la = LabelAlloc::new();
        let b0 = la.fresh();
        let dangling = la.fresh();

        let mut blocks = vec![Block::new(b0)];
        blocks[0]
            .insts
            .push(LirInst::new(Inst::Branch(Branch::to_label(Condition::Always, dangling))));

        let log = Log::new().unwrap();
        let asm = LirAssembler::new(&target, &fm, &log, TestEmitter::default(), la.count(), 256);
        let _ = asm.emit_method(&mut blocks, &[], &mut locate);
    }

    #[test]
    fn exception_table_resolves_handler_offsets() {
        let target = t::target();
        let fm = finalized_fm(&target);
        let mut la = LabelAlloc::new();
        let (b0, b1) = (la.fresh(), la.fresh());

        let mut blocks = vec![Block::new(b0), Block::new(b1)];
        blocks[0].insts.push(LirInst::new(Inst::Return(Return { value: Operand::Illegal })));
        blocks[1].flags.exception_entry = true;
        blocks[1].insts.push(LirInst::new(Inst::Return(Return { value: Operand::Illegal })));

        let handlers = [HandlerSpec {
            handler: ExceptionHandler { start_bci: 0, end_bci: 40, handler_bci: 50, catch_type: None },
            entry: b1,
        }];
        let log = Log::new().unwrap();
        let asm = LirAssembler::new(&target, &fm, &log, TestEmitter::default(), la.count(), 256);
        let code = asm.emit_method(&mut blocks, &handlers, &mut locate).unwrap();
        assert_eq!(code.exception_table.len(), 1);
        // Block 0 is epilogue(1) + return(1) bytes long.
        assert_eq!(code.exception_table[0].handler_pc_offset, 2);
        assert_eq!(code.exception_table[0].handler_bci, 50);
    }

    #[test]
    fn handler_offsets_resolve_past_stub_code() {
        let target = t::target();
        let fm = finalized_fm(&target);
        let mut la = LabelAlloc::new();
        let (b0, b1) = (la.fresh(), la.fresh());

        let stub = Box::new(CodeStub::DivByZeroStub(DivByZeroStub {
            entry: la.fresh(),
            info: CodeEmitInfo::new(di_testing::frame(3, &[1]), None),
        }));
        let mut blocks = vec![Block::new(b0), Block::new(b1)];
        blocks[0].insts.push(LirInst::new(Inst::Branch(Branch::to_stub(Condition::Eq, stub))));
        blocks[0].insts.push(LirInst::new(Inst::Return(Return { value: Operand::Illegal })));
        blocks[1].flags.exception_entry = true;
        blocks[1].insts.push(LirInst::new(Inst::Return(Return { value: Operand::Illegal })));

        let handlers = [HandlerSpec {
            handler: ExceptionHandler { start_bci: 0, end_bci: 40, handler_bci: 50, catch_type: None },
            entry: b1,
        }];
        let log = Log::new().unwrap();
        let asm = LirAssembler::new(&target, &fm, &log, TestEmitter::default(), la.count(), 256);
        let code = asm.emit_method(&mut blocks, &handlers, &mut locate).unwrap();

        // Block 0 is branch(5) + epilogue(1) + return(1); the handler block
        // starts at 7 and the stub body lands after it, at 9.
        assert_eq!(code.exception_table[0].handler_pc_offset, 7);
        assert_eq!(&code.code[9..11], &[0x5b, 0x5b]);
        // The table was filled in after the stub region was placed, yet still
        // points into the handler block, not the stub.
        assert!((code.exception_table[0].handler_pc_offset as usize) < code.code.len() - 2);
    }

    #[test]
    fn range_check_stub_entry_comes_from_branch() {
        // take_stub() on the owning branch must hand the stub to the driver
        // exactly once; a second walk would find nothing to emit.
        let mut la = LabelAlloc::new();
        let stub = Box::new(CodeStub::RangeCheckStub(RangeCheckStub {
            entry: la.fresh(),
            index: int_reg(2),
            info: CodeEmitInfo::new(di_testing::frame(0, &[]), None),
        }));
        let entry = stub.entry();
        let mut br = Branch::to_stub(Condition::Uge, stub);
        assert_eq!(br.target, entry);
        assert!(br.take_stub().is_some());
        assert!(br.take_stub().is_none());
    }
}
