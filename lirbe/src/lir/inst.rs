//! The closed LIR instruction set.
//!
//! Each instruction kind is its own struct carrying typed operand fields; the
//! [Inst] enum ties them together and `enum_dispatch` generates the dispatch.
//! Crucially, each kind owns its *role classification*: the
//! [InstT::visit_operands]/[InstT::map_operands] pair is the single source of
//! truth for which operands are inputs, temps, or outputs, so there is no
//! separate per-opcode visitor table that could fall out of sync.
//!
//! Role rules that are easy to get wrong (and that the allocator depends on):
//!
//!  * [Cmove]'s false-input doubles as a temp, so it is never assigned the
//!    same location as the result on targets that need a scratch.
//!  * [Idiv]/[Irem] force the divisor to be input-and-temp so it cannot be
//!    colored identically to the quotient/remainder, and reserve an extra
//!    temp.
//!  * [Trig] reserves two FPU-stack temps.
//!  * [ArrayCopy] treats all five logical operands plus its temp as
//!    input-and-temp: the underlying runtime call clobbers every one of them.
//!
//! The set is closed: adding a kind means adding a variant, and the exhaustive
//! matches in the assembler driver and the tests will not compile until every
//! consumer handles it.

use crate::{
    debuginfo::CodeEmitInfo,
    lir::{
        operand::Operand,
        stubs::{CodeStub, CodeStubT},
        visit::{map_operand, visit_operand, OperandRole, OperandVisitor},
        LabelIdx,
    },
    target::{ClassRef, MethodRef},
};
use enum_dispatch::enum_dispatch;
use smallvec::SmallVec;
use std::fmt;
use strum::{EnumCount, EnumDiscriminants, EnumIter};

/// A condition code for compares, branches and conditional moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Condition {
    Always,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Unsigned / pointer comparisons.
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Condition::Always => "al",
            Condition::Eq => "eq",
            Condition::Ne => "ne",
            Condition::Lt => "lt",
            Condition::Le => "le",
            Condition::Gt => "gt",
            Condition::Ge => "ge",
            Condition::Ult => "ult",
            Condition::Ule => "ule",
            Condition::Ugt => "ugt",
            Condition::Uge => "uge",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembarKind {
    Acquire,
    Release,
    Fence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrigOp {
    Sin,
    Cos,
    Tan,
    Log,
    Log10,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvertOp {
    I2L,
    L2I,
    I2B,
    I2C,
    I2S,
    I2F,
    I2D,
    L2F,
    L2D,
    F2D,
    D2F,
    F2I,
    D2I,
    F2L,
    D2L,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    Static,
    OptimizedVirtual,
    IcVirtual,
    Vtable { index: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeCheckKind {
    CheckCast,
    InstanceOf,
    StoreCheck,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockKind {
    Lock,
    Unlock,
}

/// The trait every instruction kind implements; `enum_dispatch` lifts it onto
/// [Inst].
#[enum_dispatch]
pub trait InstT {
    /// Report every allocator-relevant operand with its role. The
    /// classification is part of the instruction's contract and never varies.
    fn visit_operands(&self, v: &mut dyn OperandVisitor);

    /// Walk the same operand slots as [InstT::visit_operands], replacing each
    /// with the operand `f` returns (if any). The allocator's substitution
    /// hook.
    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>);

    /// The debug info attached to this instruction, if it can trap or is a
    /// safepoint.
    fn info(&self) -> Option<&CodeEmitInfo> {
        None
    }

    fn info_mut(&mut self) -> Option<&mut CodeEmitInfo> {
        None
    }

    /// Does this instruction perform a call (clobbering caller-saved
    /// registers)?
    fn has_call(&self) -> bool {
        false
    }

    /// The slow-case stub referenced by this instruction, if any.
    fn stub(&self) -> Option<&CodeStub> {
        None
    }

    /// Detach the slow-case stub so the assembler driver can accumulate it
    /// for out-of-line emission.
    fn take_stub(&mut self) -> Option<Box<CodeStub>> {
        None
    }

    fn to_lir_string(&self) -> String;
}

/// An LIR instruction plus the numeric id the register allocator assigns for
/// liveness ordering. Lifecycle: built once by lowering, operand slots
/// rewritten in place by the allocator, consumed exactly once by the assembler
/// driver.
#[derive(Clone, Debug)]
pub struct LirInst {
    /// `None` until the allocator numbers the instruction.
    pub id: Option<u32>,
    pub inst: Inst,
}

impl LirInst {
    pub fn new(inst: Inst) -> Self {
        Self { id: None, inst }
    }
}

impl fmt::Display for LirInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = self.id {
            write!(f, "{id:>4}: ")?;
        }
        write!(f, "{}", self.inst.to_lir_string())
    }
}

#[enum_dispatch(InstT)]
#[derive(Clone, Debug, EnumCount, EnumDiscriminants)]
#[strum_discriminants(name(Opcode))]
#[strum_discriminants(derive(EnumCount, EnumIter, Hash, strum::Display))]
#[strum_discriminants(strum(serialize_all = "snake_case"))]
pub enum Inst {
    Label(Label),
    StdEntry(StdEntry),
    Membar(Membar),
    Breakpoint(Breakpoint),
    Safepoint(Safepoint),
    Move(Move),
    Lea(Lea),
    Return(Return),
    Neg(Neg),
    Abs(Abs),
    Sqrt(Sqrt),
    Trig(Trig),
    Convert(Convert),
    NullCheck(NullCheck),
    Add(Add),
    Sub(Sub),
    Mul(Mul),
    Div(Div),
    Rem(Rem),
    Idiv(Idiv),
    Irem(Irem),
    Shl(Shl),
    Shr(Shr),
    Ushr(Ushr),
    And(And),
    Or(Or),
    Xor(Xor),
    Cmp(Cmp),
    Cmove(Cmove),
    Branch(Branch),
    Call(Call),
    TypeCheck(TypeCheck),
    Lock(Lock),
    ArrayCopy(ArrayCopy),
    CompareAndSwap(CompareAndSwap),
    Snippet(Snippet),
}

impl Inst {
    pub fn opcode(&self) -> Opcode {
        Opcode::from(self)
    }
}

/// Binds a label at the current code offset. Block entry labels are bound by
/// the driver itself; a `Label` instruction marks an extra target inside a
/// block, such as a stub continuation.
#[derive(Clone, Debug)]
pub struct Label {
    pub label: LabelIdx,
}

impl InstT for Label {
    fn visit_operands(&self, _v: &mut dyn OperandVisitor) {}

    fn map_operands(&mut self, _f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {}

    fn to_lir_string(&self) -> String {
        format!("label L{}", usize::from(self.label))
    }
}

/// Method entry marker: the driver emits the prologue (frame push) here.
#[derive(Clone, Debug)]
pub struct StdEntry;

impl InstT for StdEntry {
    fn visit_operands(&self, _v: &mut dyn OperandVisitor) {}

    fn map_operands(&mut self, _f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {}

    fn to_lir_string(&self) -> String {
        "std_entry".to_owned()
    }
}

#[derive(Clone, Debug)]
pub struct Membar {
    pub kind: MembarKind,
}

impl InstT for Membar {
    fn visit_operands(&self, _v: &mut dyn OperandVisitor) {}

    fn map_operands(&mut self, _f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {}

    fn to_lir_string(&self) -> String {
        format!("membar {:?}", self.kind).to_lowercase()
    }
}

#[derive(Clone, Debug)]
pub struct Breakpoint;

impl InstT for Breakpoint {
    fn visit_operands(&self, _v: &mut dyn OperandVisitor) {}

    fn map_operands(&mut self, _f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {}

    fn to_lir_string(&self) -> String {
        "breakpoint".to_owned()
    }
}

/// A safepoint poll. Always carries debug info: the runtime must be able to
/// inspect the frame here.
#[derive(Clone, Debug)]
pub struct Safepoint {
    /// Scratch register for the poll address on targets that need one.
    pub temp: Operand,
    pub info: CodeEmitInfo,
}

impl InstT for Safepoint {
    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        visit_operand(&self.temp, OperandRole::Temp, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        map_operand(&mut self.temp, OperandRole::Temp, f);
    }

    fn info(&self) -> Option<&CodeEmitInfo> {
        Some(&self.info)
    }

    fn info_mut(&mut self) -> Option<&mut CodeEmitInfo> {
        Some(&mut self.info)
    }

    fn to_lir_string(&self) -> String {
        format!("safepoint [tmp {}]", self.temp)
    }
}

/// Data movement: register/stack/constant/memory in either direction,
/// depending on the operand shapes. Memory moves may carry debug info for the
/// implicit null check.
#[derive(Clone, Debug)]
pub struct Move {
    pub src: Operand,
    pub dst: Operand,
    pub info: Option<CodeEmitInfo>,
    pub stub: Option<Box<CodeStub>>,
}

impl Move {
    pub fn new(src: Operand, dst: Operand) -> Self {
        Self {
            src,
            dst,
            info: None,
            stub: None,
        }
    }
}

impl InstT for Move {
    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        visit_operand(&self.src, OperandRole::Input, v);
        visit_operand(&self.dst, OperandRole::Output, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        map_operand(&mut self.src, OperandRole::Input, f);
        map_operand(&mut self.dst, OperandRole::Output, f);
    }

    fn info(&self) -> Option<&CodeEmitInfo> {
        self.info.as_ref()
    }

    fn info_mut(&mut self) -> Option<&mut CodeEmitInfo> {
        self.info.as_mut()
    }

    fn stub(&self) -> Option<&CodeStub> {
        self.stub.as_deref()
    }

    fn take_stub(&mut self) -> Option<Box<CodeStub>> {
        self.stub.take()
    }

    fn to_lir_string(&self) -> String {
        format!("move {} -> {}", self.src, self.dst)
    }
}

/// Materialize the address computation itself (no memory access).
#[derive(Clone, Debug)]
pub struct Lea {
    /// Must be an [Operand::Addr].
    pub addr: Operand,
    pub result: Operand,
}

impl InstT for Lea {
    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        visit_operand(&self.addr, OperandRole::Input, v);
        visit_operand(&self.result, OperandRole::Output, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        map_operand(&mut self.addr, OperandRole::Input, f);
        map_operand(&mut self.result, OperandRole::Output, f);
    }

    fn to_lir_string(&self) -> String {
        format!("lea {} -> {}", self.addr, self.result)
    }
}

/// Return from the method. The value operand is [Operand::Illegal] for void
/// returns; the driver emits the epilogue here.
#[derive(Clone, Debug)]
pub struct Return {
    pub value: Operand,
}

impl InstT for Return {
    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        visit_operand(&self.value, OperandRole::Input, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        map_operand(&mut self.value, OperandRole::Input, f);
    }

    fn to_lir_string(&self) -> String {
        if self.value.is_illegal() {
            "return".to_owned()
        } else {
            format!("return {}", self.value)
        }
    }
}

macro_rules! unary_op {
    ($name:ident, $mnemonic:literal) => {
        #[derive(Clone, Debug)]
        pub struct $name {
            pub value: Operand,
            pub result: Operand,
        }

        impl InstT for $name {
            fn visit_operands(&self, v: &mut dyn OperandVisitor) {
                visit_operand(&self.value, OperandRole::Input, v);
                visit_operand(&self.result, OperandRole::Output, v);
            }

            fn map_operands(
                &mut self,
                f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>,
            ) {
                map_operand(&mut self.value, OperandRole::Input, f);
                map_operand(&mut self.result, OperandRole::Output, f);
            }

            fn to_lir_string(&self) -> String {
                format!("{} {} -> {}", $mnemonic, self.value, self.result)
            }
        }
    };
}

unary_op!(Neg, "neg");
unary_op!(Abs, "abs");
unary_op!(Sqrt, "sqrt");

/// Transcendental math. Two extra FPU-stack temps are reserved so the
/// allocator keeps the register stack consistent across the libm sequence.
#[derive(Clone, Debug)]
pub struct Trig {
    pub op: TrigOp,
    pub value: Operand,
    pub tmp1: Operand,
    pub tmp2: Operand,
    pub result: Operand,
}

impl InstT for Trig {
    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        visit_operand(&self.value, OperandRole::Input, v);
        visit_operand(&self.tmp1, OperandRole::Temp, v);
        visit_operand(&self.tmp2, OperandRole::Temp, v);
        visit_operand(&self.result, OperandRole::Output, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        map_operand(&mut self.value, OperandRole::Input, f);
        map_operand(&mut self.tmp1, OperandRole::Temp, f);
        map_operand(&mut self.tmp2, OperandRole::Temp, f);
        map_operand(&mut self.result, OperandRole::Output, f);
    }

    fn to_lir_string(&self) -> String {
        format!("{:?} {} -> {}", self.op, self.value, self.result).to_lowercase()
    }
}

/// Primitive conversion. Float-to-integer conversions carry a stub for the
/// out-of-range slow path.
#[derive(Clone, Debug)]
pub struct Convert {
    pub op: ConvertOp,
    pub value: Operand,
    pub result: Operand,
    pub stub: Option<Box<CodeStub>>,
}

impl InstT for Convert {
    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        visit_operand(&self.value, OperandRole::Input, v);
        visit_operand(&self.result, OperandRole::Output, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        map_operand(&mut self.value, OperandRole::Input, f);
        map_operand(&mut self.result, OperandRole::Output, f);
    }

    fn stub(&self) -> Option<&CodeStub> {
        self.stub.as_deref()
    }

    fn take_stub(&mut self) -> Option<Box<CodeStub>> {
        self.stub.take()
    }

    fn to_lir_string(&self) -> String {
        format!("convert {:?} {} -> {}", self.op, self.value, self.result).to_lowercase()
    }
}

/// Explicit null check (when the implicit-via-trap scheme cannot be used).
#[derive(Clone, Debug)]
pub struct NullCheck {
    pub value: Operand,
    pub info: CodeEmitInfo,
    pub stub: Option<Box<CodeStub>>,
}

impl InstT for NullCheck {
    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        visit_operand(&self.value, OperandRole::Input, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        map_operand(&mut self.value, OperandRole::Input, f);
    }

    fn info(&self) -> Option<&CodeEmitInfo> {
        Some(&self.info)
    }

    fn info_mut(&mut self) -> Option<&mut CodeEmitInfo> {
        Some(&mut self.info)
    }

    fn stub(&self) -> Option<&CodeStub> {
        self.stub.as_deref()
    }

    fn take_stub(&mut self) -> Option<Box<CodeStub>> {
        self.stub.take()
    }

    fn to_lir_string(&self) -> String {
        format!("null_check {}", self.value)
    }
}

macro_rules! binary_op {
    ($name:ident, $mnemonic:literal) => {
        #[derive(Clone, Debug)]
        pub struct $name {
            pub left: Operand,
            pub right: Operand,
            pub result: Operand,
        }

        impl InstT for $name {
            fn visit_operands(&self, v: &mut dyn OperandVisitor) {
                visit_operand(&self.left, OperandRole::Input, v);
                visit_operand(&self.right, OperandRole::Input, v);
                visit_operand(&self.result, OperandRole::Output, v);
            }

            fn map_operands(
                &mut self,
                f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>,
            ) {
                map_operand(&mut self.left, OperandRole::Input, f);
                map_operand(&mut self.right, OperandRole::Input, f);
                map_operand(&mut self.result, OperandRole::Output, f);
            }

            fn to_lir_string(&self) -> String {
                format!("{} {}, {} -> {}", $mnemonic, self.left, self.right, self.result)
            }
        }
    };
}

binary_op!(Add, "add");
binary_op!(Sub, "sub");
binary_op!(Mul, "mul");
binary_op!(And, "and");
binary_op!(Or, "or");
binary_op!(Xor, "xor");

macro_rules! div_like_op {
    ($name:ident, $mnemonic:literal) => {
        /// Floating-point / runtime-assisted division family: may trap, so it
        /// can carry debug info, but needs no forced temps.
        #[derive(Clone, Debug)]
        pub struct $name {
            pub left: Operand,
            pub right: Operand,
            pub result: Operand,
            pub info: Option<CodeEmitInfo>,
        }

        impl InstT for $name {
            fn visit_operands(&self, v: &mut dyn OperandVisitor) {
                visit_operand(&self.left, OperandRole::Input, v);
                visit_operand(&self.right, OperandRole::Input, v);
                visit_operand(&self.result, OperandRole::Output, v);
            }

            fn map_operands(
                &mut self,
                f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>,
            ) {
                map_operand(&mut self.left, OperandRole::Input, f);
                map_operand(&mut self.right, OperandRole::Input, f);
                map_operand(&mut self.result, OperandRole::Output, f);
            }

            fn info(&self) -> Option<&CodeEmitInfo> {
                self.info.as_ref()
            }

            fn info_mut(&mut self) -> Option<&mut CodeEmitInfo> {
                self.info.as_mut()
            }

            fn to_lir_string(&self) -> String {
                format!("{} {}, {} -> {}", $mnemonic, self.left, self.right, self.result)
            }
        }
    };
}

div_like_op!(Div, "div");
div_like_op!(Rem, "rem");

macro_rules! idiv_like_op {
    ($name:ident, $mnemonic:literal) => {
        /// Integer division family. The divisor is input-and-temp so the
        /// allocator never colors it identically to the result or the extra
        /// temp; the temp holds the other half of the quotient/remainder pair
        /// on targets whose divide writes a register pair.
        #[derive(Clone, Debug)]
        pub struct $name {
            pub left: Operand,
            pub right: Operand,
            pub tmp: Operand,
            pub result: Operand,
            pub info: Option<CodeEmitInfo>,
            /// Divide-by-zero slow path.
            pub stub: Option<Box<CodeStub>>,
        }

        impl InstT for $name {
            fn visit_operands(&self, v: &mut dyn OperandVisitor) {
                visit_operand(&self.left, OperandRole::Input, v);
                visit_operand(&self.right, OperandRole::InputAndTemp, v);
                visit_operand(&self.tmp, OperandRole::Temp, v);
                visit_operand(&self.result, OperandRole::Output, v);
            }

            fn map_operands(
                &mut self,
                f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>,
            ) {
                map_operand(&mut self.left, OperandRole::Input, f);
                map_operand(&mut self.right, OperandRole::InputAndTemp, f);
                map_operand(&mut self.tmp, OperandRole::Temp, f);
                map_operand(&mut self.result, OperandRole::Output, f);
            }

            fn info(&self) -> Option<&CodeEmitInfo> {
                self.info.as_ref()
            }

            fn info_mut(&mut self) -> Option<&mut CodeEmitInfo> {
                self.info.as_mut()
            }

            fn stub(&self) -> Option<&CodeStub> {
                self.stub.as_deref()
            }

            fn take_stub(&mut self) -> Option<Box<CodeStub>> {
                self.stub.take()
            }

            fn to_lir_string(&self) -> String {
                format!("{} {}, {} -> {}", $mnemonic, self.left, self.right, self.result)
            }
        }
    };
}

idiv_like_op!(Idiv, "idiv");
idiv_like_op!(Irem, "irem");

macro_rules! shift_op {
    ($name:ident, $mnemonic:literal) => {
        /// Shifts reserve a temp for targets that demand the count in a fixed
        /// register.
        #[derive(Clone, Debug)]
        pub struct $name {
            pub value: Operand,
            pub count: Operand,
            pub tmp: Operand,
            pub result: Operand,
        }

        impl InstT for $name {
            fn visit_operands(&self, v: &mut dyn OperandVisitor) {
                visit_operand(&self.value, OperandRole::Input, v);
                visit_operand(&self.count, OperandRole::Input, v);
                visit_operand(&self.tmp, OperandRole::Temp, v);
                visit_operand(&self.result, OperandRole::Output, v);
            }

            fn map_operands(
                &mut self,
                f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>,
            ) {
                map_operand(&mut self.value, OperandRole::Input, f);
                map_operand(&mut self.count, OperandRole::Input, f);
                map_operand(&mut self.tmp, OperandRole::Temp, f);
                map_operand(&mut self.result, OperandRole::Output, f);
            }

            fn to_lir_string(&self) -> String {
                format!("{} {}, {} -> {}", $mnemonic, self.value, self.count, self.result)
            }
        }
    };
}

shift_op!(Shl, "shl");
shift_op!(Shr, "shr");
shift_op!(Ushr, "ushr");

/// Flag-setting compare. May fault when one side is a memory operand, hence
/// the optional debug info.
#[derive(Clone, Debug)]
pub struct Cmp {
    pub cond: Condition,
    pub left: Operand,
    pub right: Operand,
    pub info: Option<CodeEmitInfo>,
}

impl InstT for Cmp {
    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        visit_operand(&self.left, OperandRole::Input, v);
        visit_operand(&self.right, OperandRole::Input, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        map_operand(&mut self.left, OperandRole::Input, f);
        map_operand(&mut self.right, OperandRole::Input, f);
    }

    fn info(&self) -> Option<&CodeEmitInfo> {
        self.info.as_ref()
    }

    fn info_mut(&mut self) -> Option<&mut CodeEmitInfo> {
        self.info.as_mut()
    }

    fn to_lir_string(&self) -> String {
        format!("cmp_{} {}, {}", self.cond, self.left, self.right)
    }
}

/// Conditional move. The false-input doubles as a temp: targets that need a
/// scratch to sequence the two moves must not see it allocated to the result's
/// location.
#[derive(Clone, Debug)]
pub struct Cmove {
    pub cond: Condition,
    pub if_true: Operand,
    pub if_false: Operand,
    pub result: Operand,
}

impl InstT for Cmove {
    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        visit_operand(&self.if_true, OperandRole::Input, v);
        visit_operand(&self.if_false, OperandRole::InputAndTemp, v);
        visit_operand(&self.result, OperandRole::Output, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        map_operand(&mut self.if_true, OperandRole::Input, f);
        map_operand(&mut self.if_false, OperandRole::InputAndTemp, f);
        map_operand(&mut self.result, OperandRole::Output, f);
    }

    fn to_lir_string(&self) -> String {
        format!(
            "cmove_{} {}, {} -> {}",
            self.cond, self.if_true, self.if_false, self.result
        )
    }
}

/// Conditional or unconditional branch to a label. A branch whose target is a
/// stub's entry label owns that stub; the driver detaches it for out-of-line
/// emission (e.g. range-check failures).
#[derive(Clone, Debug)]
pub struct Branch {
    pub cond: Condition,
    pub target: LabelIdx,
    pub info: Option<CodeEmitInfo>,
    pub stub: Option<Box<CodeStub>>,
}

impl Branch {
    pub fn to_label(cond: Condition, target: LabelIdx) -> Self {
        Self {
            cond,
            target,
            info: None,
            stub: None,
        }
    }

    /// Branch to `stub`'s slow path. The target label is the stub's entry.
    pub fn to_stub(cond: Condition, stub: Box<CodeStub>) -> Self {
        Self {
            cond,
            target: stub.entry(),
            info: None,
            stub: Some(stub),
        }
    }
}

impl InstT for Branch {
    fn visit_operands(&self, _v: &mut dyn OperandVisitor) {}

    fn map_operands(&mut self, _f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {}

    fn info(&self) -> Option<&CodeEmitInfo> {
        self.info.as_ref()
    }

    fn info_mut(&mut self) -> Option<&mut CodeEmitInfo> {
        self.info.as_mut()
    }

    fn stub(&self) -> Option<&CodeStub> {
        self.stub.as_deref()
    }

    fn take_stub(&mut self) -> Option<Box<CodeStub>> {
        self.stub.take()
    }

    fn to_lir_string(&self) -> String {
        format!("branch_{} L{}", self.cond, usize::from(self.target))
    }
}

/// A call site. Always a safepoint (mandatory debug info) and always
/// clobbering caller-saved registers.
#[derive(Clone, Debug)]
pub struct Call {
    pub kind: CallKind,
    pub method: MethodRef,
    /// Receiver first for virtual kinds. Post-allocation these are the fixed
    /// argument locations of the calling convention.
    pub args: SmallVec<[Operand; 6]>,
    pub result: Operand,
    pub info: CodeEmitInfo,
}

impl InstT for Call {
    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        for a in &self.args {
            visit_operand(a, OperandRole::Input, v);
        }
        visit_operand(&self.result, OperandRole::Output, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        for a in &mut self.args {
            map_operand(a, OperandRole::Input, f);
        }
        map_operand(&mut self.result, OperandRole::Output, f);
    }

    fn info(&self) -> Option<&CodeEmitInfo> {
        Some(&self.info)
    }

    fn info_mut(&mut self) -> Option<&mut CodeEmitInfo> {
        Some(&mut self.info)
    }

    fn has_call(&self) -> bool {
        true
    }

    fn to_lir_string(&self) -> String {
        let args = self
            .args
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "call {:?} m#{:x}({args}) -> {}",
            self.kind, self.method.0, self.result
        )
        .to_lowercase()
    }
}

/// checkcast / instanceof / array store check. The three temps cover header
/// loads and secondary-supertype probing.
#[derive(Clone, Debug)]
pub struct TypeCheck {
    pub kind: TypeCheckKind,
    pub object: Operand,
    /// The destination array for [TypeCheckKind::StoreCheck], otherwise
    /// illegal.
    pub array: Operand,
    pub klass: ClassRef,
    pub tmp1: Operand,
    pub tmp2: Operand,
    pub tmp3: Operand,
    pub result: Operand,
    pub info: Option<CodeEmitInfo>,
    pub stub: Option<Box<CodeStub>>,
}

impl InstT for TypeCheck {
    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        visit_operand(&self.object, OperandRole::Input, v);
        visit_operand(&self.array, OperandRole::Input, v);
        visit_operand(&self.tmp1, OperandRole::Temp, v);
        visit_operand(&self.tmp2, OperandRole::Temp, v);
        visit_operand(&self.tmp3, OperandRole::Temp, v);
        visit_operand(&self.result, OperandRole::Output, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        map_operand(&mut self.object, OperandRole::Input, f);
        map_operand(&mut self.array, OperandRole::Input, f);
        map_operand(&mut self.tmp1, OperandRole::Temp, f);
        map_operand(&mut self.tmp2, OperandRole::Temp, f);
        map_operand(&mut self.tmp3, OperandRole::Temp, f);
        map_operand(&mut self.result, OperandRole::Output, f);
    }

    fn info(&self) -> Option<&CodeEmitInfo> {
        self.info.as_ref()
    }

    fn info_mut(&mut self) -> Option<&mut CodeEmitInfo> {
        self.info.as_mut()
    }

    fn stub(&self) -> Option<&CodeStub> {
        self.stub.as_deref()
    }

    fn take_stub(&mut self) -> Option<Box<CodeStub>> {
        self.stub.take()
    }

    fn to_lir_string(&self) -> String {
        format!(
            "{:?} {} k#{:x} -> {}",
            self.kind, self.object, self.klass.0, self.result
        )
        .to_lowercase()
    }
}

/// Monitor enter/exit. `lock` addresses the monitor's lock record in the
/// frame; `hdr` and `scratch` are clobbered by the header CAS sequence.
#[derive(Clone, Debug)]
pub struct Lock {
    pub kind: LockKind,
    pub obj: Operand,
    pub lock: Operand,
    pub hdr: Operand,
    pub scratch: Operand,
    pub info: Option<CodeEmitInfo>,
}

impl InstT for Lock {
    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        visit_operand(&self.obj, OperandRole::Input, v);
        visit_operand(&self.lock, OperandRole::Input, v);
        visit_operand(&self.hdr, OperandRole::Temp, v);
        visit_operand(&self.scratch, OperandRole::Temp, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        map_operand(&mut self.obj, OperandRole::Input, f);
        map_operand(&mut self.lock, OperandRole::Input, f);
        map_operand(&mut self.hdr, OperandRole::Temp, f);
        map_operand(&mut self.scratch, OperandRole::Temp, f);
    }

    fn info(&self) -> Option<&CodeEmitInfo> {
        self.info.as_ref()
    }

    fn info_mut(&mut self) -> Option<&mut CodeEmitInfo> {
        self.info.as_mut()
    }

    fn to_lir_string(&self) -> String {
        format!("{:?} {} [{}]", self.kind, self.obj, self.lock).to_lowercase()
    }
}

/// Array copy. The fast path falls back to a runtime call, which clobbers all
/// five logical operands and the temp: every one of them is input-and-temp,
/// never plain input.
#[derive(Clone, Debug)]
pub struct ArrayCopy {
    pub src: Operand,
    pub src_pos: Operand,
    pub dst: Operand,
    pub dst_pos: Operand,
    pub length: Operand,
    pub tmp: Operand,
    pub info: CodeEmitInfo,
    pub stub: Option<Box<CodeStub>>,
}

impl InstT for ArrayCopy {
    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        visit_operand(&self.src, OperandRole::InputAndTemp, v);
        visit_operand(&self.src_pos, OperandRole::InputAndTemp, v);
        visit_operand(&self.dst, OperandRole::InputAndTemp, v);
        visit_operand(&self.dst_pos, OperandRole::InputAndTemp, v);
        visit_operand(&self.length, OperandRole::InputAndTemp, v);
        visit_operand(&self.tmp, OperandRole::InputAndTemp, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        map_operand(&mut self.src, OperandRole::InputAndTemp, f);
        map_operand(&mut self.src_pos, OperandRole::InputAndTemp, f);
        map_operand(&mut self.dst, OperandRole::InputAndTemp, f);
        map_operand(&mut self.dst_pos, OperandRole::InputAndTemp, f);
        map_operand(&mut self.length, OperandRole::InputAndTemp, f);
        map_operand(&mut self.tmp, OperandRole::InputAndTemp, f);
    }

    fn info(&self) -> Option<&CodeEmitInfo> {
        Some(&self.info)
    }

    fn info_mut(&mut self) -> Option<&mut CodeEmitInfo> {
        Some(&mut self.info)
    }

    fn has_call(&self) -> bool {
        true
    }

    fn stub(&self) -> Option<&CodeStub> {
        self.stub.as_deref()
    }

    fn take_stub(&mut self) -> Option<Box<CodeStub>> {
        self.stub.take()
    }

    fn to_lir_string(&self) -> String {
        format!(
            "array_copy {}[{}] -> {}[{}] x {}",
            self.src, self.src_pos, self.dst, self.dst_pos, self.length
        )
    }
}

/// Atomic compare-and-swap on `addr`. Both value operands are clobbered by
/// the exchange sequence on common targets.
#[derive(Clone, Debug)]
pub struct CompareAndSwap {
    pub addr: Operand,
    pub cmp_value: Operand,
    pub new_value: Operand,
    pub tmp1: Operand,
    pub tmp2: Operand,
    pub result: Operand,
}

impl InstT for CompareAndSwap {
    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        visit_operand(&self.addr, OperandRole::Input, v);
        visit_operand(&self.cmp_value, OperandRole::InputAndTemp, v);
        visit_operand(&self.new_value, OperandRole::InputAndTemp, v);
        visit_operand(&self.tmp1, OperandRole::Temp, v);
        visit_operand(&self.tmp2, OperandRole::Temp, v);
        visit_operand(&self.result, OperandRole::Output, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        map_operand(&mut self.addr, OperandRole::Input, f);
        map_operand(&mut self.cmp_value, OperandRole::InputAndTemp, f);
        map_operand(&mut self.new_value, OperandRole::InputAndTemp, f);
        map_operand(&mut self.tmp1, OperandRole::Temp, f);
        map_operand(&mut self.tmp2, OperandRole::Temp, f);
        map_operand(&mut self.result, OperandRole::Output, f);
    }

    fn to_lir_string(&self) -> String {
        format!(
            "cas {} {} -> {} ? {}",
            self.addr, self.cmp_value, self.new_value, self.result
        )
    }
}

/// An opaque target-extension snippet: the target layer knows what `id` means;
/// the core only needs its operand usage so the allocator contract holds.
#[derive(Clone, Debug)]
pub struct Snippet {
    pub id: u32,
    pub inputs: SmallVec<[Operand; 4]>,
    pub temps: SmallVec<[Operand; 2]>,
    pub result: Operand,
    pub info: Option<CodeEmitInfo>,
}

impl InstT for Snippet {
    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        for op in &self.inputs {
            visit_operand(op, OperandRole::Input, v);
        }
        for op in &self.temps {
            visit_operand(op, OperandRole::Temp, v);
        }
        visit_operand(&self.result, OperandRole::Output, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        for op in &mut self.inputs {
            map_operand(op, OperandRole::Input, f);
        }
        for op in &mut self.temps {
            map_operand(op, OperandRole::Temp, f);
        }
        map_operand(&mut self.result, OperandRole::Output, f);
    }

    fn info(&self) -> Option<&CodeEmitInfo> {
        self.info.as_ref()
    }

    fn info_mut(&mut self) -> Option<&mut CodeEmitInfo> {
        self.info.as_mut()
    }

    fn to_lir_string(&self) -> String {
        format!("snippet #{} -> {}", self.id, self.result)
    }
}
