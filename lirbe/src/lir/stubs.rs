//! Out-of-line slow-path code stubs.
//!
//! A stub is referenced from the fast path by a branch to its entry label and
//! emitted once per method after the main block stream. Stubs that resume the
//! fast path also carry a continuation label; throwing stubs have none. Both
//! labels must be bound by the time method code generation completes: a
//! dangling stub label is a compiler bug, not a user-visible error.
//!
//! Stubs participate in the operand protocol as "slow cases": their operand
//! usage is reported to the allocator through the owning instruction's
//! [VisitState](crate::lir::visit::VisitState) without being treated as inline
//! code.

use crate::{
    debuginfo::CodeEmitInfo,
    lir::{
        inst::ConvertOp,
        operand::Operand,
        visit::{map_operand, visit_operand, OperandRole, OperandVisitor},
        LabelIdx,
    },
};
use enum_dispatch::enum_dispatch;
use strum::EnumDiscriminants;

#[enum_dispatch]
pub trait CodeStubT {
    /// The label the fast path branches to.
    fn entry(&self) -> LabelIdx;

    /// The label the stub jumps back to, or `None` for stubs that always
    /// throw.
    fn continuation(&self) -> Option<LabelIdx>;

    /// Report the operands the stub needs to regenerate its slow path.
    fn visit_operands(&self, v: &mut dyn OperandVisitor);

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>);

    /// Debug info for the runtime call / throw inside the stub.
    fn info(&self) -> Option<&CodeEmitInfo> {
        None
    }
}

#[enum_dispatch(CodeStubT)]
#[derive(Clone, Debug, EnumDiscriminants)]
#[strum_discriminants(name(StubKind))]
#[strum_discriminants(derive(Hash))]
pub enum CodeStub {
    ArrayCopyStub(ArrayCopyStub),
    ArrayStoreExceptionStub(ArrayStoreExceptionStub),
    ConversionStub(ConversionStub),
    NullCheckStub(NullCheckStub),
    DivByZeroStub(DivByZeroStub),
    RangeCheckStub(RangeCheckStub),
}

/// Fallback to the generic runtime arraycopy when the inline fast path
/// detects an incompatible shape.
#[derive(Clone, Debug)]
pub struct ArrayCopyStub {
    pub entry: LabelIdx,
    pub continuation: LabelIdx,
    pub src: Operand,
    pub src_pos: Operand,
    pub dst: Operand,
    pub dst_pos: Operand,
    pub length: Operand,
    pub info: CodeEmitInfo,
}

impl CodeStubT for ArrayCopyStub {
    fn entry(&self) -> LabelIdx {
        self.entry
    }

    fn continuation(&self) -> Option<LabelIdx> {
        Some(self.continuation)
    }

    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        visit_operand(&self.src, OperandRole::Input, v);
        visit_operand(&self.src_pos, OperandRole::Input, v);
        visit_operand(&self.dst, OperandRole::Input, v);
        visit_operand(&self.dst_pos, OperandRole::Input, v);
        visit_operand(&self.length, OperandRole::Input, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        map_operand(&mut self.src, OperandRole::Input, f);
        map_operand(&mut self.src_pos, OperandRole::Input, f);
        map_operand(&mut self.dst, OperandRole::Input, f);
        map_operand(&mut self.dst_pos, OperandRole::Input, f);
        map_operand(&mut self.length, OperandRole::Input, f);
    }

    fn info(&self) -> Option<&CodeEmitInfo> {
        Some(&self.info)
    }
}

/// Throws ArrayStoreException; reached from a failed store check.
#[derive(Clone, Debug)]
pub struct ArrayStoreExceptionStub {
    pub entry: LabelIdx,
    pub info: CodeEmitInfo,
}

impl CodeStubT for ArrayStoreExceptionStub {
    fn entry(&self) -> LabelIdx {
        self.entry
    }

    fn continuation(&self) -> Option<LabelIdx> {
        None
    }

    fn visit_operands(&self, _v: &mut dyn OperandVisitor) {}

    fn map_operands(&mut self, _f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {}

    fn info(&self) -> Option<&CodeEmitInfo> {
        Some(&self.info)
    }
}

/// Out-of-range float-to-integer conversion slow path.
#[derive(Clone, Debug)]
pub struct ConversionStub {
    pub entry: LabelIdx,
    pub continuation: LabelIdx,
    pub op: ConvertOp,
    pub value: Operand,
    pub result: Operand,
}

impl CodeStubT for ConversionStub {
    fn entry(&self) -> LabelIdx {
        self.entry
    }

    fn continuation(&self) -> Option<LabelIdx> {
        Some(self.continuation)
    }

    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        visit_operand(&self.value, OperandRole::Input, v);
        visit_operand(&self.result, OperandRole::Output, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        map_operand(&mut self.value, OperandRole::Input, f);
        map_operand(&mut self.result, OperandRole::Output, f);
    }
}

/// Throws NullPointerException for an explicit or implicit null check.
#[derive(Clone, Debug)]
pub struct NullCheckStub {
    pub entry: LabelIdx,
    pub info: CodeEmitInfo,
}

impl CodeStubT for NullCheckStub {
    fn entry(&self) -> LabelIdx {
        self.entry
    }

    fn continuation(&self) -> Option<LabelIdx> {
        None
    }

    fn visit_operands(&self, _v: &mut dyn OperandVisitor) {}

    fn map_operands(&mut self, _f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {}

    fn info(&self) -> Option<&CodeEmitInfo> {
        Some(&self.info)
    }
}

/// Throws ArithmeticException on integer division by zero.
#[derive(Clone, Debug)]
pub struct DivByZeroStub {
    pub entry: LabelIdx,
    pub info: CodeEmitInfo,
}

impl CodeStubT for DivByZeroStub {
    fn entry(&self) -> LabelIdx {
        self.entry
    }

    fn continuation(&self) -> Option<LabelIdx> {
        None
    }

    fn visit_operands(&self, _v: &mut dyn OperandVisitor) {}

    fn map_operands(&mut self, _f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {}

    fn info(&self) -> Option<&CodeEmitInfo> {
        Some(&self.info)
    }
}

/// Throws ArrayIndexOutOfBoundsException; keeps the failing index so the
/// exception can carry it.
#[derive(Clone, Debug)]
pub struct RangeCheckStub {
    pub entry: LabelIdx,
    pub index: Operand,
    pub info: CodeEmitInfo,
}

impl CodeStubT for RangeCheckStub {
    fn entry(&self) -> LabelIdx {
        self.entry
    }

    fn continuation(&self) -> Option<LabelIdx> {
        None
    }

    fn visit_operands(&self, v: &mut dyn OperandVisitor) {
        visit_operand(&self.index, OperandRole::Input, v);
    }

    fn map_operands(&mut self, f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>) {
        map_operand(&mut self.index, OperandRole::Input, f);
    }

    fn info(&self) -> Option<&CodeEmitInfo> {
        Some(&self.info)
    }
}
