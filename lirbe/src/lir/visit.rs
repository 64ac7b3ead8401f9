//! The allocator-facing operand protocol.
//!
//! Every instruction exposes its operands, each tagged with a role, through
//! [InstT::visit_operands](crate::lir::InstT::visit_operands); the role
//! classification is fixed at construction time per instruction kind and the
//! register allocator depends on never missing an operand. Constants and stack
//! slots are not reported (they need no register assignment), and address
//! operands are decomposed into their base/index constituents so the allocator
//! can bind them independently of the address wrapper.
//!
//! Reading is [VisitState::analyze]; writing (the allocator substituting
//! resolved locations for variables) is
//! [InstT::map_operands](crate::lir::InstT::map_operands), which walks the
//! same operand slots in the same fixed order.

use crate::lir::operand::Operand;
use smallvec::SmallVec;

/// How an instruction treats one of its operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperandRole {
    /// Read by the instruction.
    Input,
    /// Clobbered by the instruction without being read.
    Temp,
    /// Both consumed and clobbered: the allocator must not assign it a
    /// location that must survive the instruction.
    InputAndTemp,
    /// Written by the instruction (the result slot).
    Output,
}

/// Receives each allocator-relevant operand of an instruction in turn.
pub trait OperandVisitor {
    fn visit(&mut self, op: &Operand, role: OperandRole);
}

/// Report `op` to `v` with role `role`, decomposing addresses and skipping
/// operands that need no register assignment.
///
/// Address constituents are always inputs, even when the address itself sits
/// in an output slot (a store still *reads* base and index).
pub(crate) fn visit_operand(op: &Operand, role: OperandRole, v: &mut dyn OperandVisitor) {
    match op {
        Operand::Illegal | Operand::Const(_) | Operand::Stack { .. } => (),
        Operand::Addr(a) => {
            visit_operand(&a.base, OperandRole::Input, v);
            visit_operand(&a.index, OperandRole::Input, v);
        }
        Operand::Reg { .. } | Operand::Var { .. } => v.visit(op, role),
    }
}

/// The replace-mode counterpart of [visit_operand]: offer `op` to `f` and
/// overwrite it with the returned operand, recursing into address
/// constituents. Re-reading an address after its base/index have been
/// rewritten re-synthesizes the resolved address, which is exactly the
/// contract the allocator relies on.
pub(crate) fn map_operand(
    op: &mut Operand,
    role: OperandRole,
    f: &mut dyn FnMut(&Operand, OperandRole) -> Option<Operand>,
) {
    match op {
        Operand::Illegal | Operand::Const(_) | Operand::Stack { .. } => (),
        Operand::Addr(a) => {
            map_operand(&mut a.base, OperandRole::Input, f);
            map_operand(&mut a.index, OperandRole::Input, f);
        }
        Operand::Reg { .. } | Operand::Var { .. } => {
            if let Some(new) = f(op, role) {
                *op = new;
            }
        }
    }
}

/// The ordered per-instruction operand lists the register allocator reads.
/// Grouped as plain-input / input-and-temp / temp-only / output, preserving
/// visit order within each group.
#[derive(Debug, Default)]
pub struct VisitState {
    pub inputs: SmallVec<[Operand; 4]>,
    pub input_temps: SmallVec<[Operand; 4]>,
    pub temps: SmallVec<[Operand; 2]>,
    pub outputs: SmallVec<[Operand; 1]>,
    pub has_info: bool,
    pub has_call: bool,
    pub has_stub: bool,
}

impl VisitState {
    /// Classify every operand of `inst`, including those of its slow-case
    /// stub (the stub is out-of-line code, but its operand usage must still be
    /// accounted for).
    pub fn analyze(inst: &crate::lir::Inst) -> VisitState {
        use crate::lir::InstT;
        let mut vs = VisitState::default();
        inst.visit_operands(&mut vs);
        if let Some(stub) = inst.stub() {
            use crate::lir::stubs::CodeStubT;
            stub.visit_operands(&mut vs);
            vs.has_stub = true;
        }
        vs.has_info = inst.info().is_some();
        vs.has_call = inst.has_call();
        vs
    }

    /// Total number of operands reported, across all roles.
    pub fn total_operands(&self) -> usize {
        self.inputs.len() + self.input_temps.len() + self.temps.len() + self.outputs.len()
    }
}

impl OperandVisitor for VisitState {
    fn visit(&mut self, op: &Operand, role: OperandRole) {
        match role {
            OperandRole::Input => self.inputs.push(op.clone()),
            OperandRole::InputAndTemp => self.input_temps.push(op.clone()),
            OperandRole::Temp => self.temps.push(op.clone()),
            OperandRole::Output => self.outputs.push(op.clone()),
        }
    }
}
