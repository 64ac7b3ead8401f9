//! LIR operands.
//!
//! An [Operand] is an immutable value carrier: a physical register, a virtual
//! register (a [VarIdx], unresolved until register allocation), a stack slot, a
//! constant, or a memory address expression. "Resolving" a variable to a
//! concrete register or slot never mutates an [Operand]: the allocator rewrites
//! the operand slots inside the owning instruction (see
//! [crate::lir::visit]).
//!
//! The kind-specific accessors assert their predicate: calling [Operand::reg]
//! on a constant is a bug in the caller, not a recoverable condition.

use crate::target::{ObjectRef, Reg};
use std::fmt;
use strum::Display;

index_vec::define_index_type! {
    /// A virtual register number, assigned during lowering and resolved by the
    /// register allocator.
    pub struct VarIdx = u32;
}

/// The primitive kind a value carries. This is the type vocabulary of the
/// whole backend: operand widths, move semantics, scope-value encodings and
/// default address scales all key off it.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Double,
    Object,
}

impl ValueKind {
    /// Size in bytes on a target with `word_size`-byte words.
    pub fn size_in_bytes(self, word_size: u32) -> u32 {
        match self {
            ValueKind::Int | ValueKind::Float => 4,
            ValueKind::Long | ValueKind::Double => 8,
            ValueKind::Object => word_size,
        }
    }

    /// Number of 32-bit slots the kind occupies in a value stack / locals
    /// array.
    pub fn slots(self) -> u32 {
        match self {
            ValueKind::Long | ValueKind::Double => 2,
            _ => 1,
        }
    }

    pub fn is_float_kind(self) -> bool {
        matches!(self, ValueKind::Float | ValueKind::Double)
    }
}

/// A constant operand. Floats and doubles are stored as bit patterns so that
/// operands are `Eq` and NaNs survive untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(u32),
    Double(u64),
    Object(ObjectRef),
}

impl Constant {
    pub fn kind(&self) -> ValueKind {
        match self {
            Constant::Int(_) => ValueKind::Int,
            Constant::Long(_) => ValueKind::Long,
            Constant::Float(_) => ValueKind::Float,
            Constant::Double(_) => ValueKind::Double,
            Constant::Object(_) => ValueKind::Object,
        }
    }

    pub fn as_int(&self) -> i32 {
        match self {
            Constant::Int(v) => *v,
            _ => panic!("not an int constant: {self:?}"),
        }
    }

    pub fn as_long(&self) -> i64 {
        match self {
            Constant::Long(v) => *v,
            _ => panic!("not a long constant: {self:?}"),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(v) => write!(f, "{v}i32"),
            Constant::Long(v) => write!(f, "{v}i64"),
            Constant::Float(v) => write!(f, "{}f32", f32::from_bits(*v)),
            Constant::Double(v) => write!(f, "{}f64", f64::from_bits(*v)),
            Constant::Object(o) => write!(f, "obj#{:x}", o.0),
        }
    }
}

/// The multiplier applied to an address's index operand. Constructing an
/// [Address] with an index requires an explicit scale; the target layer knows
/// the default scale for each element kind (see
/// [Scale::for_element_size]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scale {
    Times1 = 0,
    Times2 = 1,
    Times4 = 2,
    Times8 = 3,
}

impl Scale {
    /// The scale matching an element of `size` bytes.
    pub fn for_element_size(size: u32) -> Scale {
        match size {
            1 => Scale::Times1,
            2 => Scale::Times2,
            4 => Scale::Times4,
            8 => Scale::Times8,
            _ => panic!("no scale for element size {size}"),
        }
    }

    pub fn multiplier(self) -> u32 {
        1 << (self as u32)
    }
}

/// A memory address expression: `base + index * scale + displacement`.
///
/// The base and index are full [Operand]s so that, pre-allocation, they can be
/// virtual registers. The operand visitor descends into them individually
/// (they need separate register assignments); after the allocator rewrites
/// them in place, re-reading the address yields the resolved form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    pub base: Operand,
    /// [Operand::Illegal] when the address has no index component.
    pub index: Operand,
    pub scale: Scale,
    pub disp: i32,
    /// The kind of the element being accessed.
    pub kind: ValueKind,
}

impl Address {
    pub fn base_disp(base: Operand, disp: i32, kind: ValueKind) -> Self {
        assert!(base.is_register() || base.is_variable());
        Self {
            base,
            index: Operand::Illegal,
            scale: Scale::Times1,
            disp,
            kind,
        }
    }

    pub fn new(base: Operand, index: Operand, scale: Scale, disp: i32, kind: ValueKind) -> Self {
        assert!(base.is_register() || base.is_variable());
        assert!(index.is_illegal() || index.is_register() || index.is_variable());
        Self {
            base,
            index,
            scale,
            disp,
            kind,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.base)?;
        if !self.index.is_illegal() {
            write!(f, " + {}*{}", self.index, self.scale.multiplier())?;
        }
        if self.disp != 0 {
            write!(f, " + {}", self.disp)?;
        }
        write!(f, "]: {}", self.kind)
    }
}

/// The operand tagged union. See the module docs for the resolution contract.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
    /// The "no operand" sentinel: a missing result, an absent address index.
    Illegal,
    /// A fixed physical register.
    Reg {
        reg: Reg,
        kind: ValueKind,
        /// Set by [Operand::to_last_use]: this is the final read of the
        /// register's current value, so the allocator may treat it as killed.
        last_use: bool,
    },
    /// A virtual register, unresolved until allocation.
    Var {
        idx: VarIdx,
        kind: ValueKind,
        last_use: bool,
    },
    /// A frame-relative stack slot. Non-negative slots index the spill /
    /// outgoing area; negative slots index the incoming argument area.
    Stack { slot: i32, kind: ValueKind },
    Const(Constant),
    Addr(Box<Address>),
}

impl Operand {
    pub fn reg_of(reg: Reg, kind: ValueKind) -> Operand {
        Operand::Reg {
            reg,
            kind,
            last_use: false,
        }
    }

    pub fn var(idx: VarIdx, kind: ValueKind) -> Operand {
        Operand::Var {
            idx,
            kind,
            last_use: false,
        }
    }

    pub fn stack(slot: i32, kind: ValueKind) -> Operand {
        Operand::Stack { slot, kind }
    }

    pub fn int(v: i32) -> Operand {
        Operand::Const(Constant::Int(v))
    }

    pub fn long(v: i64) -> Operand {
        Operand::Const(Constant::Long(v))
    }

    pub fn object(o: ObjectRef) -> Operand {
        Operand::Const(Constant::Object(o))
    }

    pub fn addr(a: Address) -> Operand {
        Operand::Addr(Box::new(a))
    }

    pub fn is_illegal(&self) -> bool {
        matches!(self, Operand::Illegal)
    }

    pub fn is_register(&self) -> bool {
        matches!(self, Operand::Reg { .. })
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Operand::Var { .. })
    }

    pub fn is_stack(&self) -> bool {
        matches!(self, Operand::Stack { .. })
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Operand::Const(_))
    }

    pub fn is_address(&self) -> bool {
        matches!(self, Operand::Addr(_))
    }

    /// Is this operand one the register allocator must assign a location to?
    pub fn needs_allocation(&self) -> bool {
        self.is_register() || self.is_variable()
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Operand::Reg { kind, .. } | Operand::Var { kind, .. } | Operand::Stack { kind, .. } => {
                *kind
            }
            Operand::Const(c) => c.kind(),
            Operand::Addr(a) => a.kind,
            Operand::Illegal => panic!("illegal operand has no kind"),
        }
    }

    pub fn reg(&self) -> Reg {
        match self {
            Operand::Reg { reg, .. } => *reg,
            _ => panic!("not a register operand: {self}"),
        }
    }

    pub fn var_idx(&self) -> VarIdx {
        match self {
            Operand::Var { idx, .. } => *idx,
            _ => panic!("not a variable operand: {self}"),
        }
    }

    pub fn stack_slot(&self) -> i32 {
        match self {
            Operand::Stack { slot, .. } => *slot,
            _ => panic!("not a stack operand: {self}"),
        }
    }

    pub fn constant(&self) -> &Constant {
        match self {
            Operand::Const(c) => c,
            _ => panic!("not a constant operand: {self}"),
        }
    }

    pub fn address(&self) -> &Address {
        match self {
            Operand::Addr(a) => a,
            _ => panic!("not an address operand: {self}"),
        }
    }

    pub fn is_last_use(&self) -> bool {
        match self {
            Operand::Reg { last_use, .. } | Operand::Var { last_use, .. } => *last_use,
            _ => false,
        }
    }

    /// A copy of this operand flagged as the final use of its register. Only
    /// meaningful for register and variable operands.
    pub fn to_last_use(&self) -> Operand {
        match self {
            Operand::Reg { reg, kind, .. } => Operand::Reg {
                reg: *reg,
                kind: *kind,
                last_use: true,
            },
            Operand::Var { idx, kind, .. } => Operand::Var {
                idx: *idx,
                kind: *kind,
                last_use: true,
            },
            _ => panic!("last-use flag only applies to register operands: {self}"),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Illegal => write!(f, "-"),
            Operand::Reg { reg, kind, .. } => write!(f, "{reg}: {kind}"),
            Operand::Var { idx, kind, .. } => write!(f, "v{}: {kind}", usize::from(*idx)),
            Operand::Stack { slot, kind } => {
                if *slot < 0 {
                    write!(f, "arg[{}]: {kind}", -(*slot) - 1)
                } else {
                    write!(f, "stack[{slot}]: {kind}")
                }
            }
            Operand::Const(c) => write!(f, "{c}"),
            Operand::Addr(a) => write!(f, "{a}"),
        }
    }
}
