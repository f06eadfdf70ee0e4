//! # Instructions
//!
//! This module defines the instruction kinds of the legalization IR.
//! Instructions perform computations; control flow is expressed by the
//! structured [`CfNode`](crate::CfNode) tree that owns the blocks.

use smallvec::SmallVec;

use crate::{BindingId, BlockId, PrettyPrint, Source, ValueId};

/// A bit-exact 32-bit float constant
///
/// Stored as raw bits so instructions stay `Eq + Hash` for CSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Constant(u32);

impl Constant {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(0x3f80_0000);

    pub fn from_f32(value: f32) -> Self {
        Self(value.to_bits())
    }

    pub fn value(self) -> f32 {
        f32::from_bits(self.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// Arithmetic opcodes
///
/// There is no boolean type: comparisons produce `0.0` or `1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Mov,
    Neg,
    Abs,
    Floor,
    Add,
    Mul,
    Min,
    Max,
    /// `a >= b ? 1.0 : 0.0`
    Sge,
    /// `a < b ? 1.0 : 0.0`
    Slt,
    /// `a == b ? 1.0 : 0.0`
    Seq,
    /// `a != b ? 1.0 : 0.0`
    Sne,
    /// `p != 0 ? t : f`
    Csel,
    /// `p >= 0 ? t : f`
    CselGe,
    /// `p > 0 ? t : f`
    CselGt,
    /// `near + factor * (far - near)`, sources are `[near, far, factor]`
    Lerp,
}

impl AluOp {
    pub const fn arity(self) -> usize {
        match self {
            Self::Mov | Self::Neg | Self::Abs | Self::Floor => 1,
            Self::Add
            | Self::Mul
            | Self::Min
            | Self::Max
            | Self::Sge
            | Self::Slt
            | Self::Seq
            | Self::Sne => 2,
            Self::Csel | Self::CselGe | Self::CselGt | Self::Lerp => 3,
        }
    }

    /// Returns true for the 0/1-producing comparison opcodes
    pub const fn is_comparison(self) -> bool {
        matches!(self, Self::Sge | Self::Slt | Self::Seq | Self::Sne)
    }

    /// Returns true for the 3-source conditional selects
    pub const fn is_select(self) -> bool {
        matches!(self, Self::Csel | Self::CselGe | Self::CselGt)
    }

    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Mul | Self::Min | Self::Max | Self::Seq | Self::Sne
        )
    }

    /// Evaluates the opcode on already-modified scalar operands
    ///
    /// Follows the fixed-function ALU rather than IEEE 754: zero times
    /// anything is zero (including infinity), lerp returns its endpoints
    /// exactly at factors 0 and 1, and signed zeros are not distinguished.
    pub fn evaluate(self, args: &[f32]) -> f32 {
        let b2f = |b: bool| if b { 1.0 } else { 0.0 };
        let mul = |a: f32, b: f32| if a == 0.0 || b == 0.0 { 0.0 } else { a * b };
        match self {
            Self::Mov => args[0],
            Self::Neg => -args[0],
            Self::Abs => args[0].abs(),
            Self::Floor => args[0].floor(),
            Self::Add => args[0] + args[1],
            Self::Mul => mul(args[0], args[1]),
            Self::Min => args[0].min(args[1]),
            Self::Max => args[0].max(args[1]),
            Self::Sge => b2f(args[0] >= args[1]),
            Self::Slt => b2f(args[0] < args[1]),
            Self::Seq => b2f(args[0] == args[1]),
            Self::Sne => b2f(args[0] != args[1]),
            Self::Csel => {
                if args[0] != 0.0 {
                    args[1]
                } else {
                    args[2]
                }
            }
            Self::CselGe => {
                if args[0] >= 0.0 {
                    args[1]
                } else {
                    args[2]
                }
            }
            Self::CselGt => {
                if args[0] > 0.0 {
                    args[1]
                } else {
                    args[2]
                }
            }
            Self::Lerp => match args[2] {
                f if f == 0.0 => args[0],
                f if f == 1.0 => args[1],
                f => args[0] + mul(f, args[1] - args[0]),
            },
        }
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Mov => "mov",
            Self::Neg => "neg",
            Self::Abs => "abs",
            Self::Floor => "floor",
            Self::Add => "add",
            Self::Mul => "mul",
            Self::Min => "min",
            Self::Max => "max",
            Self::Sge => "sge",
            Self::Slt => "slt",
            Self::Seq => "seq",
            Self::Sne => "sne",
            Self::Csel => "csel",
            Self::CselGe => "csel_ge",
            Self::CselGt => "csel_gt",
            Self::Lerp => "lerp",
        }
    }
}

/// The storage a load intrinsic reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// A vec4 slot of a uniform binding
    UniformVec4(BindingId),
    /// A vertex attribute
    Input,
    /// A varying interpolated across the primitive
    InterpolatedInput,
    /// The immediate constant file
    Constant,
}

/// An instruction with the block it currently lives in
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub block: BlockId,
}

/// The different kinds of instructions
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstructionKind {
    /// `dest = op sources...`
    Alu {
        op: AluOp,
        dest: ValueId,
        sources: SmallVec<[Source; 3]>,
    },

    /// `dest = value`
    Const { dest: ValueId, value: Constant },

    /// Reads `width` components starting at `component` from vec4 slot
    /// `base + floor(index)` of `resource`
    Load {
        dest: ValueId,
        resource: Resource,
        base: u32,
        index: Option<Source>,
        component: u8,
        width: u8,
    },

    /// Writes an output slot, the only side effect in the IR
    Store { location: u32, value: Source },

    /// Control-flow merge
    Phi {
        dest: ValueId,
        sources: SmallVec<[Source; 2]>,
    },

    /// An undefined value
    Undef { dest: ValueId },
}

impl InstructionKind {
    /// Creates an ALU instruction
    pub fn alu(op: AluOp, dest: ValueId, sources: &[Source]) -> Self {
        debug_assert_eq!(sources.len(), op.arity());
        Self::Alu {
            op,
            dest,
            sources: SmallVec::from_slice(sources),
        }
    }

    pub fn constant(dest: ValueId, value: f32) -> Self {
        Self::Const {
            dest,
            value: Constant::from_f32(value),
        }
    }

    /// Creates a single-component load at a constant slot
    pub const fn load(dest: ValueId, resource: Resource, base: u32, component: u8) -> Self {
        Self::Load {
            dest,
            resource,
            base,
            index: None,
            component,
            width: 1,
        }
    }

    pub fn phi(dest: ValueId, sources: &[Source]) -> Self {
        Self::Phi {
            dest,
            sources: SmallVec::from_slice(sources),
        }
    }

    /// Returns the definition produced by this instruction
    pub const fn destination(&self) -> Option<ValueId> {
        match self {
            Self::Alu { dest, .. }
            | Self::Const { dest, .. }
            | Self::Load { dest, .. }
            | Self::Phi { dest, .. }
            | Self::Undef { dest } => Some(*dest),
            Self::Store { .. } => None,
        }
    }

    /// Number of components of the produced definition
    pub const fn components(&self) -> u8 {
        match self {
            Self::Load { width, .. } => *width,
            _ => 1,
        }
    }

    pub fn sources(&self) -> SmallVec<[&Source; 3]> {
        match self {
            Self::Alu { sources, .. } => sources.iter().collect(),
            Self::Load { index, .. } => index.iter().collect(),
            Self::Store { value, .. } => {
                let mut out = SmallVec::new();
                out.push(value);
                out
            }
            Self::Phi { sources, .. } => sources.iter().collect(),
            Self::Const { .. } | Self::Undef { .. } => SmallVec::new(),
        }
    }

    pub fn sources_mut(&mut self) -> SmallVec<[&mut Source; 3]> {
        match self {
            Self::Alu { sources, .. } => sources.iter_mut().collect(),
            Self::Load { index, .. } => index.iter_mut().collect(),
            Self::Store { value, .. } => {
                let mut out = SmallVec::new();
                out.push(value);
                out
            }
            Self::Phi { sources, .. } => sources.iter_mut().collect(),
            Self::Const { .. } | Self::Undef { .. } => SmallVec::new(),
        }
    }

    /// Returns true if removing this instruction is observable
    pub const fn has_side_effects(&self) -> bool {
        matches!(self, Self::Store { .. })
    }

    /// Returns true if the instruction may be executed unconditionally
    /// without changing program behavior
    pub const fn is_speculatable(&self) -> bool {
        matches!(
            self,
            Self::Alu { .. } | Self::Const { .. } | Self::Load { .. } | Self::Undef { .. }
        )
    }

    pub const fn is_phi(&self) -> bool {
        matches!(self, Self::Phi { .. })
    }

    /// Returns the constant value if this is a `Const`
    pub fn as_constant(&self) -> Option<f32> {
        match self {
            Self::Const { value, .. } => Some(value.value()),
            _ => None,
        }
    }

    /// Replaces the destination, used when cloning instructions
    pub fn set_destination(&mut self, new_dest: ValueId) {
        match self {
            Self::Alu { dest, .. }
            | Self::Const { dest, .. }
            | Self::Load { dest, .. }
            | Self::Phi { dest, .. }
            | Self::Undef { dest } => *dest = new_dest,
            Self::Store { .. } => {}
        }
    }
}

impl PrettyPrint for InstructionKind {
    fn pretty_print(&self, _indent: usize) -> String {
        let join = |sources: &[Source]| {
            sources
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            Self::Alu { op, dest, sources } => {
                format!("%{} = {} {}", dest.index(), op.mnemonic(), join(sources))
            }
            Self::Const { dest, value } => format!("%{} = const {:?}", dest.index(), value.value()),
            Self::Load {
                dest,
                resource,
                base,
                index,
                component,
                width,
            } => {
                let resource = match resource {
                    Resource::UniformVec4(binding) => format!("uniform{}", binding.index()),
                    Resource::Input => "input".to_string(),
                    Resource::InterpolatedInput => "varying".to_string(),
                    Resource::Constant => "const_file".to_string(),
                };
                let slot = match index {
                    Some(index) => format!("{base} + {index}"),
                    None => base.to_string(),
                };
                format!(
                    "%{} = load {resource}[{slot}] c{component}..{}",
                    dest.index(),
                    component + width
                )
            }
            Self::Store { location, value } => format!("store out{location}, {value}"),
            Self::Phi { dest, sources } => format!("%{} = phi {}", dest.index(), join(sources)),
            Self::Undef { dest } => format!("%{} = undef", dest.index()),
        }
    }
}
