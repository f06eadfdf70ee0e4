//! # Modifier-Chain Resolver
//!
//! Walks from a source back through `Neg`/`Abs` instructions to the
//! instruction that really produces the value, and names it with a stable
//! [`Identity`]. Two sources with equal identities read the same temporary.

use crate::{AluOp, InstructionKind, Program, Resource, Source, Use, ValueId};

/// The resolved identity of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    /// The underlying producing definition
    Definition(ValueId),
    /// An instance-specific identity that never equals any other
    Opaque(u32),
}

/// Resolves sources to identities
///
/// Each resolver hands out fresh opaque identities, so identities are only
/// comparable when they come from the same resolver.
#[derive(Debug, Default)]
pub struct ModifierChainResolver {
    next_opaque: u32,
}

impl ModifierChainResolver {
    pub const fn new() -> Self {
        Self { next_opaque: 0 }
    }

    /// Resolves a source, or `None` when its producer is unknown or undefined
    pub fn resolve(&mut self, program: &Program, source: Source) -> Option<Identity> {
        let mut value = source.value;

        loop {
            let (_, instr) = program.producer(value)?;
            match &instr.kind {
                // Copy propagation cannot be assumed to have merged these.
                InstructionKind::Load {
                    resource: Resource::UniformVec4(_),
                    index: Some(index),
                    ..
                } if program.constant_value(*index).is_none() => return Some(self.opaque()),
                InstructionKind::Load { .. } if Self::feeds_phi(program, value) => {
                    return Some(self.opaque());
                }
                // Assume the worst when a control-flow merge is involved.
                InstructionKind::Phi { .. } => return Some(self.opaque()),
                InstructionKind::Alu {
                    op: AluOp::Neg | AluOp::Abs,
                    sources,
                    ..
                } => value = sources.first()?.value,
                InstructionKind::Undef { .. } => return None,
                InstructionKind::Alu { .. }
                | InstructionKind::Const { .. }
                | InstructionKind::Load { .. } => return Some(Identity::Definition(value)),
                InstructionKind::Store { .. } => return None,
            }
        }
    }

    fn opaque(&mut self) -> Identity {
        let id = self.next_opaque;
        self.next_opaque += 1;
        Identity::Opaque(id)
    }

    fn feeds_phi(program: &Program, value: ValueId) -> bool {
        program.definition(value).is_some_and(|def| {
            def.uses.iter().any(|user| match user {
                Use::Instr(id) => program
                    .instruction(*id)
                    .is_some_and(|instr| instr.kind.is_phi()),
                Use::IfCondition(_) => false,
            })
        })
    }
}
