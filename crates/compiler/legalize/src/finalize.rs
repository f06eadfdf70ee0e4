//! # Finalizer and Control-Flow Acceptance Gate
//!
//! Runs once the pass set has converged:
//!
//! 1. [`finalize`] removes uniform bindings no live load reads and checks
//!    the program invariants. Image and sampler bindings are always kept,
//!    a later shader-variant re-derivation may need them.
//! 2. [`check_control_flow`] inspects the top-level shape and rejects any
//!    region that survived flattening.

use rustc_hash::FxHashSet;

use crate::{
    BindingId, BindingKind, CfNode, ControlFlowRejection, InstructionKind, LegalizeError,
    LegalizeResult, Program, Resource,
};

/// Binding counts consumed by code generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FinalizeSummary {
    /// Surviving uniform bindings, for constant-buffer layout
    pub uniform_bindings: usize,
    /// Whether an image or sampler binding survived, for descriptor tables
    pub has_image_or_sampler: bool,
}

impl FinalizeSummary {
    /// Counts the bindings currently declared by `program`
    pub fn of(program: &Program) -> Self {
        program
            .bindings()
            .fold(Self::default(), |mut summary, (_, binding)| {
                match binding.kind {
                    BindingKind::Uniform { .. } => summary.uniform_bindings += 1,
                    BindingKind::Image | BindingKind::Sampler => {
                        summary.has_image_or_sampler = true;
                    }
                }
                summary
            })
    }
}

/// Prunes unused uniform bindings and validates the program
pub fn finalize(program: &mut Program) -> LegalizeResult<FinalizeSummary> {
    let referenced: FxHashSet<BindingId> = program
        .live_instructions()
        .filter_map(|(_, instr)| match instr.kind {
            InstructionKind::Load {
                resource: Resource::UniformVec4(binding),
                ..
            } => Some(binding),
            _ => None,
        })
        .collect();

    let unused: Vec<BindingId> = program
        .bindings()
        .filter(|(id, binding)| !binding.is_externally_observable() && !referenced.contains(id))
        .map(|(id, _)| id)
        .collect();

    for id in unused {
        if let Some(binding) = program.remove_binding(id) {
            tracing::debug!(
                program = %program.name,
                binding = %binding.name,
                "removed unused uniform binding"
            );
        }
    }

    program
        .validate()
        .map_err(LegalizeError::MalformedProgram)?;

    Ok(FinalizeSummary::of(program))
}

/// Classifies the node that follows the entry block, if any
pub fn check_control_flow(program: &Program) -> Result<(), ControlFlowRejection> {
    let Some(CfNode::Block(_)) = program.body().first() else {
        return Err(ControlFlowRejection::Unknown);
    };
    match program.body().get(1) {
        None => Ok(()),
        Some(CfNode::If(_)) => Err(ControlFlowRejection::IfRegion),
        Some(CfNode::Loop(_)) => Err(ControlFlowRejection::LoopRegion),
        Some(CfNode::Block(_)) => Err(ControlFlowRejection::Unknown),
    }
}

/// The acceptance gate's diagnostic, `None` when the program is accepted
pub fn validate(program: &Program) -> Option<String> {
    check_control_flow(program)
        .err()
        .map(|rejection| rejection.to_string())
}
