//! # Legalization Passes
//!
//! This module implements the peephole/normalization passes and the
//! fixed-point scheduler that drives them.
//!
//! Every pass must only report progress when it actually mutated the
//! program, and must strictly reduce some measure (instruction count,
//! modifier depth, region count or undefined-value count) when it does.
//! The scheduler relies on this to terminate.

pub mod algebraic;
pub mod constant_folding;
pub mod copy_propagation;
pub mod dead_code_elimination;
pub mod dead_control_flow;
pub mod if_flattening;
pub mod load_batching;
pub mod local_cse;
pub mod loop_unroll;
pub mod offset_folding;
pub mod remove_phis;
pub mod select_legalizer;
pub mod undef;

pub use algebraic::AlgebraicSimplify;
pub use constant_folding::ConstantFolding;
pub use copy_propagation::CopyPropagation;
pub use dead_code_elimination::DeadCodeElimination;
pub use dead_control_flow::DeadControlFlow;
pub use if_flattening::IfFlattening;
pub use load_batching::LoadBatching;
pub use local_cse::LocalCse;
pub use loop_unroll::LoopUnroll;
pub use offset_folding::OffsetFolding;
pub use remove_phis::RemovePhis;
pub use select_legalizer::SelectLegalizer;
pub use undef::{UndefOptimization, UndefToZero};

use crate::{
    Capabilities, InstrId, InstructionKind, LegalizeError, LegalizeResult, MetadataSet, Program,
    Source, ValueId,
};

/// A trait for legalization passes
pub trait LegalizePass {
    /// Apply this pass to a program
    /// Returns true if the program was modified
    fn run(&mut self, program: &mut Program, caps: &Capabilities) -> bool;

    /// Get the name of this pass for debugging
    fn name(&self) -> &'static str;

    /// Analyses that stay valid when this pass modifies the program
    fn preserves(&self) -> MetadataSet {
        MetadataSet::NONE
    }
}

/// A pass manager that runs its passes to a fixed point
///
/// Each iteration runs every pass in declaration order. When an iteration
/// makes no progress the fallback pass, if any, runs once; the loop goes on
/// while it reports progress.
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn LegalizePass>>,
    fallback: Option<Box<dyn LegalizePass>>,
    max_iterations: Option<usize>,
    validate_between_passes: bool,
}

impl PassManager {
    /// Create a new pass manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pass to the manager
    pub fn add_pass<P: LegalizePass + 'static>(mut self, pass: P) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Set the pass that runs when a full iteration made no progress
    pub fn with_fallback<P: LegalizePass + 'static>(mut self, pass: P) -> Self {
        self.fallback = Some(Box::new(pass));
        self
    }

    /// Abort with [`LegalizeError::NonConvergence`] after `max` iterations
    pub const fn with_max_iterations(mut self, max: Option<usize>) -> Self {
        self.max_iterations = max;
        self
    }

    /// Validate the program after every pass that reports progress
    pub const fn with_validation(mut self, enabled: bool) -> Self {
        self.validate_between_passes = enabled;
        self
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    /// The standard legalization pipeline for fixed-function targets
    pub fn legalization_pipeline() -> Self {
        Self::new()
            .add_pass(CopyPropagation::new())
            .add_pass(AlgebraicSimplify::new())
            .add_pass(ConstantFolding::new())
            .add_pass(RemovePhis::new())
            .add_pass(DeadCodeElimination::new())
            .add_pass(DeadControlFlow::new())
            .add_pass(LocalCse::new())
            .add_pass(LoadBatching::new())
            .add_pass(OffsetFolding::new())
            .add_pass(IfFlattening::new())
            .add_pass(SelectLegalizer::new())
            .add_pass(UndefOptimization::new())
            .add_pass(LoopUnroll::new())
            .with_fallback(UndefToZero::new())
    }

    /// Run all passes to a fixed point
    /// Returns true if any pass modified the program
    pub fn run(&mut self, program: &mut Program, caps: &Capabilities) -> LegalizeResult<bool> {
        let validate = self.validate_between_passes;
        let mut modified = false;
        let mut iterations = 0;
        let mut last_progress = "";

        loop {
            if let Some(max) = self.max_iterations {
                if iterations >= max {
                    return Err(LegalizeError::NonConvergence {
                        pass: last_progress,
                        iterations,
                    });
                }
            }
            iterations += 1;

            let mut progress = false;
            for pass in &mut self.passes {
                if Self::run_pass(pass.as_mut(), program, caps, validate)? {
                    progress = true;
                    last_progress = pass.name();
                }
            }

            if !progress {
                if let Some(fallback) = self.fallback.as_mut() {
                    if Self::run_pass(fallback.as_mut(), program, caps, validate)? {
                        tracing::debug!(
                            program = %program.name,
                            pass = fallback.name(),
                            "fallback pass restarted the fixed-point loop"
                        );
                        progress = true;
                        last_progress = fallback.name();
                    }
                }
            }

            if !progress {
                break;
            }
            modified = true;
        }

        tracing::debug!(program = %program.name, iterations, modified, "pass set converged");
        Ok(modified)
    }

    fn run_pass(
        pass: &mut dyn LegalizePass,
        program: &mut Program,
        caps: &Capabilities,
        validate: bool,
    ) -> LegalizeResult<bool> {
        if !pass.run(program, caps) {
            return Ok(false);
        }

        tracing::trace!(program = %program.name, pass = pass.name(), "pass modified program");
        program.invalidate_metadata(pass.preserves());

        if validate {
            program.validate().map_err(|err| {
                LegalizeError::MalformedProgram(format!("after pass '{}': {err}", pass.name()))
            })?;
        }
        Ok(true)
    }
}

/// Redirects the uses of `dest` to `replacement` and removes the producing
/// instruction once nothing reads it. Returns true if anything changed.
pub(crate) fn forward_result(
    program: &mut Program,
    id: InstrId,
    dest: ValueId,
    replacement: Source,
) -> bool {
    let rewritten = program.replace_all_uses(dest, replacement);
    let removed = program.use_count(dest) == 0 && program.remove_instruction(id).is_some();
    rewritten > 0 || removed
}

/// The destination and sources of a two-input phi, read without touching it
pub(crate) fn phi_pair(program: &Program, id: InstrId) -> Option<(ValueId, [Source; 2])> {
    match &program.instruction(id)?.kind {
        InstructionKind::Phi { dest, sources } => match sources[..] {
            [first, second] => Some((*dest, [first, second])),
            _ => None,
        },
        _ => None,
    }
}

/// Swaps an instruction for a new one built around a fresh definition of the
/// same shape. Every use moves over, keeping its component and modifier.
pub(crate) fn replace_instruction(
    program: &mut Program,
    id: InstrId,
    components: u8,
    build: impl FnOnce(ValueId) -> InstructionKind,
) -> Option<ValueId> {
    let old_dest = program.instruction(id)?.kind.destination()?;
    let new_dest = program.new_value(components);
    program.insert_before(id, build(new_dest))?;
    program.rewrite_uses(old_dest, |src| {
        Some(Source {
            value: new_dest,
            ..src
        })
    });
    program.remove_instruction(id);
    Some(new_dest)
}
