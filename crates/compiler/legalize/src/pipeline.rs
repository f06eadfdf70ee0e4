//! Legalization pipeline: scheduler, finalizer and acceptance gate

use serde::{Deserialize, Serialize};

use crate::{
    check_control_flow, finalize, Capabilities, LegalizeError, LegalizeResult, PassManager,
    Program,
};

/// Configuration for the legalization pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegalizeConfig {
    /// Fail with `NonConvergence` after this many scheduler iterations
    pub max_iterations: Option<usize>,
    /// Validate the program after every pass that reports progress
    pub validate_between_passes: bool,
}

impl LegalizeConfig {
    /// Iteration ceiling and intermediate validation, for fuzzing and tests
    pub const fn checked() -> Self {
        Self {
            max_iterations: Some(1000),
            validate_between_passes: true,
        }
    }
}

/// A program accepted for code generation
#[derive(Debug, Clone)]
pub struct LegalizedProgram {
    pub program: Program,
    /// Surviving uniform bindings, for constant-buffer layout
    pub uniform_bindings: usize,
    /// Whether an image or sampler binding survived, for descriptor tables
    pub has_image_or_sampler: bool,
}

/// Legalizes programs for one target
pub struct Legalizer<'a> {
    caps: &'a Capabilities,
    config: LegalizeConfig,
}

impl<'a> Legalizer<'a> {
    pub fn new(caps: &'a Capabilities) -> Self {
        Self {
            caps,
            config: LegalizeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LegalizeConfig) -> Self {
        self.config = config;
        self
    }

    /// The scheduler this legalizer runs
    pub fn pass_manager(&self) -> PassManager {
        PassManager::legalization_pipeline()
            .with_max_iterations(self.config.max_iterations)
            .with_validation(self.config.validate_between_passes)
    }

    /// Runs the pass set to a fixed point, finalizes the program and, when
    /// the target cannot execute dynamic control flow, applies the
    /// acceptance gate
    ///
    /// Passes assume a well-formed program, so the input is validated first.
    pub fn run(&self, mut program: Program) -> LegalizeResult<LegalizedProgram> {
        program
            .validate()
            .map_err(|err| LegalizeError::MalformedProgram(format!("on input: {err}")))?;
        self.pass_manager().run(&mut program, self.caps)?;
        let summary = finalize(&mut program)?;

        if self.caps.requires_flat_control_flow(program.stage) {
            if let Err(rejection) = check_control_flow(&program) {
                tracing::debug!(program = %program.name, %rejection, "control flow rejected");
                return Err(rejection.into());
            }
            tracing::debug!(program = %program.name, "control flow accepted");
        }

        Ok(LegalizedProgram {
            program,
            uniform_bindings: summary.uniform_bindings,
            has_image_or_sampler: summary.has_image_or_sampler,
        })
    }
}

/// Legalizes a program with the default configuration
pub fn legalize(program: Program, caps: &Capabilities) -> LegalizeResult<LegalizedProgram> {
    Legalizer::new(caps).run(program)
}
