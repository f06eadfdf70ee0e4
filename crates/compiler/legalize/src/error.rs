//! Errors surfaced by the legalization pipeline

use thiserror::Error;

/// The structural shape the acceptance gate rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ControlFlowRejection {
    #[error(
        "If/then statements are not supported by this target, they should have been flattened into selects."
    )]
    IfRegion,
    #[error("Looping is not supported by this target, all loops must be statically unrollable.")]
    LoopRegion,
    #[error("Unknown control flow type")]
    Unknown,
}

/// Errors that can occur while legalizing a program
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LegalizeError {
    /// A region survived flattening on a target without dynamic control flow
    #[error(transparent)]
    UnsupportedControlFlow(#[from] ControlFlowRejection),

    /// The configured iteration ceiling was hit
    #[error("Pass '{pass}' still reported progress after {iterations} iterations")]
    NonConvergence { pass: &'static str, iterations: usize },

    /// The validity sweep found a broken invariant
    #[error("Program validation failed: {0}")]
    MalformedProgram(String),
}

/// Result type for legalization
pub type LegalizeResult<T> = Result<T, LegalizeError>;
