//! # Fixed-Function GPU Legalization
//!
//! This crate legalizes shader programs for a GPU family that cannot execute
//! dynamic control flow. Every loop must be statically unrolled and every
//! conditional flattened into data-select instructions before the program is
//! handed to code generation.
//!
//! ## Architecture
//!
//! ```text
//! Program
//! instructions: IndexVec<InstrId, Option<Instruction>>
//! definitions:  IndexVec<ValueId, Definition>
//! blocks:       IndexVec<BlockId, Block>
//! bindings:     IndexVec<BindingId, Option<Binding>>
//! body:         Vec<CfNode>   (Block | If | Loop)
//! ```
//!
//! All references between instructions, definitions and blocks are plain
//! indices into these arenas. Uses are tracked eagerly on every rewrite.
//!
//! ## Pipeline
//!
//! 1. [`PassManager`] drives the peephole/normalization passes and the
//!    conditional-select legalizer to a fixed point.
//! 2. [`finalize`] prunes unused uniform bindings and validates the program.
//! 3. [`check_control_flow`] rejects any region that survived flattening.

pub use builder::ProgramBuilder;
pub use capabilities::{Capabilities, Generation};
pub use error::{ControlFlowRejection, LegalizeError, LegalizeResult};
pub use finalize::{check_control_flow, finalize, validate, FinalizeSummary};
pub use instruction::{AluOp, Constant, Instruction, InstructionKind, Resource};
pub use passes::{LegalizePass, PassManager};
pub use pipeline::{legalize, LegalizeConfig, LegalizedProgram, Legalizer};
pub use program::{
    Binding, BindingKind, Block, CfNode, Definition, IfRegion, LoopRegion, MetadataSet, Program,
    ShaderStage, TripCount, Use,
};
pub use resolver::{Identity, ModifierChainResolver};
pub use value::{Modifier, Source};

pub mod builder;
pub mod capabilities;
pub mod error;
pub mod eval;
pub mod finalize;
pub mod instruction;
pub mod passes;
pub mod pipeline;
pub mod program;
pub mod resolver;
pub mod value;



// --- Core Identifiers ---

index_vec::define_index_type! {
    /// Identity of a value definition within a program
    pub struct ValueId = u32;
}

index_vec::define_index_type! {
    /// Arena slot of an instruction within a program
    pub struct InstrId = u32;
}

index_vec::define_index_type! {
    /// Unique identifier for a basic block within a program
    pub struct BlockId = u32;
}

index_vec::define_index_type! {
    /// Unique identifier for an if- or loop-region
    pub struct RegionId = u32;
}

index_vec::define_index_type! {
    /// Unique identifier for a storage binding
    pub struct BindingId = u32;
}

// --- Pretty Printing Support ---

/// Trait for pretty-printing IR constructs
pub trait PrettyPrint {
    fn pretty_print(&self, indent: usize) -> String;
}

/// Helper function to create indentation
pub(crate) fn indent_str(level: usize) -> String {
    "  ".repeat(level)
}
