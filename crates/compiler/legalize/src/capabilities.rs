//! # Capability Descriptor
//!
//! Immutable facts about the target chip, supplied once per compile by the
//! chip-identification component and threaded into every pass.

use serde::{Deserialize, Serialize};

/// Hardware generation of the chip family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Generation {
    First,
    Second,
}

/// Target facts consulted by the legalization passes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capabilities {
    pub generation: Generation,
    /// Whether the chip can execute loops natively
    pub has_native_loops: bool,
    /// Largest static trip count the unroller accepts
    pub max_unroll_count: u32,
    /// Whether a compare-and-select can read three distinct temporaries
    pub has_fused_compare_select: bool,
    /// Whether vertex processing runs as one fixed hardware pass
    #[serde(default)]
    pub hw_vertex_processing: bool,
}

impl Capabilities {
    /// First-generation chips: no loops, no fused select
    pub const fn first_gen() -> Self {
        Self {
            generation: Generation::First,
            has_native_loops: false,
            max_unroll_count: 32,
            has_fused_compare_select: false,
            hw_vertex_processing: true,
        }
    }

    /// Second-generation chips with native loop hardware
    pub const fn second_gen() -> Self {
        Self {
            generation: Generation::Second,
            has_native_loops: true,
            max_unroll_count: 32,
            has_fused_compare_select: false,
            hw_vertex_processing: true,
        }
    }

    /// Maximum instructions per branch that if-flattening may speculate
    pub const fn flatten_branch_limit(&self) -> Option<usize> {
        match self.generation {
            Generation::First => None,
            Generation::Second => Some(8),
        }
    }

    /// Whether the control-flow acceptance gate applies to a stage
    pub fn requires_flat_control_flow(&self, stage: crate::ShaderStage) -> bool {
        !self.has_native_loops
            && (self.hw_vertex_processing || stage == crate::ShaderStage::Fragment)
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::first_gen()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShaderStage;

    #[test]
    fn test_gate_applicability() {
        let first = Capabilities::first_gen();
        assert!(first.requires_flat_control_flow(ShaderStage::Vertex));
        assert!(first.requires_flat_control_flow(ShaderStage::Fragment));

        let software_vertex = Capabilities {
            hw_vertex_processing: false,
            ..Capabilities::first_gen()
        };
        assert!(!software_vertex.requires_flat_control_flow(ShaderStage::Vertex));
        assert!(software_vertex.requires_flat_control_flow(ShaderStage::Fragment));

        let second = Capabilities::second_gen();
        assert!(!second.requires_flat_control_flow(ShaderStage::Fragment));
    }

    #[test]
    fn test_deserialize_from_json() {
        let caps: Capabilities = serde_json::from_str(
            r#"{
                "generation": "second",
                "has_native_loops": false,
                "max_unroll_count": 16,
                "has_fused_compare_select": true
            }"#,
        )
        .unwrap();
        assert_eq!(caps.generation, Generation::Second);
        assert_eq!(caps.max_unroll_count, 16);
        assert!(!caps.hw_vertex_processing);
        assert_eq!(caps.flatten_branch_limit(), Some(8));
    }
}
