use smallvec::SmallVec;

use super::{replace_instruction, LegalizePass};
use crate::{Capabilities, InstructionKind, Program};

/// Constant Folding Pass
///
/// Evaluates ALU instructions whose sources are all constants and replaces
/// them with a single `const`. Modifiers are applied to the operands before
/// evaluation, matching what the hardware does.
///
/// ### Examples:
/// - `%2 = add %0.x, %1.x` with `%0 = 1.5`, `%1 = 2.0` → `%3 = const 3.5`
/// - `%2 = sge -%0.x, %1.x` with `%0 = 1.0`, `%1 = 0.0` → `%3 = const 0.0`
#[derive(Debug, Default)]
pub struct ConstantFolding;

impl ConstantFolding {
    /// Create a new constant folding pass
    pub const fn new() -> Self {
        Self
    }

    fn fold(program: &Program, kind: &InstructionKind) -> Option<f32> {
        let InstructionKind::Alu { op, sources, .. } = kind else {
            return None;
        };
        let args: Option<SmallVec<[f32; 3]>> = sources
            .iter()
            .map(|&src| program.constant_value(src))
            .collect();
        let value = op.evaluate(&args?);
        // Never materialize NaN constants.
        (!value.is_nan()).then_some(value)
    }
}

impl LegalizePass for ConstantFolding {
    fn run(&mut self, program: &mut Program, _caps: &Capabilities) -> bool {
        let mut modified = false;

        for id in program.live_instruction_ids() {
            let Some(value) = program
                .instruction(id)
                .and_then(|instr| Self::fold(program, &instr.kind))
            else {
                continue;
            };
            if replace_instruction(program, id, 1, |dest| InstructionKind::constant(dest, value))
                .is_some()
            {
                modified = true;
            }
        }

        modified
    }

    fn name(&self) -> &'static str {
        "ConstantFolding"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::{AluOp, Resource, ShaderStage, Source};

    fn stored(program: &Program) -> Source {
        program
            .live_instructions()
            .find_map(|(_, instr)| match &instr.kind {
                InstructionKind::Store { value, .. } => Some(*value),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_folds_nested_arithmetic_in_one_run() {
        let mut b = ProgramBuilder::new("fold", ShaderStage::Vertex);
        let a = b.constant(1.5);
        let c = b.constant(2.0);
        let sum = b.alu(AluOp::Add, &[a, c]);
        let prod = b.alu(AluOp::Mul, &[sum.negated(), c]);
        b.store(0, prod);
        let mut program = b.finish();

        assert!(ConstantFolding::new().run(&mut program, &Capabilities::default()));
        assert!(program.validate().is_ok());
        assert_eq!(program.constant_value(stored(&program)), Some(-7.0));
    }

    #[test]
    fn test_comparison_applies_modifiers() {
        let mut b = ProgramBuilder::new("cmp", ShaderStage::Vertex);
        let one = b.constant(1.0);
        let zero = b.constant(0.0);
        let ge = b.alu(AluOp::Sge, &[one.negated(), zero]);
        b.store(0, ge);
        let mut program = b.finish();

        assert!(ConstantFolding::new().run(&mut program, &Capabilities::default()));
        assert_eq!(program.constant_value(stored(&program)), Some(0.0));
    }

    #[test]
    fn test_leaves_non_constant_operands() {
        let mut b = ProgramBuilder::new("live", ShaderStage::Vertex);
        let x = b.load(Resource::Input, 0, 0);
        let one = b.constant(1.0);
        let sum = b.alu(AluOp::Add, &[x, one]);
        b.store(0, sum);
        let mut program = b.finish();

        assert!(!ConstantFolding::new().run(&mut program, &Capabilities::default()));
    }
}
