use rustc_hash::FxHashMap;

use super::LegalizePass;
use crate::{Capabilities, InstrId, InstructionKind, Program, Source, ValueId};

/// Local Common Subexpression Elimination Pass
///
/// Within each block, a pure instruction identical to an earlier one (same
/// opcode, same sources, same resource slot) is removed and its readers are
/// redirected to the earlier result.
///
/// Sources of commutative opcodes are ordered before comparison, so
/// `add %1.x, %2.x` and `add %2.x, %1.x` are the same expression.
#[derive(Debug, Default)]
pub struct LocalCse;

impl LocalCse {
    /// Create a new local CSE pass
    pub const fn new() -> Self {
        Self
    }

    /// The instruction with its destination blanked, or `None` if it must
    /// never be merged
    fn expression_key(kind: &InstructionKind) -> Option<InstructionKind> {
        let mut key = match kind {
            InstructionKind::Alu { .. }
            | InstructionKind::Const { .. }
            | InstructionKind::Load { .. } => kind.clone(),
            InstructionKind::Store { .. }
            | InstructionKind::Phi { .. }
            | InstructionKind::Undef { .. } => return None,
        };
        key.set_destination(ValueId::from_raw(0));
        if let InstructionKind::Alu { op, sources, .. } = &mut key {
            if op.is_commutative() {
                sources.sort_unstable();
            }
        }
        Some(key)
    }
}

impl LegalizePass for LocalCse {
    fn run(&mut self, program: &mut Program, _caps: &Capabilities) -> bool {
        let mut modified = false;

        for block in program.placed_blocks() {
            let mut available: FxHashMap<InstructionKind, ValueId> = FxHashMap::default();
            let mut duplicates: Vec<(InstrId, ValueId, ValueId)> = Vec::new();

            for &id in program.block_instructions(block) {
                let Some(instr) = program.instruction(id) else {
                    continue;
                };
                let (Some(dest), Some(key)) =
                    (instr.kind.destination(), Self::expression_key(&instr.kind))
                else {
                    continue;
                };
                match available.get(&key) {
                    Some(&earlier) => duplicates.push((id, dest, earlier)),
                    None => {
                        available.insert(key, dest);
                    }
                }
            }

            // Keys hold source ids, so rewriting a duplicate's readers can
            // expose new matches; the next scheduler iteration picks them up.
            for (id, dest, earlier) in duplicates {
                program.rewrite_uses(dest, |src| {
                    Some(Source {
                        value: earlier,
                        ..src
                    })
                });
                program.remove_instruction(id);
                modified = true;
            }
        }

        modified
    }

    fn name(&self) -> &'static str {
        "LocalCSE"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::{AluOp, BindingKind, Resource, ShaderStage};

    #[test]
    fn test_merges_commutative_duplicates() {
        let mut b = ProgramBuilder::new("cse", ShaderStage::Fragment);
        let x = b.load(Resource::InterpolatedInput, 0, 0);
        let y = b.load(Resource::InterpolatedInput, 1, 0);
        let a = b.alu(AluOp::Add, &[x, y]);
        let c = b.alu(AluOp::Add, &[y, x]);
        let sum = b.alu(AluOp::Mul, &[a, c.negated()]);
        b.store(0, sum);
        let mut program = b.finish();

        assert!(LocalCse::new().run(&mut program, &Capabilities::default()));
        assert!(program.validate().is_ok());
        assert_eq!(program.use_count(a.value), 1);
        assert!(program.producer(c.value).is_none());

        let (_, mul) = program.producer(sum.value).unwrap();
        assert_eq!(mul.kind, InstructionKind::alu(AluOp::Mul, sum.value, &[a, a.negated()]));
    }

    #[test]
    fn test_merges_identical_uniform_loads() {
        let mut b = ProgramBuilder::new("loads", ShaderStage::Vertex);
        let ubo = b.binding("consts", BindingKind::Uniform { slots: 4 });
        let first = b.load(Resource::UniformVec4(ubo), 2, 1);
        let second = b.load(Resource::UniformVec4(ubo), 2, 1);
        let other = b.load(Resource::UniformVec4(ubo), 3, 1);
        b.store(0, first);
        b.store(1, second);
        b.store(2, other);
        let mut program = b.finish();

        assert!(LocalCse::new().run(&mut program, &Capabilities::default()));
        assert_eq!(program.use_count(first.value), 2);
        assert_eq!(program.use_count(other.value), 1);
    }

    #[test]
    fn test_non_commutative_order_matters() {
        let mut b = ProgramBuilder::new("order", ShaderStage::Fragment);
        let x = b.load(Resource::InterpolatedInput, 0, 0);
        let y = b.load(Resource::InterpolatedInput, 1, 0);
        let lt = b.alu(AluOp::Slt, &[x, y]);
        let gt = b.alu(AluOp::Slt, &[y, x]);
        b.store(0, lt);
        b.store(1, gt);
        let mut program = b.finish();

        assert!(!LocalCse::new().run(&mut program, &Capabilities::default()));
    }
}
