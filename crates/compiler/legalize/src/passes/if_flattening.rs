use super::{phi_pair, LegalizePass};
use crate::{
    AluOp, BlockId, Capabilities, CfNode, InstructionKind, Program, RegionId, Source,
};

/// If-Flattening Pass
///
/// Speculates both branches of an innermost `if` into the block before it
/// and turns every merge phi into a conditional select on the region's
/// condition:
///
/// ```text
/// if %c { %t = ... } else { %e = ... }
/// %m = phi %t.x, %e.x
/// ```
/// becomes `...; ...; %m = csel %c.x, %t.x, %e.x`.
///
/// `csel` needs a 0/1 predicate, so a condition that is not the result of a
/// comparison selects with `csel_gt |%c.x|` instead.
///
/// A region qualifies when each branch is a single block of speculatable
/// instructions no longer than the target's branch limit.
#[derive(Debug, Default)]
pub struct IfFlattening;

struct Flattenable {
    condition: Source,
    before: BlockId,
    after: BlockId,
    branches: [BlockId; 2],
}

impl IfFlattening {
    /// Create a new if-flattening pass
    pub const fn new() -> Self {
        Self
    }

    fn collect_ifs(nodes: &[CfNode], out: &mut Vec<RegionId>) {
        for node in nodes {
            match node {
                CfNode::Block(_) => {}
                CfNode::If(region) => {
                    Self::collect_ifs(&region.then_body, out);
                    Self::collect_ifs(&region.else_body, out);
                    out.push(region.id);
                }
                CfNode::Loop(region) => Self::collect_ifs(&region.body, out),
            }
        }
    }

    fn analyze(program: &Program, id: RegionId, limit: Option<usize>) -> Option<Flattenable> {
        let path = program.locate_region(id)?;
        let CfNode::If(region) = program.node_list(&path.steps)?.get(path.index)? else {
            return None;
        };
        let ([CfNode::Block(then_block)], [CfNode::Block(else_block)]) =
            (region.then_body.as_slice(), region.else_body.as_slice())
        else {
            return None;
        };

        for &block in [then_block, else_block] {
            let instrs = program.block_instructions(block);
            if limit.is_some_and(|limit| instrs.len() > limit) {
                return None;
            }
            let speculatable = instrs.iter().all(|&instr| {
                program
                    .instruction(instr)
                    .is_some_and(|instr| instr.kind.is_speculatable())
            });
            if !speculatable {
                return None;
            }
        }

        let (before, after) = program.region_neighbors(id)?;
        let merges = program.block_phis(after);
        if !merges.iter().all(|&phi| phi_pair(program, phi).is_some()) {
            return None;
        }
        Some(Flattenable {
            condition: region.condition,
            before,
            after,
            branches: [*then_block, *else_block],
        })
    }

    /// The select opcode and predicate equivalent to `condition != 0`
    fn select_for(program: &Program, condition: Source) -> (AluOp, Source) {
        let is_comparison = program.producer(condition.value).is_some_and(|(_, instr)| {
            matches!(instr.kind, InstructionKind::Alu { op, .. } if op.is_comparison())
        });
        if is_comparison {
            (AluOp::Csel, condition)
        } else {
            (AluOp::CselGt, condition.abs())
        }
    }

    fn flatten(program: &mut Program, id: RegionId, plan: &Flattenable) {
        let (op, predicate) = Self::select_for(program, plan.condition);
        for branch in plan.branches {
            for instr in program.block_instructions(branch).to_vec() {
                program.move_to_block_end(instr, plan.before);
            }
        }

        for phi in program.block_phis(plan.after) {
            let Some((dest, [then_value, else_value])) = phi_pair(program, phi) else {
                continue;
            };
            program.remove_instruction(phi);
            program.push_instruction(
                plan.before,
                InstructionKind::alu(op, dest, &[predicate, then_value, else_value]),
            );
        }

        if let Some(node) = program.replace_region(id, Vec::new()) {
            program.unregister_if_condition(id, plan.condition);
            program.discard_nodes(std::slice::from_ref(&node));
        }
    }
}

impl LegalizePass for IfFlattening {
    fn run(&mut self, program: &mut Program, caps: &Capabilities) -> bool {
        let limit = caps.flatten_branch_limit();
        let mut regions = Vec::new();
        Self::collect_ifs(program.body(), &mut regions);

        let mut modified = false;
        for id in regions {
            let Some(plan) = Self::analyze(program, id, limit) else {
                continue;
            };
            Self::flatten(program, id, &plan);
            // Enclosing branches become single blocks again before they are analyzed.
            program.merge_adjacent_blocks();
            tracing::trace!(program = %program.name, region = id.index(), "flattened if-region");
            modified = true;
        }

        modified
    }

    fn name(&self) -> &'static str {
        "IfFlattening"
    }
}
