use super::{phi_pair, LegalizePass};
use crate::{
    AluOp, BlockId, Capabilities, CfNode, InstructionKind, Program, RegionId, TripCount,
};

/// Dead Control-Flow Elimination Pass
///
/// Removes regions whose outcome is known statically and tidies the tree:
/// - `if` with a constant condition is replaced by the taken branch
/// - `if` with two empty branches and no merge phis disappears
/// - loops with a static trip count of zero, or an empty body, disappear
/// - blocks left adjacent by a removal are merged
///
/// Merge phis of a removed region are lowered to `mov`s of the surviving
/// source, which copy propagation then forwards.
#[derive(Debug, Default)]
pub struct DeadControlFlow;

impl DeadControlFlow {
    /// Create a new dead control-flow pass
    pub const fn new() -> Self {
        Self
    }

    fn collect_regions(nodes: &[CfNode], out: &mut Vec<RegionId>) {
        for node in nodes {
            match node {
                CfNode::Block(_) => {}
                CfNode::If(region) => {
                    out.push(region.id);
                    Self::collect_regions(&region.then_body, out);
                    Self::collect_regions(&region.else_body, out);
                }
                CfNode::Loop(region) => {
                    out.push(region.id);
                    Self::collect_regions(&region.body, out);
                }
            }
        }
    }

    fn region(program: &Program, id: RegionId) -> Option<&CfNode> {
        let path = program.locate_region(id)?;
        program.node_list(&path.steps)?.get(path.index)
    }

    fn is_empty_body(program: &Program, nodes: &[CfNode]) -> bool {
        match nodes {
            [CfNode::Block(block)] => program.block_instructions(*block).is_empty(),
            _ => false,
        }
    }

    fn simplify_if(program: &mut Program, id: RegionId) -> bool {
        let Some(CfNode::If(region)) = Self::region(program, id) else {
            return false;
        };
        let Some((_, after)) = program.region_neighbors(id) else {
            return false;
        };

        // `Some(true)` keeps the then branch, `None` drops both empty branches.
        let keep_then = match program.constant_value(region.condition) {
            Some(value) => Some(value != 0.0),
            None => {
                let empty = Self::is_empty_body(program, &region.then_body)
                    && Self::is_empty_body(program, &region.else_body);
                if !empty || program.starts_with_phi(after) {
                    return false;
                }
                None
            }
        };
        let taken = match keep_then {
            Some(true) => region.then_body.clone(),
            Some(false) => region.else_body.clone(),
            None => Vec::new(),
        };

        if let Some(keep_then) = keep_then {
            lower_merge_phis(program, after, usize::from(!keep_then));
        }
        let Some(CfNode::If(region)) = program.replace_region(id, taken) else {
            return false;
        };
        program.unregister_if_condition(id, region.condition);
        match keep_then {
            Some(true) => program.discard_nodes(&region.else_body),
            Some(false) => program.discard_nodes(&region.then_body),
            None => {
                program.discard_nodes(&region.then_body);
                program.discard_nodes(&region.else_body);
            }
        }

        tracing::trace!(program = %program.name, region = id.index(), "removed dead if-region");
        true
    }

    fn remove_loop(program: &mut Program, id: RegionId) -> bool {
        let Some(CfNode::Loop(region)) = Self::region(program, id) else {
            return false;
        };
        let removable = match region.trip_count {
            TripCount::Static(0) => true,
            TripCount::Static(_) => Self::is_empty_body(program, &region.body),
            TripCount::Unknown => false,
        };
        let header = region.body.first().and_then(CfNode::as_block);
        let (Some(header), Some((before, _))) = (header, program.region_neighbors(id)) else {
            return false;
        };
        if !removable {
            return false;
        }

        // A loop that never runs leaves its carried values at `init`.
        for phi in program.block_phis(header) {
            let Some((dest, [init, _])) = phi_pair(program, phi) else {
                continue;
            };
            program.remove_instruction(phi);
            program.push_instruction(before, InstructionKind::alu(AluOp::Mov, dest, &[init]));
        }

        let Some(node) = program.replace_region(id, Vec::new()) else {
            return false;
        };
        program.discard_nodes(std::slice::from_ref(&node));

        tracing::trace!(program = %program.name, region = id.index(), "removed dead loop");
        true
    }
}

/// Turns the merge phis at the start of `block` into `mov`s of their
/// `pick`-th source, keeping each definition.
pub(crate) fn lower_merge_phis(program: &mut Program, block: BlockId, pick: usize) {
    for (position, phi) in program.block_phis(block).into_iter().enumerate() {
        let Some((dest, sources)) = phi_pair(program, phi) else {
            continue;
        };
        let Some(&chosen) = sources.get(pick) else {
            continue;
        };
        program.remove_instruction(phi);
        program.insert_instruction(
            block,
            position,
            InstructionKind::alu(AluOp::Mov, dest, &[chosen]),
        );
    }
}

impl LegalizePass for DeadControlFlow {
    fn run(&mut self, program: &mut Program, _caps: &Capabilities) -> bool {
        let mut regions = Vec::new();
        Self::collect_regions(program.body(), &mut regions);

        let mut modified = false;
        for id in regions {
            modified |= match Self::region(program, id) {
                Some(CfNode::If(_)) => Self::simplify_if(program, id),
                Some(CfNode::Loop(_)) => Self::remove_loop(program, id),
                _ => false,
            };
        }

        modified |= program.merge_adjacent_blocks();
        modified
    }

    fn name(&self) -> &'static str {
        "DeadControlFlow"
    }
}
