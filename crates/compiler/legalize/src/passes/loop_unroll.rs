use rustc_hash::FxHashMap;

use super::LegalizePass;
use crate::{
    AluOp, BlockId, Capabilities, CfNode, IfRegion, InstructionKind, Modifier, Program, RegionId,
    Source, TripCount, ValueId,
};

/// Loop Unrolling Pass
///
/// Replaces an innermost loop with a static trip count of at most
/// `max_unroll_count` by that many copies of its body. Loop-carried phis are
/// threaded through the copies: the first copy reads each phi's `init`,
/// copy `k + 1` reads the `next` value of copy `k`, and code after the loop
/// reads the `next` value of the last copy.
///
/// Loops with an unknown trip count are never touched; on targets without
/// loop hardware they are rejected later by the control-flow gate.
#[derive(Debug, Default)]
pub struct LoopUnroll;

/// Value renaming for one copy of the body
#[derive(Default)]
struct Renaming {
    /// Definitions created inside the body
    values: FxHashMap<ValueId, ValueId>,
    /// Loop-carried phis and the modifier-free source they hold this copy
    carried: FxHashMap<ValueId, Source>,
}

impl Renaming {
    fn map(&self, src: Source) -> Source {
        if let Some(&value) = self.values.get(&src.value) {
            return Source { value, ..src };
        }
        match self.carried.get(&src.value) {
            // Carried sources never hold a modifier, so composition cannot fail.
            Some(&current) => src.forward_through(current).unwrap_or(src),
            None => src,
        }
    }
}

/// A loop-carried phi of the loop being unrolled
struct Carried {
    dest: ValueId,
    init: Source,
    next: Source,
}

impl LoopUnroll {
    /// Create a new loop unrolling pass
    pub const fn new() -> Self {
        Self
    }

    /// Innermost loops with a trip count the target accepts, inner first
    fn collect_loops(nodes: &[CfNode], limit: u32, out: &mut Vec<RegionId>) -> bool {
        let mut has_loop = false;
        for node in nodes {
            match node {
                CfNode::Block(_) => {}
                CfNode::If(region) => {
                    has_loop |= Self::collect_loops(&region.then_body, limit, out);
                    has_loop |= Self::collect_loops(&region.else_body, limit, out);
                }
                CfNode::Loop(region) => {
                    has_loop = true;
                    let nested = Self::collect_loops(&region.body, limit, out);
                    let unrollable = matches!(
                        region.trip_count,
                        TripCount::Static(n) if n >= 1 && n <= limit
                    );
                    if !nested && unrollable {
                        out.push(region.id);
                    }
                }
            }
        }
        has_loop
    }

    /// Returns a modifier-free source equal to `source`, emitting a `mov`
    /// at the end of `block` when needed
    fn materialize(program: &mut Program, block: BlockId, source: Source) -> Source {
        if source.modifier == Modifier::None {
            return source;
        }
        let dest = program.new_value(1);
        program.push_instruction(block, InstructionKind::alu(AluOp::Mov, dest, &[source]));
        Source::new(dest)
    }

    fn clone_nodes(
        program: &mut Program,
        nodes: &[CfNode],
        renaming: &mut Renaming,
        skip_phis: &[ValueId],
    ) -> Vec<CfNode> {
        let mut cloned = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                CfNode::Block(block) => {
                    let copy = program.add_block();
                    for id in program.block_instructions(*block).to_vec() {
                        let Some(instr) = program.instruction(id) else {
                            continue;
                        };
                        let mut kind = instr.kind.clone();
                        if kind.destination().is_some_and(|dest| skip_phis.contains(&dest)) {
                            continue;
                        }
                        for src in kind.sources_mut() {
                            *src = renaming.map(*src);
                        }
                        if let Some(dest) = kind.destination() {
                            let fresh = program.new_value(kind.components());
                            renaming.values.insert(dest, fresh);
                            kind.set_destination(fresh);
                        }
                        program.push_instruction(copy, kind);
                    }
                    cloned.push(CfNode::Block(copy));
                }
                CfNode::If(region) => {
                    let id = program.new_region_id();
                    let condition = renaming.map(region.condition);
                    let then_body =
                        Self::clone_nodes(program, &region.then_body, renaming, skip_phis);
                    let else_body =
                        Self::clone_nodes(program, &region.else_body, renaming, skip_phis);
                    program.register_if_condition(id, condition);
                    cloned.push(CfNode::If(IfRegion {
                        id,
                        condition,
                        then_body,
                        else_body,
                    }));
                }
                // Only innermost loops are unrolled.
                CfNode::Loop(_) => {}
            }
        }
        cloned
    }

    fn unroll(program: &mut Program, id: RegionId) -> bool {
        let Some(path) = program.locate_region(id) else {
            return false;
        };
        let Some(CfNode::Loop(region)) = program
            .node_list(&path.steps)
            .and_then(|list| list.get(path.index))
        else {
            return false;
        };
        let TripCount::Static(trips) = region.trip_count else {
            return false;
        };
        let body = region.body.clone();
        let Some((before, _)) = program.region_neighbors(id) else {
            return false;
        };
        let Some(header) = body.first().and_then(CfNode::as_block) else {
            return false;
        };

        let carried: Vec<Carried> = program
            .block_phis(header)
            .into_iter()
            .filter_map(|phi| match &program.instruction(phi)?.kind {
                InstructionKind::Phi { dest, sources } if sources.len() == 2 => Some(Carried {
                    dest: *dest,
                    init: sources[0],
                    next: sources[1],
                }),
                _ => None,
            })
            .collect();
        let phi_dests: Vec<ValueId> = carried.iter().map(|phi| phi.dest).collect();

        let mut current: Vec<Source> = carried
            .iter()
            .map(|phi| Self::materialize(program, before, phi.init))
            .collect();
        let mut unrolled = Vec::new();
        let mut last_copy = FxHashMap::default();

        for _ in 0..trips {
            let mut renaming = Renaming::default();
            for (phi, value) in carried.iter().zip(&current) {
                renaming.carried.insert(phi.dest, *value);
            }
            let copy = Self::clone_nodes(program, &body, &mut renaming, &phi_dests);
            let Some(last) = copy.last().and_then(CfNode::as_block) else {
                return false;
            };
            current = carried
                .iter()
                .map(|phi| {
                    let next = renaming.map(phi.next);
                    Self::materialize(program, last, next)
                })
                .collect();
            unrolled.extend(copy);
            last_copy = renaming.values;
        }

        let Some(node) = program.replace_region(id, unrolled) else {
            return false;
        };
        // Readers after the loop see the values of the last iteration.
        for (&old, &new) in &last_copy {
            program.rewrite_uses(old, |src| Some(Source { value: new, ..src }));
        }
        program.discard_nodes(std::slice::from_ref(&node));
        for (phi, value) in carried.iter().zip(current) {
            program.replace_all_uses(phi.dest, value);
        }

        tracing::trace!(program = %program.name, region = id.index(), trips, "unrolled loop");
        true
    }
}

impl LegalizePass for LoopUnroll {
    fn run(&mut self, program: &mut Program, caps: &Capabilities) -> bool {
        let mut loops = Vec::new();
        Self::collect_loops(program.body(), caps.max_unroll_count, &mut loops);

        let mut modified = false;
        for id in loops {
            modified |= Self::unroll(program, id);
        }
        if modified {
            program.merge_adjacent_blocks();
        }
        modified
    }

    fn name(&self) -> &'static str {
        "LoopUnroll"
    }
}
