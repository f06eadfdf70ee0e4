use rustc_hash::FxHashSet;

use super::LegalizePass;
use crate::{Capabilities, CfNode, InstrId, Program, ValueId};

/// Dead Code Elimination Pass
///
/// Mark-and-sweep over the def-use graph. Stores and if-conditions are the
/// roots; everything they transitively read is live. Unlike a use-count
/// sweep this also removes dead cycles through loop-carried phis.
#[derive(Debug, Default)]
pub struct DeadCodeElimination;

impl DeadCodeElimination {
    /// Create a new dead code elimination pass
    pub const fn new() -> Self {
        Self
    }

    fn collect_roots(program: &Program) -> Vec<ValueId> {
        fn conditions(nodes: &[CfNode], out: &mut Vec<ValueId>) {
            for node in nodes {
                match node {
                    CfNode::Block(_) => {}
                    CfNode::If(region) => {
                        out.push(region.condition.value);
                        conditions(&region.then_body, out);
                        conditions(&region.else_body, out);
                    }
                    CfNode::Loop(region) => conditions(&region.body, out),
                }
            }
        }

        let mut roots = Vec::new();
        conditions(program.body(), &mut roots);
        for (_, instr) in program.live_instructions() {
            if instr.kind.has_side_effects() {
                roots.extend(instr.kind.sources().iter().map(|src| src.value));
            }
        }
        roots
    }

    fn mark_live(program: &Program) -> FxHashSet<InstrId> {
        let mut live = FxHashSet::default();
        let mut worklist = Self::collect_roots(program);

        while let Some(value) = worklist.pop() {
            let Some((id, instr)) = program.producer(value) else {
                continue;
            };
            if live.insert(id) {
                worklist.extend(instr.kind.sources().iter().map(|src| src.value));
            }
        }
        live
    }
}

impl LegalizePass for DeadCodeElimination {
    fn run(&mut self, program: &mut Program, _caps: &Capabilities) -> bool {
        let live = Self::mark_live(program);
        let dead: Vec<InstrId> = program
            .live_instructions()
            .filter(|(id, instr)| !instr.kind.has_side_effects() && !live.contains(id))
            .map(|(id, _)| id)
            .collect();

        for &id in &dead {
            program.remove_instruction(id);
        }

        if !dead.is_empty() {
            tracing::trace!(program = %program.name, removed = dead.len(), "removed dead instructions");
        }
        !dead.is_empty()
    }

    fn name(&self) -> &'static str {
        "DeadCodeElimination"
    }
}
