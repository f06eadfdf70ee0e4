use super::LegalizePass;
use crate::{BlockId, Capabilities, InstrId, InstructionKind, Program, Resource, Source};

/// Uniform Load Batching Pass
///
/// Merges uniform loads that read the same vec4 slot into one wider load
/// when their component ranges touch or overlap. A merged load never crosses
/// the end of the slot, so components stay within `0..4`.
///
/// ### Example:
/// ```text
/// %1 = load uniform0[3] c0..1
/// %2 = load uniform0[3] c1..3
/// ```
/// becomes `%3 = load uniform0[3] c0..3`, with readers of `%2.x` reading
/// `%3.y`.
#[derive(Debug, Default)]
pub struct LoadBatching;

/// A uniform load candidate
#[derive(Debug, Clone, Copy)]
struct SlotLoad {
    id: InstrId,
    resource: Resource,
    base: u32,
    index: Option<Source>,
    component: u8,
    width: u8,
}

impl SlotLoad {
    fn from_instruction(id: InstrId, kind: &InstructionKind) -> Option<Self> {
        match *kind {
            InstructionKind::Load {
                resource: resource @ Resource::UniformVec4(_),
                base,
                index,
                component,
                width,
                ..
            } => Some(Self {
                id,
                resource,
                base,
                index,
                component,
                width,
            }),
            _ => None,
        }
    }

    fn same_slot(&self, other: &Self) -> bool {
        self.resource == other.resource && self.base == other.base && self.index == other.index
    }

    const fn end(&self) -> u8 {
        self.component + self.width
    }

    /// The combined component range, if the two ranges touch
    fn merged_range(&self, other: &Self) -> Option<(u8, u8)> {
        if self.component > other.end() || other.component > self.end() {
            return None;
        }
        let start = self.component.min(other.component);
        let end = self.end().max(other.end());
        (end <= 4).then_some((start, end - start))
    }
}

impl LoadBatching {
    /// Create a new load batching pass
    pub const fn new() -> Self {
        Self
    }

    /// Finds one mergeable pair in a block, earlier load first
    fn find_pair(program: &Program, block: BlockId) -> Option<(SlotLoad, SlotLoad, (u8, u8))> {
        let loads: Vec<SlotLoad> = program
            .block_instructions(block)
            .iter()
            .filter_map(|&id| {
                let instr = program.instruction(id)?;
                SlotLoad::from_instruction(id, &instr.kind)
            })
            .collect();

        for (i, first) in loads.iter().enumerate() {
            for second in &loads[i + 1..] {
                if !first.same_slot(second) {
                    continue;
                }
                if let Some(range) = first.merged_range(second) {
                    return Some((*first, *second, range));
                }
            }
        }
        None
    }

    fn merge(program: &mut Program, first: SlotLoad, second: SlotLoad, (start, width): (u8, u8)) {
        let dest = program.new_value(width);
        let merged = InstructionKind::Load {
            dest,
            resource: first.resource,
            base: first.base,
            index: first.index,
            component: start,
            width,
        };
        if program.insert_before(first.id, merged).is_none() {
            return;
        }

        for load in [first, second] {
            let Some(old) = program
                .instruction(load.id)
                .and_then(|instr| instr.kind.destination())
            else {
                continue;
            };
            let shift = load.component - start;
            program.rewrite_uses(old, |src| {
                Some(Source {
                    value: dest,
                    component: src.component + shift,
                    ..src
                })
            });
            program.remove_instruction(load.id);
        }
    }
}

impl LegalizePass for LoadBatching {
    fn run(&mut self, program: &mut Program, _caps: &Capabilities) -> bool {
        let mut modified = false;

        for block in program.placed_blocks() {
            while let Some((first, second, range)) = Self::find_pair(program, block) {
                Self::merge(program, first, second, range);
                modified = true;
            }
        }

        modified
    }

    fn name(&self) -> &'static str {
        "LoadBatching"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::{AluOp, BindingKind, ShaderStage};

    #[test]
    fn test_merges_adjacent_components() {
        let mut b = ProgramBuilder::new("batch", ShaderStage::Vertex);
        let ubo = b.binding("consts", BindingKind::Uniform { slots: 8 });
        let x = b.load(Resource::UniformVec4(ubo), 3, 0);
        let y = b.load(Resource::UniformVec4(ubo), 3, 1);
        let sum = b.alu(AluOp::Add, &[x, y.negated()]);
        b.store(0, sum);
        let mut program = b.finish();

        assert!(LoadBatching::new().run(&mut program, &Capabilities::default()));
        assert!(program.validate().is_ok());

        let loads: Vec<_> = program
            .live_instructions()
            .filter(|(_, instr)| matches!(instr.kind, InstructionKind::Load { .. }))
            .collect();
        assert_eq!(loads.len(), 1);
        let InstructionKind::Load {
            dest,
            component,
            width,
            ..
        } = loads[0].1.kind
        else {
            unreachable!()
        };
        assert_eq!((component, width), (0, 2));

        let (_, add) = program.producer(sum.value).unwrap();
        assert_eq!(
            add.kind,
            InstructionKind::alu(
                AluOp::Add,
                sum.value,
                &[Source::component(dest, 0), Source::component(dest, 1).negated()]
            )
        );
    }

    #[test]
    fn test_distinct_slots_and_gaps_are_kept_apart() {
        let mut b = ProgramBuilder::new("apart", ShaderStage::Vertex);
        let ubo = b.binding("consts", BindingKind::Uniform { slots: 8 });
        let x = b.load(Resource::UniformVec4(ubo), 3, 0);
        let w = b.load(Resource::UniformVec4(ubo), 3, 3);
        let other = b.load(Resource::UniformVec4(ubo), 4, 1);
        b.store(0, x);
        b.store(1, w);
        b.store(2, other);
        let mut program = b.finish();

        assert!(!LoadBatching::new().run(&mut program, &Capabilities::default()));
    }

    #[test]
    fn test_merges_overlapping_ranges() {
        let mut b = ProgramBuilder::new("overlap", ShaderStage::Vertex);
        let ubo = b.binding("consts", BindingKind::Uniform { slots: 8 });
        let wide = b.load_indexed(Resource::UniformVec4(ubo), 0, None, 1, 3);
        let z = b.load(Resource::UniformVec4(ubo), 0, 2);
        b.store(0, Source::component(wide, 2));
        b.store(1, z);
        let mut program = b.finish();

        assert!(LoadBatching::new().run(&mut program, &Capabilities::default()));
        assert!(program.validate().is_ok());
        assert_eq!(program.instruction_count(), 3);
    }
}
