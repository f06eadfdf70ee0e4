use super::{replace_instruction, LegalizePass};
use crate::{AluOp, Capabilities, InstructionKind, Modifier, Program, Resource, Source};

/// Highest vec4 slot offset a uniform load can encode
pub const MAX_UNIFORM_OFFSET: u32 = 255;

/// Offset Folding Pass
///
/// Moves constant parts of a uniform load's dynamic index into the load's
/// immediate base offset, up to [`MAX_UNIFORM_OFFSET`]:
/// - `load uniform0[4 + %c]` with `%c = 2.0` → `load uniform0[6]`
/// - `load uniform0[4 + %i]` with `%i = add %j, 3.0` → `load uniform0[7 + %j]`
///
/// Only non-negative integral constants are folded; the slot is
/// `base + floor(index)` and fractional parts do not commute with the floor.
#[derive(Debug, Default)]
pub struct OffsetFolding;

impl OffsetFolding {
    /// Create a new offset folding pass
    pub const fn new() -> Self {
        Self
    }

    fn as_offset(value: f32) -> Option<u32> {
        (value >= 0.0 && value.fract() == 0.0 && value <= MAX_UNIFORM_OFFSET as f32)
            .then_some(value as u32)
    }

    /// New `(base, index)` for a load, if any constant part can move
    fn fold(program: &Program, base: u32, index: Source) -> Option<(u32, Option<Source>)> {
        if let Some(value) = program.constant_value(index) {
            let new_base = base.checked_add(Self::as_offset(value)?)?;
            return (new_base <= MAX_UNIFORM_OFFSET).then_some((new_base, None));
        }

        if index.modifier != Modifier::None {
            return None;
        }
        let (_, instr) = program.producer(index.value)?;
        let InstructionKind::Alu {
            op: AluOp::Add,
            sources,
            ..
        } = &instr.kind
        else {
            return None;
        };
        let (offset, rest) = match (
            program.constant_value(sources[0]),
            program.constant_value(sources[1]),
        ) {
            (_, Some(k)) => (k, sources[0]),
            (Some(k), None) => (k, sources[1]),
            (None, None) => return None,
        };
        let new_base = base.checked_add(Self::as_offset(offset)?)?;
        (new_base <= MAX_UNIFORM_OFFSET).then_some((new_base, Some(rest)))
    }
}

impl LegalizePass for OffsetFolding {
    fn run(&mut self, program: &mut Program, _caps: &Capabilities) -> bool {
        let mut modified = false;

        for id in program.live_instruction_ids() {
            let Some(instr) = program.instruction(id) else {
                continue;
            };
            let InstructionKind::Load {
                resource: resource @ Resource::UniformVec4(_),
                base,
                index: Some(index),
                component,
                width,
                ..
            } = instr.kind
            else {
                continue;
            };
            let Some((base, index)) = Self::fold(program, base, index) else {
                continue;
            };
            replace_instruction(program, id, width, |dest| InstructionKind::Load {
                dest,
                resource,
                base,
                index,
                component,
                width,
            });
            modified = true;
        }

        modified
    }

    fn name(&self) -> &'static str {
        "OffsetFolding"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::{BindingKind, ShaderStage};

    fn only_load(program: &Program) -> (u32, Option<Source>) {
        program
            .live_instructions()
            .find_map(|(_, instr)| match instr.kind {
                InstructionKind::Load {
                    resource: Resource::UniformVec4(_),
                    base,
                    index,
                    ..
                } => Some((base, index)),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_folds_constant_index() {
        let mut b = ProgramBuilder::new("const", ShaderStage::Vertex);
        let ubo = b.binding("consts", BindingKind::Uniform { slots: 16 });
        let two = b.constant(2.0);
        let load = b.load_indexed(Resource::UniformVec4(ubo), 4, Some(two), 0, 1);
        b.store(0, Source::new(load));
        let mut program = b.finish();

        assert!(OffsetFolding::new().run(&mut program, &Capabilities::default()));
        assert!(program.validate().is_ok());
        assert_eq!(only_load(&program), (6, None));
    }

    #[test]
    fn test_folds_constant_addend() {
        let mut b = ProgramBuilder::new("addend", ShaderStage::Vertex);
        let ubo = b.binding("consts", BindingKind::Uniform { slots: 16 });
        let j = b.load(Resource::Input, 0, 0);
        let three = b.constant(3.0);
        let i = b.alu(AluOp::Add, &[j, three]);
        let load = b.load_indexed(Resource::UniformVec4(ubo), 4, Some(i), 0, 1);
        b.store(0, Source::new(load));
        let mut program = b.finish();

        assert!(OffsetFolding::new().run(&mut program, &Capabilities::default()));
        assert_eq!(only_load(&program), (7, Some(j)));
        assert!(!OffsetFolding::new().run(&mut program, &Capabilities::default()));
    }

    #[test]
    fn test_respects_offset_ceiling_and_fractions() {
        let mut b = ProgramBuilder::new("ceiling", ShaderStage::Vertex);
        let ubo = b.binding("consts", BindingKind::Uniform { slots: 300 });
        let big = b.constant(10.0);
        let half = b.constant(0.5);
        let far = b.load_indexed(Resource::UniformVec4(ubo), 250, Some(big), 0, 1);
        let frac = b.load_indexed(Resource::UniformVec4(ubo), 0, Some(half), 0, 1);
        b.store(0, Source::new(far));
        b.store(1, Source::new(frac));
        let mut program = b.finish();

        assert!(!OffsetFolding::new().run(&mut program, &Capabilities::default()));
    }
}
