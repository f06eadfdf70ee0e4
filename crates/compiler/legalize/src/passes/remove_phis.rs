use super::{forward_result, LegalizePass};
use crate::{Capabilities, InstructionKind, Program, Source};

/// Trivial Phi Removal Pass
///
/// A phi whose incoming sources are all the same source (ignoring the phi
/// reading itself unmodified over a loop back-edge) is replaced by that
/// source. A back-edge reading `-%5` or `|%5|` changes the value each
/// iteration and keeps the phi.
///
/// ### Examples:
/// - `%5 = phi %2.x, %2.x` → uses of `%5` read `%2.x`
/// - loop header `%5 = phi %1.x, %5.x` → uses of `%5` read `%1.x`
#[derive(Debug, Default)]
pub struct RemovePhis;

impl RemovePhis {
    /// Create a new phi removal pass
    pub const fn new() -> Self {
        Self
    }

    fn unique_source(dest: crate::ValueId, sources: &[Source]) -> Option<Source> {
        let itself = Source::new(dest);
        let mut incoming = sources.iter().filter(|&&src| src != itself);
        let first = *incoming.next()?;
        incoming.all(|&src| src == first).then_some(first)
    }
}

impl LegalizePass for RemovePhis {
    fn run(&mut self, program: &mut Program, _caps: &Capabilities) -> bool {
        let mut modified = false;

        for id in program.live_instruction_ids() {
            let Some(instr) = program.instruction(id) else {
                continue;
            };
            let InstructionKind::Phi { dest, sources } = &instr.kind else {
                continue;
            };
            let dest = *dest;
            let Some(replacement) = Self::unique_source(dest, sources) else {
                continue;
            };
            modified |= forward_result(program, id, dest, replacement);
        }

        modified
    }

    fn name(&self) -> &'static str {
        "RemovePhis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::eval::{evaluate, Environment};
    use crate::{AluOp, Resource, ShaderStage, TripCount};

    #[test]
    fn test_removes_phi_with_identical_sources() {
        let mut b = ProgramBuilder::new("same", ShaderStage::Fragment);
        let x = b.load(Resource::InterpolatedInput, 0, 0);
        b.begin_if(x);
        b.begin_else();
        b.end_if();
        let merged = b.phi(&[x.negated(), x.negated()]);
        b.store(0, merged);
        let mut program = b.finish();

        assert!(RemovePhis::new().run(&mut program, &Capabilities::default()));
        assert!(program.validate().is_ok());
        assert!(program
            .live_instructions()
            .all(|(_, instr)| !instr.kind.is_phi()));
    }

    #[test]
    fn test_removes_loop_phi_that_only_reads_itself() {
        let mut b = ProgramBuilder::new("self", ShaderStage::Vertex);
        let init = b.load(Resource::Input, 0, 0);
        b.begin_loop(TripCount::Unknown);
        let (phi, carried) = b.loop_phi(init);
        b.set_loop_next(phi, carried);
        let doubled = b.alu(AluOp::Add, &[carried, carried]);
        b.store(0, doubled);
        b.end_loop();
        let mut program = b.finish();

        assert!(RemovePhis::new().run(&mut program, &Capabilities::default()));
        assert!(program.validate().is_ok());
        assert_eq!(program.use_count(carried.value), 0);
        assert_eq!(program.use_count(init.value), 1);
    }

    #[test]
    fn test_keeps_loop_phi_reading_itself_through_a_modifier() {
        let modifiers: [fn(Source) -> Source; 2] = [Source::negated, Source::abs];
        for modify in modifiers {
            let mut b = ProgramBuilder::new("flip", ShaderStage::Vertex);
            let init = b.load(Resource::Input, 0, 0);
            b.begin_loop(TripCount::Static(3));
            let (phi, carried) = b.loop_phi(init);
            b.set_loop_next(phi, modify(carried));
            b.end_loop();
            b.store(0, carried);
            let mut program = b.finish();
            let before = program.to_string();

            assert!(!RemovePhis::new().run(&mut program, &Capabilities::default()));
            assert_eq!(program.to_string(), before);
        }
    }

    #[test]
    fn test_negated_loop_step_survives_legalization() {
        let mut b = ProgramBuilder::new("negate_loop", ShaderStage::Vertex);
        let init = b.load(Resource::Input, 0, 0);
        b.begin_loop(TripCount::Static(3));
        let (phi, acc) = b.loop_phi(init);
        let next = b.alu(AluOp::Neg, &[acc]);
        b.set_loop_next(phi, next);
        b.end_loop();
        b.store(0, acc);
        let original = b.finish();

        let legalized = crate::legalize(original.clone(), &Capabilities::first_gen()).unwrap();
        let env = Environment::new().with_input(0, [2.0; 4]);
        let result = evaluate(&legalized.program, &env).unwrap();
        assert_eq!(result[&0], -2.0);
        assert_eq!(result, evaluate(&original, &env).unwrap());
    }

    #[test]
    fn test_keeps_phi_with_distinct_sources() {
        let mut b = ProgramBuilder::new("distinct", ShaderStage::Fragment);
        let x = b.load(Resource::InterpolatedInput, 0, 0);
        b.begin_if(x);
        let one = b.constant(1.0);
        b.begin_else();
        let two = b.constant(2.0);
        b.end_if();
        let merged = b.phi(&[one, two]);
        b.store(0, merged);
        let mut program = b.finish();

        assert!(!RemovePhis::new().run(&mut program, &Capabilities::default()));
    }
}
