//! Passes dealing with undefined values

use super::{forward_result, replace_instruction, LegalizePass};
use crate::{AluOp, Capabilities, InstructionKind, Program, Source};

fn is_undef(program: &Program, source: Source) -> bool {
    program
        .producer(source.value)
        .is_some_and(|(_, instr)| matches!(instr.kind, InstructionKind::Undef { .. }))
}

/// Undefined Value Optimization Pass
///
/// An undefined operand may take any value, so a select or interpolation
/// with one undefined data source can return the other source, and a store
/// of an undefined value can be dropped.
///
/// ### Examples:
/// - `csel %p, %t, undef` → `%t`
/// - `lerp undef, %f, %k` → `%f`
/// - `store out0, undef` → removed
#[derive(Debug, Default)]
pub struct UndefOptimization;

impl UndefOptimization {
    /// Create a new undefined value optimization pass
    pub const fn new() -> Self {
        Self
    }
}

impl LegalizePass for UndefOptimization {
    fn run(&mut self, program: &mut Program, _caps: &Capabilities) -> bool {
        let mut modified = false;

        for id in program.live_instruction_ids() {
            let Some(instr) = program.instruction(id) else {
                continue;
            };
            match &instr.kind {
                InstructionKind::Store { value, .. } if is_undef(program, *value) => {
                    program.remove_instruction(id);
                    modified = true;
                }
                InstructionKind::Alu { op, dest, sources }
                    if op.is_select() || *op == AluOp::Lerp =>
                {
                    // Data sources are [t, f] for selects and [near, far] for lerp.
                    let (first, second) = match op {
                        AluOp::Lerp => (sources[0], sources[1]),
                        _ => (sources[1], sources[2]),
                    };
                    let replacement = match (is_undef(program, first), is_undef(program, second)) {
                        (true, false) => second,
                        (false, true) => first,
                        _ => continue,
                    };
                    let dest = *dest;
                    modified |= forward_result(program, id, dest, replacement);
                }
                _ => {}
            }
        }

        modified
    }

    fn name(&self) -> &'static str {
        "UndefOptimization"
    }
}

/// Undefined-to-Zero Lowering Pass
///
/// Replaces every `undef` with `const 0.0`. The scheduler runs this only
/// when nothing else made progress, so other passes get the first chance to
/// exploit the undefined values.
#[derive(Debug, Default)]
pub struct UndefToZero;

impl UndefToZero {
    /// Create a new undefined-to-zero pass
    pub const fn new() -> Self {
        Self
    }
}

impl LegalizePass for UndefToZero {
    fn run(&mut self, program: &mut Program, _caps: &Capabilities) -> bool {
        let undefs: Vec<_> = program
            .live_instructions()
            .filter(|(_, instr)| matches!(instr.kind, InstructionKind::Undef { .. }))
            .map(|(id, _)| id)
            .collect();

        for &id in &undefs {
            replace_instruction(program, id, 1, |dest| InstructionKind::constant(dest, 0.0));
        }
        !undefs.is_empty()
    }

    fn name(&self) -> &'static str {
        "UndefToZero"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::{Resource, ShaderStage};

    #[test]
    fn test_select_with_undef_side_forwards_other() {
        let mut b = ProgramBuilder::new("undef_select", ShaderStage::Fragment);
        let p = b.load(Resource::InterpolatedInput, 0, 0);
        let t = b.load(Resource::InterpolatedInput, 1, 0);
        let u = b.undef();
        let d = b.alu(AluOp::Csel, &[p, t, u]);
        b.store(0, d.negated());
        let mut program = b.finish();

        assert!(UndefOptimization::new().run(&mut program, &Capabilities::default()));
        assert!(program.validate().is_ok());
        assert_eq!(program.use_count(t.value), 1);
        assert!(program.producer(d.value).is_none());
    }

    #[test]
    fn test_store_of_undef_is_dropped() {
        let mut b = ProgramBuilder::new("undef_store", ShaderStage::Fragment);
        let u = b.undef();
        b.store(0, u);
        let mut program = b.finish();

        assert!(UndefOptimization::new().run(&mut program, &Capabilities::default()));
        assert_eq!(program.use_count(u.value), 0);
    }

    #[test]
    fn test_undef_to_zero() {
        let mut b = ProgramBuilder::new("zero", ShaderStage::Fragment);
        let x = b.load(Resource::InterpolatedInput, 0, 0);
        let u = b.undef();
        let sum = b.alu(AluOp::Add, &[x, u]);
        b.store(0, sum);
        let mut program = b.finish();

        assert!(UndefToZero::new().run(&mut program, &Capabilities::default()));
        assert!(program.validate().is_ok());
        assert!(!UndefToZero::new().run(&mut program, &Capabilities::default()));

        let (_, add) = program.producer(sum.value).unwrap();
        let InstructionKind::Alu { sources, .. } = &add.kind else {
            panic!("expected add");
        };
        assert_eq!(program.constant_value(sources[1]), Some(0.0));
    }
}
