use super::{forward_result, replace_instruction, LegalizePass};
use crate::{AluOp, Capabilities, InstructionKind, Modifier, Program, Source};

/// Algebraic Simplification Pass
///
/// Applies local identities to ALU instructions. A simplified instruction
/// either forwards one of its sources (with a sign modifier where needed) or
/// becomes a constant.
///
/// ### Identities:
/// - `x + 0`, `x * 1`, `min(x, x)`, `max(x, x)` → `x`
/// - `x * -1` → `-x`, `x * 0` → `0`
/// - `csel(p, a, a)` → `a`, `csel(const, a, b)` → the taken side
/// - `lerp(a, a, f)` → `a`, `lerp(a, b, 0)` → `a`, `lerp(a, b, 1)` → `b`
/// - `neg x`, `abs x` → a source modifier on every reader
/// - `sge x, x`, `seq x, x` → `1`; `slt x, x`, `sne x, x` → `0`
///
/// The identities hold under the target ALU's arithmetic (see
/// [`AluOp::evaluate`]): no NaN is ever produced, `0 * x` is `0` even for
/// infinite `x`, and `-0` and `+0` are the same value.
#[derive(Debug, Default)]
pub struct AlgebraicSimplify;

/// Outcome of matching one instruction
enum Simplified {
    Forward(Source),
    Constant(f32),
}

impl AlgebraicSimplify {
    /// Create a new algebraic simplification pass
    pub const fn new() -> Self {
        Self
    }

    fn simplify(program: &Program, op: AluOp, sources: &[Source]) -> Option<Simplified> {
        let constant = |index: usize| {
            sources
                .get(index)
                .and_then(|&src| program.constant_value(src))
        };
        use Simplified::{Constant, Forward};

        match op {
            AluOp::Add => {
                if constant(1) == Some(0.0) {
                    Some(Forward(sources[0]))
                } else if constant(0) == Some(0.0) {
                    Some(Forward(sources[1]))
                } else {
                    None
                }
            }
            AluOp::Mul => {
                if constant(0) == Some(0.0) || constant(1) == Some(0.0) {
                    Some(Constant(0.0))
                } else if constant(1) == Some(1.0) {
                    Some(Forward(sources[0]))
                } else if constant(0) == Some(1.0) {
                    Some(Forward(sources[1]))
                } else if constant(1) == Some(-1.0) {
                    Self::negate(sources[0]).map(Forward)
                } else if constant(0) == Some(-1.0) {
                    Self::negate(sources[1]).map(Forward)
                } else {
                    None
                }
            }
            AluOp::Min | AluOp::Max if sources[0] == sources[1] => Some(Forward(sources[0])),
            AluOp::Sge | AluOp::Seq if sources[0] == sources[1] => Some(Constant(1.0)),
            AluOp::Slt | AluOp::Sne if sources[0] == sources[1] => Some(Constant(0.0)),
            AluOp::Csel | AluOp::CselGe | AluOp::CselGt => {
                if sources[1] == sources[2] {
                    return Some(Forward(sources[1]));
                }
                let predicate = constant(0)?;
                let taken = if op.evaluate(&[predicate, 1.0, 0.0]) != 0.0 {
                    sources[1]
                } else {
                    sources[2]
                };
                Some(Forward(taken))
            }
            AluOp::Lerp => {
                if sources[0] == sources[1] || constant(2) == Some(0.0) {
                    Some(Forward(sources[0]))
                } else if constant(2) == Some(1.0) {
                    Some(Forward(sources[1]))
                } else {
                    None
                }
            }
            AluOp::Neg => Self::negate(sources[0]).map(Forward),
            AluOp::Abs => Some(Forward(sources[0].with_modifier(Modifier::Abs))),
            _ => None,
        }
    }

    fn negate(source: Source) -> Option<Source> {
        Modifier::compose(Modifier::Neg, source.modifier).map(|m| source.with_modifier(m))
    }
}

impl LegalizePass for AlgebraicSimplify {
    fn run(&mut self, program: &mut Program, _caps: &Capabilities) -> bool {
        let mut modified = false;

        for id in program.live_instruction_ids() {
            let Some(instr) = program.instruction(id) else {
                continue;
            };
            let InstructionKind::Alu { op, dest, sources } = &instr.kind else {
                continue;
            };
            let dest = *dest;
            match Self::simplify(program, *op, sources) {
                Some(Simplified::Forward(replacement)) => {
                    modified |= forward_result(program, id, dest, replacement);
                }
                Some(Simplified::Constant(value)) => {
                    replace_instruction(program, id, 1, |new_dest| {
                        InstructionKind::constant(new_dest, value)
                    });
                    modified = true;
                }
                None => {}
            }
        }

        modified
    }

    fn name(&self) -> &'static str {
        "AlgebraicSimplify"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::eval::{evaluate, Environment};
    use crate::{Resource, ShaderStage};

    fn stored_value(program: &Program) -> Source {
        program
            .live_instructions()
            .find_map(|(_, instr)| match &instr.kind {
                InstructionKind::Store { value, .. } => Some(*value),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_add_zero_and_mul_one() {
        let mut b = ProgramBuilder::new("identity", ShaderStage::Fragment);
        let x = b.load(Resource::InterpolatedInput, 0, 0);
        let zero = b.constant(0.0);
        let one = b.constant(1.0);
        let sum = b.alu(AluOp::Add, &[zero, x]);
        let prod = b.alu(AluOp::Mul, &[sum, one]);
        b.store(0, prod);
        let mut program = b.finish();

        assert!(AlgebraicSimplify::new().run(&mut program, &Capabilities::default()));
        assert!(program.validate().is_ok());
        assert_eq!(stored_value(&program), x);
    }

    #[test]
    fn test_mul_minus_one_becomes_modifier() {
        let mut b = ProgramBuilder::new("negate", ShaderStage::Fragment);
        let x = b.load(Resource::InterpolatedInput, 0, 0);
        let minus_one = b.constant(-1.0);
        let prod = b.alu(AluOp::Mul, &[x, minus_one]);
        b.store(0, prod);
        let mut program = b.finish();

        assert!(AlgebraicSimplify::new().run(&mut program, &Capabilities::default()));
        assert_eq!(stored_value(&program), x.negated());
    }

    #[test]
    fn test_neg_of_abs_stays_an_instruction() {
        let mut b = ProgramBuilder::new("neg_abs", ShaderStage::Fragment);
        let x = b.load(Resource::InterpolatedInput, 0, 0);
        let neg = b.alu(AluOp::Neg, &[x.abs()]);
        b.store(0, neg);
        let mut program = b.finish();

        let before = program.to_string();
        assert!(!AlgebraicSimplify::new().run(&mut program, &Capabilities::default()));
        assert_eq!(program.to_string(), before);
    }

    #[test]
    fn test_abs_folds_into_reader() {
        let mut b = ProgramBuilder::new("abs", ShaderStage::Fragment);
        let x = b.load(Resource::InterpolatedInput, 0, 0);
        let abs = b.alu(AluOp::Abs, &[x.negated()]);
        b.store(0, abs.negated());
        let mut program = b.finish();

        // `-|x|` is not representable, so the reader keeps the instruction.
        assert!(!AlgebraicSimplify::new().run(&mut program, &Capabilities::default()));

        let mut b = ProgramBuilder::new("abs_plain", ShaderStage::Fragment);
        let x = b.load(Resource::InterpolatedInput, 0, 0);
        let abs = b.alu(AluOp::Abs, &[x.negated()]);
        b.store(0, abs);
        let mut program = b.finish();

        assert!(AlgebraicSimplify::new().run(&mut program, &Capabilities::default()));
        assert_eq!(stored_value(&program), x.abs());
        assert_eq!(program.instruction_count(), 2);
    }

    #[test]
    fn test_select_with_constant_predicate() {
        let mut b = ProgramBuilder::new("csel", ShaderStage::Fragment);
        let t = b.load(Resource::InterpolatedInput, 0, 0);
        let f = b.load(Resource::InterpolatedInput, 1, 0);
        let p = b.constant(-0.5);
        let ge = b.alu(AluOp::CselGe, &[p, t, f]);
        let plain = b.alu(AluOp::Csel, &[p, t, f]);
        let sum = b.alu(AluOp::Add, &[ge, plain]);
        b.store(0, sum);
        let mut program = b.finish();

        assert!(AlgebraicSimplify::new().run(&mut program, &Capabilities::default()));
        let sources = program
            .live_instructions()
            .find_map(|(_, instr)| match &instr.kind {
                InstructionKind::Alu {
                    op: AluOp::Add,
                    sources,
                    ..
                } => Some(sources.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(sources[0], f);
        assert_eq!(sources[1], t);
    }

    #[test]
    fn test_mul_zero_becomes_constant() {
        let mut b = ProgramBuilder::new("zero", ShaderStage::Fragment);
        let x = b.load(Resource::InterpolatedInput, 0, 0);
        let zero = b.constant(0.0);
        let prod = b.alu(AluOp::Mul, &[x, zero]);
        b.store(0, prod);
        let mut program = b.finish();

        assert!(AlgebraicSimplify::new().run(&mut program, &Capabilities::default()));
        assert!(program.validate().is_ok());
        assert_eq!(program.constant_value(stored_value(&program)), Some(0.0));
    }

    #[test]
    fn test_zero_identities_match_target_arithmetic() {
        let mut b = ProgramBuilder::new("infinite", ShaderStage::Fragment);
        let x = b.load(Resource::InterpolatedInput, 0, 0);
        let zero = b.constant(0.0);
        let prod = b.alu(AluOp::Mul, &[x, zero]);
        let sum = b.alu(AluOp::Add, &[x.negated(), zero]);
        b.store(0, prod);
        b.store(1, sum);
        let original = b.finish();

        let mut program = original.clone();
        assert!(AlgebraicSimplify::new().run(&mut program, &Capabilities::default()));
        for x in [f32::INFINITY, 0.0, -2.5] {
            let env = Environment::new().with_varying(0, [x; 4]);
            assert_eq!(
                evaluate(&program, &env).unwrap(),
                evaluate(&original, &env).unwrap(),
                "x = {x}"
            );
        }
    }
}
