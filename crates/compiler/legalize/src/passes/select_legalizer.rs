use super::LegalizePass;
use crate::{
    AluOp, Capabilities, InstrId, InstructionKind, Modifier, ModifierChainResolver, Program,
    Source, ValueId,
};

/// Conditional-Select Legalizer
///
/// Targets without a fused compare-and-select cannot read three distinct
/// temporaries in one select. Such selects are rewritten into a linear
/// interpolation between the two data sources, with a 0/1 factor:
///
/// ```text
/// %d = csel_ge %p, %t, %f
/// ```
/// becomes
/// ```text
/// %z = const 0.0
/// %k = sge %p, %z
/// %d' = lerp %f, %t, %k
/// ```
///
/// `csel_gt` uses `slt 0, p`. Plain `csel` expects a 0/1 predicate and feeds
/// it straight in as the factor. Selects where any two sources resolve to the
/// same identity, or any source is unresolvable, are left untouched.
#[derive(Debug, Default)]
pub struct SelectLegalizer;

impl SelectLegalizer {
    /// Create a new select legalizer pass
    pub const fn new() -> Self {
        Self
    }

    /// Returns true if the three sources resolve to pairwise distinct
    /// identities
    pub fn reads_three_temporaries(program: &Program, sources: &[Source]) -> bool {
        let mut resolver = ModifierChainResolver::new();
        let identities: Option<Vec<_>> = sources
            .iter()
            .map(|&src| resolver.resolve(program, src))
            .collect();
        match identities.as_deref() {
            Some([a, b, c]) => a != b && b != c && a != c,
            _ => false,
        }
    }

    /// Materializes the interpolation factor before `anchor`
    fn factor(program: &mut Program, anchor: InstrId, op: AluOp, predicate: Source) -> Option<Source> {
        let comparison = match op {
            // `-p` and `|p|` are non-zero exactly when `p` is.
            AluOp::Csel => return Some(predicate.with_modifier(Modifier::None)),
            AluOp::CselGe => AluOp::Sge,
            AluOp::CselGt => AluOp::Slt,
            _ => return None,
        };

        let zero = program.new_value(1);
        program.insert_before(anchor, InstructionKind::constant(zero, 0.0))?;
        let zero = Source::new(zero);
        let operands = match comparison {
            AluOp::Sge => [predicate, zero],
            _ => [zero, predicate],
        };
        let dest = program.new_value(1);
        program.insert_before(anchor, InstructionKind::alu(comparison, dest, &operands))?;
        Some(Source::new(dest))
    }

    fn legalize(program: &mut Program, id: InstrId, op: AluOp, dest: ValueId, sources: [Source; 3]) -> bool {
        let [predicate, on_true, on_false] = sources;
        let Some(factor) = Self::factor(program, id, op, predicate) else {
            return false;
        };

        let lerp = program.new_value(1);
        if program
            .insert_before(
                id,
                InstructionKind::alu(AluOp::Lerp, lerp, &[on_false, on_true, factor]),
            )
            .is_none()
        {
            return false;
        }
        program.replace_all_uses(dest, Source::new(lerp));
        program.remove_instruction(id);
        true
    }
}

impl LegalizePass for SelectLegalizer {
    fn run(&mut self, program: &mut Program, caps: &Capabilities) -> bool {
        if caps.has_fused_compare_select {
            return false;
        }

        let mut rewritten = 0;
        for id in program.live_instruction_ids() {
            let Some(instr) = program.instruction(id) else {
                continue;
            };
            let InstructionKind::Alu { op, dest, sources } = &instr.kind else {
                continue;
            };
            if !op.is_select() || !Self::reads_three_temporaries(program, sources) {
                continue;
            }
            let (op, dest) = (*op, *dest);
            let Ok(sources) = <[Source; 3]>::try_from(sources.as_slice()) else {
                continue;
            };
            if Self::legalize(program, id, op, dest, sources) {
                rewritten += 1;
            }
        }

        if rewritten > 0 {
            tracing::debug!(program = %program.name, rewritten, "lowered selects to interpolation");
        }
        rewritten > 0
    }

    fn name(&self) -> &'static str {
        "SelectLegalizer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::{BindingKind, Resource, ShaderStage};

    fn select_program(op: AluOp, shared: bool) -> (Program, Source) {
        let mut b = ProgramBuilder::new("select", ShaderStage::Fragment);
        let p = b.load(Resource::InterpolatedInput, 0, 0);
        let t = b.load(Resource::InterpolatedInput, 1, 0);
        let f = if shared {
            b.alu(AluOp::Neg, &[t])
        } else {
            b.load(Resource::InterpolatedInput, 2, 0)
        };
        let d = b.alu(op, &[p, t, f]);
        b.store(0, d);
        (b.finish(), d)
    }

    fn stored_producer(program: &Program) -> InstructionKind {
        let value = program
            .live_instructions()
            .find_map(|(_, instr)| match &instr.kind {
                InstructionKind::Store { value, .. } => Some(*value),
                _ => None,
            })
            .unwrap();
        program.producer(value.value).unwrap().1.kind.clone()
    }

    #[test]
    fn test_distinct_sources_become_lerp() {
        let (mut program, _) = select_program(AluOp::Csel, false);

        assert!(SelectLegalizer::new().run(&mut program, &Capabilities::first_gen()));
        assert!(program.validate().is_ok());
        let InstructionKind::Alu { op, sources, .. } = stored_producer(&program) else {
            panic!("expected alu");
        };
        assert_eq!(op, AluOp::Lerp);
        // Plain select: the predicate is the factor, data sources swap order.
        assert_eq!(sources[2].value.index(), 0);
        assert!(!SelectLegalizer::new().run(&mut program, &Capabilities::first_gen()));
    }

    #[test]
    fn test_ge_variant_inserts_comparison() {
        let (mut program, _) = select_program(AluOp::CselGe, false);

        assert!(SelectLegalizer::new().run(&mut program, &Capabilities::first_gen()));
        let InstructionKind::Alu { sources, .. } = stored_producer(&program) else {
            panic!("expected alu");
        };
        let (_, cmp) = program.producer(sources[2].value).unwrap();
        assert!(matches!(cmp.kind, InstructionKind::Alu { op: AluOp::Sge, .. }));
    }

    #[test]
    fn test_shared_identity_is_left_alone() {
        let (mut program, _) = select_program(AluOp::CselGt, true);
        let before = program.to_string();

        assert!(!SelectLegalizer::new().run(&mut program, &Capabilities::first_gen()));
        assert_eq!(program.to_string(), before);
    }

    #[test]
    fn test_fused_select_targets_skip_the_pass() {
        let (mut program, _) = select_program(AluOp::Csel, false);
        let caps = Capabilities {
            has_fused_compare_select: true,
            ..Capabilities::first_gen()
        };

        assert!(!SelectLegalizer::new().run(&mut program, &caps));
    }

    #[test]
    fn test_indexed_uniform_loads_never_match() {
        let mut b = ProgramBuilder::new("indexed", ShaderStage::Vertex);
        let ubo = b.binding("consts", BindingKind::Uniform { slots: 8 });
        let i = b.load(Resource::Input, 0, 0);
        let p = b.load(Resource::Input, 1, 0);
        let loaded = Source::new(b.load_indexed(Resource::UniformVec4(ubo), 0, Some(i), 0, 1));
        let d = b.alu(AluOp::Csel, &[p, loaded, loaded]);
        b.store(0, d);
        let mut program = b.finish();

        // The same dynamically indexed load is opaque on each occurrence.
        assert!(SelectLegalizer::new().run(&mut program, &Capabilities::first_gen()));
    }
}
