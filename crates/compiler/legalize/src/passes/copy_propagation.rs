use super::{forward_result, LegalizePass};
use crate::{AluOp, Capabilities, InstructionKind, Program};

/// Copy Propagation Pass
///
/// Replaces every read of a `mov` result with a read of the moved source,
/// composing the sign modifiers of both reads, and removes the `mov` once it
/// has no readers left.
///
/// ### Examples:
/// - `%2 = mov %1.x; %3 = add %2.x, %0.x` → `%3 = add %1.x, %0.x`
/// - `%2 = mov -%1.x; %3 = mul -%2.x, %0.x` → `%3 = mul %1.x, %0.x`
/// - `%2 = mov |%1.x|; store out0, -%2.x` is left alone, `-|x|` has no modifier
#[derive(Debug, Default)]
pub struct CopyPropagation;

impl CopyPropagation {
    /// Create a new copy propagation pass
    pub const fn new() -> Self {
        Self
    }
}

impl LegalizePass for CopyPropagation {
    fn run(&mut self, program: &mut Program, _caps: &Capabilities) -> bool {
        let mut modified = false;

        for id in program.live_instruction_ids() {
            // Re-read: an earlier forward may have rewritten this source.
            let Some(instr) = program.instruction(id) else {
                continue;
            };
            let InstructionKind::Alu {
                op: AluOp::Mov,
                dest,
                sources,
            } = &instr.kind
            else {
                continue;
            };
            let (dest, source) = (*dest, sources[0]);
            modified |= forward_result(program, id, dest, source);
        }

        modified
    }

    fn name(&self) -> &'static str {
        "CopyPropagation"
    }
}
