//! Common test utilities for legalization tests

#![allow(dead_code)]

use ffgpu_compiler_legalize::{AluOp, InstructionKind, Program, Source};

/// The source written by the store to `location`
pub fn stored_source(program: &Program, location: u32) -> Source {
    program
        .live_instructions()
        .find_map(|(_, instr)| match &instr.kind {
            InstructionKind::Store { location: l, value } if *l == location => Some(*value),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no store to out{location}"))
}

/// The instruction producing the value stored to `location`
pub fn stored_producer(program: &Program, location: u32) -> InstructionKind {
    let source = stored_source(program, location);
    program
        .producer(source.value)
        .map(|(_, instr)| instr.kind.clone())
        .unwrap_or_else(|| panic!("stored value has no producer"))
}

/// Number of live ALU instructions with the given opcode
pub fn count_alu(program: &Program, wanted: AluOp) -> usize {
    program
        .live_instructions()
        .filter(|(_, instr)| matches!(instr.kind, InstructionKind::Alu { op, .. } if op == wanted))
        .count()
}
