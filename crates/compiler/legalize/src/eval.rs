//! # Reference Evaluator
//!
//! A direct interpreter for structured programs. It gives every pass a
//! ground truth to be checked against: a transformation is correct when
//! the stores it produces are unchanged for every environment.
//!
//! Undefined values evaluate to `0.0`, matching the lowering the pipeline
//! applies when nothing else can exploit them. Reads of slots missing from
//! the [`Environment`] also yield zeros.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::{
    BindingId, BlockId, CfNode, InstructionKind, LoopRegion, Program, RegionId, Resource, Source,
    TripCount, ValueId,
};

/// Values written by `store` instructions, keyed by output location
pub type Outputs = BTreeMap<u32, f32>;

/// Errors raised while interpreting a program
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("Loop {0:?} has no static trip count")]
    UnknownTripCount(RegionId),
    #[error("Value %{} was read before it was computed", .0.index())]
    Unevaluated(ValueId),
    #[error("Phi in {0:?} has no incoming edge to pick from")]
    StrayPhi(BlockId),
}

/// Contents of every readable resource, one vec4 per slot
#[derive(Debug, Clone, Default)]
pub struct Environment {
    uniforms: FxHashMap<(BindingId, u32), [f32; 4]>,
    inputs: FxHashMap<u32, [f32; 4]>,
    varyings: FxHashMap<u32, [f32; 4]>,
    constants: FxHashMap<u32, [f32; 4]>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_uniform(mut self, binding: BindingId, slot: u32, value: [f32; 4]) -> Self {
        self.uniforms.insert((binding, slot), value);
        self
    }

    pub fn with_input(mut self, slot: u32, value: [f32; 4]) -> Self {
        self.inputs.insert(slot, value);
        self
    }

    pub fn with_varying(mut self, slot: u32, value: [f32; 4]) -> Self {
        self.varyings.insert(slot, value);
        self
    }

    pub fn with_constant(mut self, slot: u32, value: [f32; 4]) -> Self {
        self.constants.insert(slot, value);
        self
    }

    fn slot(&self, resource: Resource, slot: u32) -> [f32; 4] {
        let found = match resource {
            Resource::UniformVec4(binding) => self.uniforms.get(&(binding, slot)),
            Resource::Input => self.inputs.get(&slot),
            Resource::InterpolatedInput => self.varyings.get(&slot),
            Resource::Constant => self.constants.get(&slot),
        };
        found.copied().unwrap_or_default()
    }
}

/// How leading phis of a block get their value
#[derive(Debug, Clone, Copy)]
enum PhiMode {
    /// Loop header: the loop driver already assigned them
    Carried,
    /// Merge block after an `if` that took the given arm
    Merge(usize),
    None,
}

struct Interpreter<'a> {
    program: &'a Program,
    env: &'a Environment,
    values: FxHashMap<ValueId, [f32; 4]>,
    outputs: Outputs,
}

/// Runs a program and returns what it stored
pub fn evaluate(program: &Program, env: &Environment) -> Result<Outputs, EvalError> {
    let mut interpreter = Interpreter {
        program,
        env,
        values: FxHashMap::default(),
        outputs: Outputs::new(),
    };
    interpreter.exec_nodes(program.body(), false)?;
    Ok(interpreter.outputs)
}

impl Interpreter<'_> {
    fn read(&self, source: Source) -> Result<f32, EvalError> {
        let lanes = self
            .values
            .get(&source.value)
            .ok_or(EvalError::Unevaluated(source.value))?;
        let lane = lanes
            .get(source.component as usize)
            .copied()
            .ok_or(EvalError::Unevaluated(source.value))?;
        Ok(source.modifier.apply(lane))
    }

    fn scalar(value: f32) -> [f32; 4] {
        [value, 0.0, 0.0, 0.0]
    }

    fn exec_nodes(&mut self, nodes: &[CfNode], loop_body: bool) -> Result<(), EvalError> {
        let mut taken_arm = None;
        for (position, node) in nodes.iter().enumerate() {
            match node {
                CfNode::Block(block) => {
                    let mode = match taken_arm.take() {
                        Some(arm) => PhiMode::Merge(arm),
                        None if loop_body && position == 0 => PhiMode::Carried,
                        None => PhiMode::None,
                    };
                    self.exec_block(*block, mode)?;
                }
                CfNode::If(region) => {
                    let arm = if self.read(region.condition)? != 0.0 {
                        self.exec_nodes(&region.then_body, false)?;
                        0
                    } else {
                        self.exec_nodes(&region.else_body, false)?;
                        1
                    };
                    taken_arm = Some(arm);
                }
                CfNode::Loop(region) => {
                    self.exec_loop(region)?;
                    taken_arm = None;
                }
            }
        }
        Ok(())
    }

    fn exec_loop(&mut self, region: &LoopRegion) -> Result<(), EvalError> {
        let TripCount::Static(trips) = region.trip_count else {
            return Err(EvalError::UnknownTripCount(region.id));
        };
        let header = region.body.first().and_then(CfNode::as_block);
        let carried: Vec<(ValueId, Source, Source)> = header
            .map(|header| self.program.block_phis(header))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| match &self.program.instruction(id)?.kind {
                InstructionKind::Phi { dest, sources } if sources.len() == 2 => {
                    Some((*dest, sources[0], sources[1]))
                }
                _ => None,
            })
            .collect();

        for &(dest, init, _) in &carried {
            let value = self.read(init)?;
            self.values.insert(dest, Self::scalar(value));
        }
        for _ in 0..trips {
            self.exec_nodes(&region.body, true)?;
            let next: Vec<f32> = carried
                .iter()
                .map(|&(_, _, next)| self.read(next))
                .collect::<Result<_, _>>()?;
            for (&(dest, _, _), value) in carried.iter().zip(next) {
                self.values.insert(dest, Self::scalar(value));
            }
        }
        Ok(())
    }

    fn exec_block(&mut self, block: BlockId, phis: PhiMode) -> Result<(), EvalError> {
        for &id in self.program.block_instructions(block) {
            let Some(instr) = self.program.instruction(id) else {
                continue;
            };
            let (dest, lanes) = match &instr.kind {
                InstructionKind::Phi { dest, sources } => match phis {
                    PhiMode::Carried => continue,
                    PhiMode::Merge(arm) => {
                        let source = sources.get(arm).ok_or(EvalError::StrayPhi(block))?;
                        (*dest, Self::scalar(self.read(*source)?))
                    }
                    PhiMode::None => return Err(EvalError::StrayPhi(block)),
                },
                InstructionKind::Alu { op, dest, sources } => {
                    let args = sources
                        .iter()
                        .map(|&src| self.read(src))
                        .collect::<Result<Vec<_>, _>>()?;
                    (*dest, Self::scalar(op.evaluate(&args)))
                }
                InstructionKind::Const { dest, value } => (*dest, Self::scalar(value.value())),
                InstructionKind::Load {
                    dest,
                    resource,
                    base,
                    index,
                    component,
                    width,
                } => {
                    let offset = match index {
                        Some(index) => self.read(*index)?.floor(),
                        None => 0.0,
                    };
                    let slot = (*base as f32 + offset).max(0.0) as u32;
                    let vec4 = self.env.slot(*resource, slot);
                    let mut lanes = [0.0; 4];
                    for (lane, out) in lanes.iter_mut().enumerate().take(*width as usize) {
                        *out = vec4
                            .get(*component as usize + lane)
                            .copied()
                            .unwrap_or_default();
                    }
                    (*dest, lanes)
                }
                InstructionKind::Store { location, value } => {
                    let value = self.read(*value)?;
                    self.outputs.insert(*location, value);
                    continue;
                }
                InstructionKind::Undef { dest } => (*dest, [0.0; 4]),
            };
            self.values.insert(dest, lanes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::{AluOp, BindingKind, ShaderStage};

    #[test]
    fn test_evaluates_if_merge_and_loop() {
        let mut b = ProgramBuilder::new("eval", ShaderStage::Fragment);
        let x = b.load(Resource::InterpolatedInput, 0, 0);
        b.begin_if(x);
        let one = b.constant(1.0);
        b.begin_else();
        let two = b.constant(2.0);
        b.end_if();
        let merged = b.phi(&[one, two]);
        b.begin_loop(TripCount::Static(3));
        let (phi, acc) = b.loop_phi(merged);
        let next = b.alu(AluOp::Add, &[acc, acc]);
        b.set_loop_next(phi, next);
        b.end_loop();
        b.store(0, acc);
        let program = b.finish();

        let taken = Environment::new().with_varying(0, [1.0; 4]);
        assert_eq!(evaluate(&program, &taken).unwrap()[&0], 8.0);
        let not_taken = Environment::new();
        assert_eq!(evaluate(&program, &not_taken).unwrap()[&0], 16.0);
    }

    #[test]
    fn test_indexed_uniform_reads_floor_of_index() {
        let mut b = ProgramBuilder::new("indexed", ShaderStage::Vertex);
        let ubo = b.binding("consts", BindingKind::Uniform { slots: 4 });
        let index = b.load(Resource::Input, 0, 0);
        let loaded = b.load_indexed(Resource::UniformVec4(ubo), 1, Some(index), 1, 2);
        b.store(0, Source::component(loaded, 1));
        let program = b.finish();

        let env = Environment::new()
            .with_input(0, [1.75, 0.0, 0.0, 0.0])
            .with_uniform(ubo, 2, [0.0, 5.0, 6.0, 7.0]);
        assert_eq!(evaluate(&program, &env).unwrap()[&0], 6.0);
    }

    #[test]
    fn test_unknown_trip_count_is_an_error() {
        let mut b = ProgramBuilder::new("unknown", ShaderStage::Vertex);
        b.begin_loop(TripCount::Unknown);
        b.end_loop();
        let program = b.finish();

        assert!(matches!(
            evaluate(&program, &Environment::new()),
            Err(EvalError::UnknownTripCount(_))
        ));
    }
}
