//! # Program Builder
//!
//! A builder for constructing structured programs. It tracks the current
//! block and the stack of open regions so callers never touch the
//! control-flow tree directly.

use crate::{
    AluOp, BindingId, BindingKind, BlockId, CfNode, IfRegion, InstrId, InstructionKind,
    LoopRegion, Program, RegionId, Resource, ShaderStage, Source, TripCount, ValueId,
};

/// An open region while its body is being built
enum Frame {
    If {
        id: RegionId,
        condition: Source,
        parent: Vec<CfNode>,
        then_body: Option<Vec<CfNode>>,
    },
    Loop {
        id: RegionId,
        trip_count: TripCount,
        parent: Vec<CfNode>,
    },
}

/// A builder for structured programs
///
/// Every region opened with [`begin_if`](Self::begin_if) or
/// [`begin_loop`](Self::begin_loop) must be closed before
/// [`finish`](Self::finish).
pub struct ProgramBuilder {
    program: Program,
    nodes: Vec<CfNode>,
    frames: Vec<Frame>,
    current_block: BlockId,
}

impl ProgramBuilder {
    pub fn new(name: impl Into<String>, stage: ShaderStage) -> Self {
        let mut program = Program::new(name, stage);
        let nodes = std::mem::take(&mut program.body);
        let current_block = nodes
            .first()
            .and_then(CfNode::as_block)
            .unwrap_or_else(|| program.add_block());
        Self {
            program,
            nodes,
            frames: Vec::new(),
            current_block,
        }
    }

    pub const fn current_block(&self) -> BlockId {
        self.current_block
    }

    pub fn binding(&mut self, name: impl Into<String>, kind: BindingKind) -> BindingId {
        self.program.add_binding(name, kind)
    }

    /// Appends an instruction to the current block
    pub fn push(&mut self, kind: InstructionKind) -> InstrId {
        self.program.push_instruction(self.current_block, kind)
    }

    pub fn alu(&mut self, op: AluOp, sources: &[Source]) -> Source {
        let dest = self.program.new_value(1);
        self.push(InstructionKind::alu(op, dest, sources));
        Source::new(dest)
    }

    pub fn constant(&mut self, value: f32) -> Source {
        let dest = self.program.new_value(1);
        self.push(InstructionKind::constant(dest, value));
        Source::new(dest)
    }

    /// Loads one component from a constant slot
    pub fn load(&mut self, resource: Resource, base: u32, component: u8) -> Source {
        let dest = self.program.new_value(1);
        self.push(InstructionKind::load(dest, resource, base, component));
        Source::new(dest)
    }

    /// Loads `width` components from slot `base + floor(index)`
    pub fn load_indexed(
        &mut self,
        resource: Resource,
        base: u32,
        index: Option<Source>,
        component: u8,
        width: u8,
    ) -> ValueId {
        let dest = self.program.new_value(width);
        self.push(InstructionKind::Load {
            dest,
            resource,
            base,
            index,
            component,
            width,
        });
        dest
    }

    pub fn store(&mut self, location: u32, value: Source) -> InstrId {
        self.push(InstructionKind::Store { location, value })
    }

    pub fn undef(&mut self) -> Source {
        let dest = self.program.new_value(1);
        self.push(InstructionKind::Undef { dest });
        Source::new(dest)
    }

    /// Adds a phi to the current block; phis must precede other instructions
    pub fn phi(&mut self, sources: &[Source]) -> Source {
        let dest = self.program.new_value(1);
        self.push(InstructionKind::phi(dest, sources));
        Source::new(dest)
    }

    /// Adds a loop-carried phi whose back-edge value is set later with
    /// [`set_loop_next`](Self::set_loop_next)
    pub fn loop_phi(&mut self, init: Source) -> (InstrId, Source) {
        let dest = self.program.new_value(1);
        let id = self.push(InstructionKind::phi(dest, &[init, init]));
        (id, Source::new(dest))
    }

    pub fn set_loop_next(&mut self, phi: InstrId, next: Source) {
        self.program.set_source(phi, 1, next);
    }

    fn open_block(&mut self) {
        let block = self.program.add_block();
        self.nodes.push(CfNode::Block(block));
        self.current_block = block;
    }

    /// Opens an if-region; instructions go to the then branch
    pub fn begin_if(&mut self, condition: Source) -> RegionId {
        let id = self.program.new_region_id();
        self.program.register_if_condition(id, condition);
        let parent = std::mem::take(&mut self.nodes);
        self.frames.push(Frame::If {
            id,
            condition,
            parent,
            then_body: None,
        });
        self.open_block();
        id
    }

    /// Switches to the else branch of the innermost if-region
    pub fn begin_else(&mut self) {
        let body = std::mem::take(&mut self.nodes);
        if let Some(Frame::If { then_body, .. }) = self.frames.last_mut() {
            debug_assert!(then_body.is_none(), "else branch opened twice");
            *then_body = Some(body);
        }
        self.open_block();
    }

    /// Closes the innermost if-region; the current block becomes the merge
    /// block where phis go
    pub fn end_if(&mut self) {
        let Some(Frame::If {
            id,
            condition,
            parent,
            then_body,
        }) = self.frames.pop()
        else {
            debug_assert!(false, "end_if without matching begin_if");
            return;
        };
        let current = std::mem::replace(&mut self.nodes, parent);
        let (then_body, else_body) = match then_body {
            Some(then_body) => (then_body, current),
            None => {
                let empty = self.program.add_block();
                (current, vec![CfNode::Block(empty)])
            }
        };
        self.nodes.push(CfNode::If(IfRegion {
            id,
            condition,
            then_body,
            else_body,
        }));
        self.open_block();
    }

    /// Opens a loop; the current block becomes the loop header where
    /// loop-carried phis go
    pub fn begin_loop(&mut self, trip_count: TripCount) -> RegionId {
        let id = self.program.new_region_id();
        let parent = std::mem::take(&mut self.nodes);
        self.frames.push(Frame::Loop {
            id,
            trip_count,
            parent,
        });
        self.open_block();
        id
    }

    pub fn end_loop(&mut self) {
        let Some(Frame::Loop {
            id,
            trip_count,
            parent,
        }) = self.frames.pop()
        else {
            debug_assert!(false, "end_loop without matching begin_loop");
            return;
        };
        let body = std::mem::replace(&mut self.nodes, parent);
        self.nodes.push(CfNode::Loop(LoopRegion {
            id,
            trip_count,
            body,
        }));
        self.open_block();
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn finish(mut self) -> Program {
        debug_assert!(self.frames.is_empty(), "unclosed region");
        self.program.set_body(self.nodes);
        self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_if_region_layout() {
        let mut b = ProgramBuilder::new("layout", ShaderStage::Fragment);
        let cond = b.load(Resource::InterpolatedInput, 0, 0);
        b.begin_if(cond);
        let then_val = b.constant(1.0);
        b.begin_else();
        let else_val = b.constant(2.0);
        b.end_if();
        let merged = b.phi(&[then_val, else_val]);
        b.store(0, merged);
        let program = b.finish();

        assert_eq!(program.body().len(), 3);
        assert!(matches!(program.body()[1], CfNode::If(_)));
        assert_eq!(program.use_count(cond.value), 1);
        assert!(program.validate().is_ok());
    }

    #[test]
    fn test_if_without_else_gets_empty_block() {
        let mut b = ProgramBuilder::new("no_else", ShaderStage::Vertex);
        let cond = b.load(Resource::Input, 0, 0);
        b.begin_if(cond);
        b.store(0, cond);
        b.end_if();
        let program = b.finish();

        let CfNode::If(region) = &program.body()[1] else {
            panic!("expected if region");
        };
        assert_eq!(region.else_body.len(), 1);
        assert!(program.validate().is_ok());
    }

    #[test]
    fn test_loop_phi_back_edge() {
        let mut b = ProgramBuilder::new("loop", ShaderStage::Vertex);
        let init = b.constant(0.0);
        b.begin_loop(TripCount::Static(3));
        let (phi, counter) = b.loop_phi(init);
        let one = b.constant(1.0);
        let next = b.alu(AluOp::Add, &[counter, one]);
        b.set_loop_next(phi, next);
        b.end_loop();
        b.store(0, counter);
        let program = b.finish();

        assert_eq!(program.use_count(next.value), 1);
        assert_eq!(program.use_count(init.value), 1);
        assert!(program.validate().is_ok());
    }
}
