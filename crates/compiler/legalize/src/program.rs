//! # Program
//!
//! The program-level IR: flat arenas of instructions, definitions, blocks and
//! bindings, plus the structured control-flow tree that orders the blocks.
//!
//! # Design Notes
//!
//! - Every reference is an index; removing an instruction leaves a `None` slot
//! - The use set of a definition is updated by every mutation helper, so it
//!   is exact at all times and never recomputed mid-pass
//! - Node lists always start and end with a block, and two regions are never
//!   adjacent, so every region has a block before and after it

use std::fmt;

use index_vec::IndexVec;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::{
    indent_str, BindingId, BlockId, InstrId, Instruction, InstructionKind, PrettyPrint, RegionId,
    Source, ValueId,
};

/// The shader stage a program belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    /// The pixel-processing stage
    Fragment,
}

/// A place that reads a definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Use {
    Instr(InstrId),
    IfCondition(RegionId),
}

/// A value definition and its back-references
#[derive(Debug, Clone, Default)]
pub struct Definition {
    /// Number of components the producer writes
    pub components: u8,
    /// The producing instruction, `None` once it has been removed
    pub producer: Option<InstrId>,
    pub(crate) uses: FxHashSet<Use>,
}

impl Definition {
    pub fn use_count(&self) -> usize {
        self.uses.len()
    }

    pub fn has_uses(&self) -> bool {
        !self.uses.is_empty()
    }

    /// Uses in a deterministic order
    pub fn sorted_uses(&self) -> Vec<Use> {
        let mut uses: Vec<Use> = self.uses.iter().copied().collect();
        uses.sort_unstable();
        uses
    }
}

/// A straight-line sequence of instructions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    pub instructions: Vec<InstrId>,
}

/// Static iteration count of a loop, when known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripCount {
    Static(u32),
    Unknown,
}

/// `if condition != 0 { then_body } else { else_body }`
///
/// Merge phis live at the start of the block that follows the region, with
/// sources `[then_value, else_value]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfRegion {
    pub id: RegionId,
    pub condition: Source,
    pub then_body: Vec<CfNode>,
    pub else_body: Vec<CfNode>,
}

/// A counted loop
///
/// Loop-carried phis live at the start of the first body block with
/// sources `[init, next]`. After the loop they hold the last `next`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopRegion {
    pub id: RegionId,
    pub trip_count: TripCount,
    pub body: Vec<CfNode>,
}

/// Which child list of a region a path step descends into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Arm {
    Then,
    Else,
    Body,
}

/// Position of a region in the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NodePath {
    pub steps: Vec<(usize, Arm)>,
    pub index: usize,
}

/// A node of the structured control-flow tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfNode {
    Block(BlockId),
    If(IfRegion),
    Loop(LoopRegion),
}

impl CfNode {
    pub const fn as_block(&self) -> Option<BlockId> {
        match self {
            Self::Block(id) => Some(*id),
            _ => None,
        }
    }

    pub const fn is_region(&self) -> bool {
        !matches!(self, Self::Block(_))
    }
}

/// Classification of a storage binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Plain uniform storage occupying `slots` vec4 constants
    Uniform { slots: u32 },
    Image,
    Sampler,
}

/// A declared storage binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub kind: BindingKind,
}

impl Binding {
    /// Image and sampler bindings must survive even when unused
    pub const fn is_externally_observable(&self) -> bool {
        matches!(self.kind, BindingKind::Image | BindingKind::Sampler)
    }
}

/// Set of analysis results that are currently valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MetadataSet(u8);

impl MetadataSet {
    pub const NONE: Self = Self(0);
    pub const BLOCK_INDEX: Self = Self(1 << 0);
    pub const INSTR_INDEX: Self = Self(1 << 1);
    pub const DOMINANCE: Self = Self(1 << 2);
    pub const LOOP_ANALYSIS: Self = Self(1 << 3);
    pub const ALL: Self = Self(0b1111);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }
}

/// One compiled shader stage
#[derive(Debug, Clone)]
pub struct Program {
    /// Name used in diagnostics and logs
    pub name: String,
    pub stage: ShaderStage,
    instructions: IndexVec<InstrId, Option<Instruction>>,
    definitions: IndexVec<ValueId, Definition>,
    blocks: IndexVec<BlockId, Block>,
    bindings: IndexVec<BindingId, Option<Binding>>,
    next_region: u32,
    /// The structured control-flow tree, entry block first
    pub(crate) body: Vec<CfNode>,
    metadata: MetadataSet,
}

impl Program {
    /// Creates a program with a single empty entry block
    pub fn new(name: impl Into<String>, stage: ShaderStage) -> Self {
        let mut blocks = IndexVec::new();
        let entry = blocks.push(Block::default());
        Self {
            name: name.into(),
            stage,
            instructions: IndexVec::new(),
            definitions: IndexVec::new(),
            blocks,
            bindings: IndexVec::new(),
            next_region: 0,
            body: vec![CfNode::Block(entry)],
            metadata: MetadataSet::NONE,
        }
    }

    // ==================== Structure ====================

    pub fn body(&self) -> &[CfNode] {
        &self.body
    }

    /// Replaces the control-flow tree; used by builders
    pub(crate) fn set_body(&mut self, body: Vec<CfNode>) {
        self.body = body;
    }

    /// The first block of the top-level node list
    pub fn entry_block(&self) -> Option<BlockId> {
        self.body.first().and_then(CfNode::as_block)
    }

    /// Adds a detached block; the caller places it in the tree
    pub fn add_block(&mut self) -> BlockId {
        self.blocks.push(Block::default())
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    /// Instructions of a block, in order
    pub fn block_instructions(&self, id: BlockId) -> &[InstrId] {
        self.blocks
            .get(id)
            .map_or(&[][..], |block| block.instructions.as_slice())
    }

    pub fn new_region_id(&mut self) -> RegionId {
        let id = RegionId::from_raw(self.next_region);
        self.next_region += 1;
        id
    }

    /// Every block placed in the tree, in program order
    pub fn placed_blocks(&self) -> Vec<BlockId> {
        fn walk(nodes: &[CfNode], out: &mut Vec<BlockId>) {
            for node in nodes {
                match node {
                    CfNode::Block(id) => out.push(*id),
                    CfNode::If(region) => {
                        walk(&region.then_body, out);
                        walk(&region.else_body, out);
                    }
                    CfNode::Loop(region) => walk(&region.body, out),
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.body, &mut out);
        out
    }

    /// Number of if- and loop-regions in the tree
    pub fn region_count(&self) -> usize {
        fn count(nodes: &[CfNode]) -> usize {
            nodes
                .iter()
                .map(|node| match node {
                    CfNode::Block(_) => 0,
                    CfNode::If(region) => {
                        1 + count(&region.then_body) + count(&region.else_body)
                    }
                    CfNode::Loop(region) => 1 + count(&region.body),
                })
                .sum()
        }
        count(&self.body)
    }

    pub(crate) fn find_if(&self, id: RegionId) -> Option<&IfRegion> {
        fn find(nodes: &[CfNode], id: RegionId) -> Option<&IfRegion> {
            nodes.iter().find_map(|node| match node {
                CfNode::Block(_) => None,
                CfNode::If(region) if region.id == id => Some(region),
                CfNode::If(region) => {
                    find(&region.then_body, id).or_else(|| find(&region.else_body, id))
                }
                CfNode::Loop(region) => find(&region.body, id),
            })
        }
        find(&self.body, id)
    }

    fn find_if_mut(nodes: &mut [CfNode], id: RegionId) -> Option<&mut IfRegion> {
        for node in nodes.iter_mut() {
            match node {
                CfNode::Block(_) => {}
                CfNode::If(region) => {
                    if region.id == id {
                        return Some(region);
                    }
                    if let Some(found) = Self::find_if_mut(&mut region.then_body, id) {
                        return Some(found);
                    }
                    if let Some(found) = Self::find_if_mut(&mut region.else_body, id) {
                        return Some(found);
                    }
                }
                CfNode::Loop(region) => {
                    if let Some(found) = Self::find_if_mut(&mut region.body, id) {
                        return Some(found);
                    }
                }
            }
        }
        None
    }

    /// Locates the node list holding a region and the region's index in it
    pub(crate) fn locate_region(&self, id: RegionId) -> Option<NodePath> {
        fn find(nodes: &[CfNode], id: RegionId, steps: &mut Vec<(usize, Arm)>) -> Option<usize> {
            for (index, node) in nodes.iter().enumerate() {
                let children: SmallVec<[(Arm, &[CfNode]); 2]> = match node {
                    CfNode::Block(_) => continue,
                    CfNode::If(region) if region.id == id => return Some(index),
                    CfNode::Loop(region) if region.id == id => return Some(index),
                    CfNode::If(region) => smallvec::smallvec![
                        (Arm::Then, region.then_body.as_slice()),
                        (Arm::Else, region.else_body.as_slice()),
                    ],
                    CfNode::Loop(region) => smallvec::smallvec![(Arm::Body, region.body.as_slice())],
                };
                for (arm, child) in children {
                    steps.push((index, arm));
                    if let Some(found) = find(child, id, steps) {
                        return Some(found);
                    }
                    steps.pop();
                }
            }
            None
        }
        let mut steps = Vec::new();
        let index = find(&self.body, id, &mut steps)?;
        Some(NodePath { steps, index })
    }

    /// The node list reached by following `steps` from the top level
    pub(crate) fn node_list(&self, steps: &[(usize, Arm)]) -> Option<&Vec<CfNode>> {
        let mut list = &self.body;
        for &(index, arm) in steps {
            list = match (list.get(index)?, arm) {
                (CfNode::If(region), Arm::Then) => &region.then_body,
                (CfNode::If(region), Arm::Else) => &region.else_body,
                (CfNode::Loop(region), Arm::Body) => &region.body,
                _ => return None,
            };
        }
        Some(list)
    }

    pub(crate) fn node_list_mut(&mut self, steps: &[(usize, Arm)]) -> Option<&mut Vec<CfNode>> {
        let mut list = &mut self.body;
        for &(index, arm) in steps {
            list = match (list.get_mut(index)?, arm) {
                (CfNode::If(region), Arm::Then) => &mut region.then_body,
                (CfNode::If(region), Arm::Else) => &mut region.else_body,
                (CfNode::Loop(region), Arm::Body) => &mut region.body,
                _ => return None,
            };
        }
        Some(list)
    }

    /// The blocks immediately before and after a region
    pub(crate) fn region_neighbors(&self, id: RegionId) -> Option<(BlockId, BlockId)> {
        let path = self.locate_region(id)?;
        let list = self.node_list(&path.steps)?;
        let before = list.get(path.index.checked_sub(1)?)?.as_block()?;
        let after = list.get(path.index + 1)?.as_block()?;
        Some((before, after))
    }

    /// Swaps a region node for `replacement` and returns the detached region
    pub(crate) fn replace_region(&mut self, id: RegionId, replacement: Vec<CfNode>) -> Option<CfNode> {
        let path = self.locate_region(id)?;
        let list = self.node_list_mut(&path.steps)?;
        list.splice(path.index..=path.index, replacement).next()
    }

    /// Removes every instruction of detached nodes and drops the condition
    /// uses of their if-regions. Values defined inside must be dead outside.
    pub(crate) fn discard_nodes(&mut self, nodes: &[CfNode]) {
        for node in nodes {
            match node {
                CfNode::Block(block) => {
                    let ids = std::mem::take(&mut self.blocks[*block].instructions);
                    for id in ids {
                        if let Some(instr) = self.instructions[id].take() {
                            self.unregister(id, &instr.kind);
                        }
                    }
                }
                CfNode::If(region) => {
                    self.unregister_if_condition(region.id, region.condition);
                    self.discard_nodes(&region.then_body);
                    self.discard_nodes(&region.else_body);
                }
                CfNode::Loop(region) => self.discard_nodes(&region.body),
            }
        }
    }

    /// Merges each block into its predecessor block when the two are
    /// adjacent in a node list. Blocks starting with phis are never merged.
    pub(crate) fn merge_adjacent_blocks(&mut self) -> bool {
        let mut body = std::mem::take(&mut self.body);
        let changed = self.merge_in(&mut body);
        self.body = body;
        changed
    }

    fn merge_in(&mut self, list: &mut Vec<CfNode>) -> bool {
        let mut changed = false;
        let mut index = 0;
        while index < list.len() {
            match &mut list[index] {
                CfNode::Block(_) => {}
                CfNode::If(region) => {
                    changed |= self.merge_in(&mut region.then_body);
                    changed |= self.merge_in(&mut region.else_body);
                }
                CfNode::Loop(region) => changed |= self.merge_in(&mut region.body),
            }
            if let (Some(CfNode::Block(first)), Some(CfNode::Block(second))) =
                (list.get(index), list.get(index + 1))
            {
                let (first, second) = (*first, *second);
                if !self.starts_with_phi(second) {
                    self.splice_block(second, first);
                    list.remove(index + 1);
                    changed = true;
                    continue;
                }
            }
            index += 1;
        }
        changed
    }

    pub fn starts_with_phi(&self, block: BlockId) -> bool {
        self.block_instructions(block)
            .first()
            .and_then(|&id| self.instruction(id))
            .is_some_and(|instr| instr.kind.is_phi())
    }

    /// Leading phis of a block
    pub fn block_phis(&self, block: BlockId) -> Vec<InstrId> {
        self.block_instructions(block)
            .iter()
            .copied()
            .take_while(|&id| self.instruction(id).is_some_and(|instr| instr.kind.is_phi()))
            .collect()
    }

    // ==================== Values and instructions ====================

    /// Allocates a new definition without a producer
    pub fn new_value(&mut self, components: u8) -> ValueId {
        self.definitions.push(Definition {
            components,
            producer: None,
            uses: FxHashSet::default(),
        })
    }

    pub fn definition(&self, value: ValueId) -> Option<&Definition> {
        self.definitions.get(value)
    }

    pub fn use_count(&self, value: ValueId) -> usize {
        self.definitions.get(value).map_or(0, Definition::use_count)
    }

    pub fn definition_count(&self) -> usize {
        self.definitions.len()
    }

    pub fn instruction(&self, id: InstrId) -> Option<&Instruction> {
        self.instructions.get(id).and_then(Option::as_ref)
    }

    /// The live instruction producing `value`
    pub fn producer(&self, value: ValueId) -> Option<(InstrId, &Instruction)> {
        let id = self.definitions.get(value)?.producer?;
        self.instruction(id).map(|instr| (id, instr))
    }

    /// The constant a source reads, with its modifier applied
    pub fn constant_value(&self, source: Source) -> Option<f32> {
        let (_, instr) = self.producer(source.value)?;
        instr
            .kind
            .as_constant()
            .map(|value| source.modifier.apply(value))
    }

    /// All live instructions in arena order
    pub fn live_instructions(&self) -> impl Iterator<Item = (InstrId, &Instruction)> {
        self.instructions
            .iter_enumerated()
            .filter_map(|(id, slot)| slot.as_ref().map(|instr| (id, instr)))
    }

    /// Snapshot of live instruction ids, safe to iterate while mutating
    pub fn live_instruction_ids(&self) -> Vec<InstrId> {
        self.live_instructions().map(|(id, _)| id).collect()
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.iter().filter(|slot| slot.is_some()).count()
    }

    /// Appends an instruction to a block
    pub fn push_instruction(&mut self, block: BlockId, kind: InstructionKind) -> InstrId {
        let position = self.blocks[block].instructions.len();
        self.insert_instruction(block, position, kind)
    }

    /// Inserts an instruction at `position` within a block
    pub fn insert_instruction(
        &mut self,
        block: BlockId,
        position: usize,
        kind: InstructionKind,
    ) -> InstrId {
        let id = self.instructions.push(None);
        self.register(id, &kind);
        self.instructions[id] = Some(Instruction { kind, block });
        self.blocks[block].instructions.insert(position, id);
        id
    }

    /// Inserts an instruction right before `anchor`
    pub fn insert_before(&mut self, anchor: InstrId, kind: InstructionKind) -> Option<InstrId> {
        let block = self.instruction(anchor)?.block;
        let position = self.position_in_block(anchor)?;
        Some(self.insert_instruction(block, position, kind))
    }

    pub fn position_in_block(&self, id: InstrId) -> Option<usize> {
        let block = self.instruction(id)?.block;
        self.blocks[block]
            .instructions
            .iter()
            .position(|&other| other == id)
    }

    /// Removes an instruction and unregisters its uses
    ///
    /// The produced definition stays allocated but loses its producer; callers
    /// redirect its uses first.
    pub fn remove_instruction(&mut self, id: InstrId) -> Option<InstructionKind> {
        let instr = self.instructions.get_mut(id)?.take()?;
        self.unregister(id, &instr.kind);
        self.blocks[instr.block]
            .instructions
            .retain(|&other| other != id);
        Some(instr.kind)
    }

    /// Moves a live instruction to the end of another block
    pub fn move_to_block_end(&mut self, id: InstrId, block: BlockId) {
        let Some(instr) = self.instructions.get_mut(id).and_then(Option::as_mut) else {
            return;
        };
        let from = instr.block;
        instr.block = block;
        self.blocks[from].instructions.retain(|&other| other != id);
        self.blocks[block].instructions.push(id);
    }

    /// Appends all instructions of `from` to `into`, leaving `from` empty
    pub fn splice_block(&mut self, from: BlockId, into: BlockId) {
        let moved = std::mem::take(&mut self.blocks[from].instructions);
        for &id in &moved {
            if let Some(instr) = self.instructions[id].as_mut() {
                instr.block = into;
            }
        }
        self.blocks[into].instructions.extend(moved);
    }

    /// Replaces source `index` of an instruction
    pub fn set_source(&mut self, id: InstrId, index: usize, source: Source) {
        let Some(instr) = self.instructions.get_mut(id).and_then(Option::as_mut) else {
            return;
        };
        let old = {
            let mut sources = instr.kind.sources_mut();
            let Some(slot) = sources.get_mut(index) else {
                return;
            };
            std::mem::replace(&mut **slot, source)
        };
        let still_used = instr.kind.sources().iter().any(|s| s.value == old.value);
        if !still_used {
            self.definitions[old.value].uses.remove(&Use::Instr(id));
        }
        self.definitions[source.value].uses.insert(Use::Instr(id));
    }

    /// Replaces the condition of an if-region
    pub fn set_if_condition(&mut self, region: RegionId, condition: Source) {
        let Some(found) = Self::find_if_mut(&mut self.body, region) else {
            return;
        };
        let old = std::mem::replace(&mut found.condition, condition);
        self.definitions[old.value]
            .uses
            .remove(&Use::IfCondition(region));
        self.definitions[condition.value]
            .uses
            .insert(Use::IfCondition(region));
    }

    /// Records the use of an if-region condition created outside the helpers
    pub(crate) fn register_if_condition(&mut self, region: RegionId, condition: Source) {
        self.definitions[condition.value]
            .uses
            .insert(Use::IfCondition(region));
    }

    /// Drops the use of an if-region condition whose region left the tree
    pub(crate) fn unregister_if_condition(&mut self, region: RegionId, condition: Source) {
        self.definitions[condition.value]
            .uses
            .remove(&Use::IfCondition(region));
    }

    /// Rewrites every source that reads `value`.
    ///
    /// `rewrite` returns the replacement source, or `None` to leave that source
    /// untouched. Users are visited in a deterministic order. Returns the
    /// number of sources rewritten.
    pub fn rewrite_uses(
        &mut self,
        value: ValueId,
        mut rewrite: impl FnMut(Source) -> Option<Source>,
    ) -> usize {
        let users = match self.definitions.get(value) {
            Some(def) => def.sorted_uses(),
            None => return 0,
        };
        let mut rewritten = 0;

        for user in users {
            let mut added: SmallVec<[ValueId; 3]> = SmallVec::new();
            let mut still_used = false;

            match user {
                Use::Instr(id) => {
                    let Some(instr) = self.instructions[id].as_mut() else {
                        continue;
                    };
                    for src in instr.kind.sources_mut() {
                        if src.value != value {
                            continue;
                        }
                        match rewrite(*src) {
                            Some(new) => {
                                *src = new;
                                added.push(new.value);
                                rewritten += 1;
                            }
                            None => still_used = true,
                        }
                    }
                }
                Use::IfCondition(region) => {
                    let Some(found) = Self::find_if_mut(&mut self.body, region) else {
                        continue;
                    };
                    match rewrite(found.condition) {
                        Some(new) => {
                            found.condition = new;
                            added.push(new.value);
                            rewritten += 1;
                        }
                        None => still_used = true,
                    }
                }
            }

            if !still_used {
                self.definitions[value].uses.remove(&user);
            }
            for new_value in added {
                self.definitions[new_value].uses.insert(user);
            }
        }

        rewritten
    }

    /// Redirects every use of the single-component `old` to `new`, composing
    /// modifiers. Uses whose modifiers cannot be composed keep reading `old`.
    pub fn replace_all_uses(&mut self, old: ValueId, new: Source) -> usize {
        self.rewrite_uses(old, |src| src.forward_through(new))
    }

    fn register(&mut self, id: InstrId, kind: &InstructionKind) {
        if let Some(dest) = kind.destination() {
            let def = &mut self.definitions[dest];
            def.producer = Some(id);
            def.components = kind.components();
        }
        for src in kind.sources() {
            self.definitions[src.value].uses.insert(Use::Instr(id));
        }
    }

    fn unregister(&mut self, id: InstrId, kind: &InstructionKind) {
        if let Some(dest) = kind.destination() {
            if self.definitions[dest].producer == Some(id) {
                self.definitions[dest].producer = None;
            }
        }
        for src in kind.sources() {
            self.definitions[src.value].uses.remove(&Use::Instr(id));
        }
    }

    // ==================== Bindings ====================

    pub fn add_binding(&mut self, name: impl Into<String>, kind: BindingKind) -> BindingId {
        self.bindings.push(Some(Binding {
            name: name.into(),
            kind,
        }))
    }

    pub fn binding(&self, id: BindingId) -> Option<&Binding> {
        self.bindings.get(id).and_then(Option::as_ref)
    }

    /// Surviving bindings in declaration order
    pub fn bindings(&self) -> impl Iterator<Item = (BindingId, &Binding)> {
        self.bindings
            .iter_enumerated()
            .filter_map(|(id, slot)| slot.as_ref().map(|binding| (id, binding)))
    }

    pub fn remove_binding(&mut self, id: BindingId) -> Option<Binding> {
        self.bindings.get_mut(id)?.take()
    }

    // ==================== Metadata ====================

    pub const fn metadata(&self) -> MetadataSet {
        self.metadata
    }

    /// Marks analyses as freshly computed
    pub fn mark_metadata_valid(&mut self, valid: MetadataSet) {
        self.metadata = self.metadata.union(valid);
    }

    /// Keeps only the analyses a mutating pass declared as preserved
    pub fn invalidate_metadata(&mut self, preserved: MetadataSet) {
        self.metadata = self.metadata.intersection(preserved);
    }

    // ==================== Validation ====================

    /// Checks the structural and def-use invariants of the program
    pub fn validate(&self) -> Result<(), String> {
        self.validate_tree(&self.body, "body")?;

        let mut placement: FxHashMap<BlockId, usize> = FxHashMap::default();
        for block in self.placed_blocks() {
            *placement.entry(block).or_default() += 1;
        }
        if let Some((block, _)) = placement.iter().find(|(_, &count)| count > 1) {
            return Err(format!("Block {block:?} is placed more than once"));
        }

        let mut expected_uses: FxHashMap<ValueId, FxHashSet<Use>> = FxHashMap::default();

        for (id, instr) in self.live_instructions() {
            if !placement.contains_key(&instr.block) {
                return Err(format!(
                    "Instruction {id:?} lives in block {:?} which is not placed",
                    instr.block
                ));
            }
            let in_block = self.blocks[instr.block]
                .instructions
                .iter()
                .filter(|&&other| other == id)
                .count();
            if in_block != 1 {
                return Err(format!(
                    "Instruction {id:?} appears {in_block} times in block {:?}",
                    instr.block
                ));
            }
            match &instr.kind {
                InstructionKind::Alu { op, sources, .. } if sources.len() != op.arity() => {
                    return Err(format!(
                        "{id:?} passes {} sources to {op:?}, which takes {}",
                        sources.len(),
                        op.arity()
                    ));
                }
                InstructionKind::Phi { sources, .. } if sources.len() != 2 => {
                    return Err(format!("Phi {id:?} has {} sources, expected 2", sources.len()));
                }
                _ => {}
            }
            if let Some(dest) = instr.kind.destination() {
                if self.definitions.get(dest).and_then(|d| d.producer) != Some(id) {
                    return Err(format!("Definition %{} is not produced by {id:?}", dest.index()));
                }
            }
            for src in instr.kind.sources() {
                self.validate_source(*src, &format!("{id:?}"))?;
                expected_uses
                    .entry(src.value)
                    .or_default()
                    .insert(Use::Instr(id));
            }
        }

        self.collect_condition_uses(&self.body, &mut expected_uses)?;

        for (value, def) in self.definitions.iter_enumerated() {
            let expected = expected_uses.remove(&value).unwrap_or_default();
            if def.uses != expected {
                return Err(format!(
                    "Use set of %{} is stale: recorded {}, actual {}",
                    value.index(),
                    def.uses.len(),
                    expected.len()
                ));
            }
        }

        for (block_id, block) in self.blocks.iter_enumerated() {
            let mut seen_non_phi = false;
            for &id in &block.instructions {
                let instr = self
                    .instruction(id)
                    .ok_or_else(|| format!("Block {block_id:?} lists removed {id:?}"))?;
                if instr.block != block_id {
                    return Err(format!("{id:?} is listed in the wrong block {block_id:?}"));
                }
                if instr.kind.is_phi() {
                    if seen_non_phi {
                        return Err(format!("Phi {id:?} is not at the start of {block_id:?}"));
                    }
                } else {
                    seen_non_phi = true;
                }
            }
        }

        Ok(())
    }

    fn validate_source(&self, src: Source, context: &str) -> Result<(), String> {
        let def = self
            .definitions
            .get(src.value)
            .ok_or_else(|| format!("{context} reads unknown %{}", src.value.index()))?;
        let producer = def
            .producer
            .ok_or_else(|| format!("{context} reads removed %{}", src.value.index()))?;
        if self.instruction(producer).is_none() {
            return Err(format!("{context} reads %{} of a removed producer", src.value.index()));
        }
        if src.component >= def.components {
            return Err(format!(
                "{context} reads component {} of %{} which has {}",
                src.component,
                src.value.index(),
                def.components
            ));
        }
        Ok(())
    }

    fn validate_tree(&self, nodes: &[CfNode], context: &str) -> Result<(), String> {
        match (nodes.first(), nodes.last()) {
            (Some(CfNode::Block(_)), Some(CfNode::Block(_))) => {}
            _ => return Err(format!("Node list of {context} must start and end with a block")),
        }
        for pair in nodes.windows(2) {
            if pair[0].is_region() && pair[1].is_region() {
                return Err(format!("Adjacent regions in {context}"));
            }
        }
        for node in nodes {
            match node {
                CfNode::Block(_) => {}
                CfNode::If(region) => {
                    self.validate_tree(&region.then_body, "then branch")?;
                    self.validate_tree(&region.else_body, "else branch")?;
                }
                CfNode::Loop(region) => self.validate_tree(&region.body, "loop body")?,
            }
        }
        Ok(())
    }

    fn collect_condition_uses(
        &self,
        nodes: &[CfNode],
        expected: &mut FxHashMap<ValueId, FxHashSet<Use>>,
    ) -> Result<(), String> {
        for node in nodes {
            match node {
                CfNode::Block(_) => {}
                CfNode::If(region) => {
                    self.validate_source(region.condition, &format!("{:?}", region.id))?;
                    expected
                        .entry(region.condition.value)
                        .or_default()
                        .insert(Use::IfCondition(region.id));
                    self.collect_condition_uses(&region.then_body, expected)?;
                    self.collect_condition_uses(&region.else_body, expected)?;
                }
                CfNode::Loop(region) => self.collect_condition_uses(&region.body, expected)?,
            }
        }
        Ok(())
    }

    fn pretty_print_nodes(&self, nodes: &[CfNode], indent: usize, out: &mut String) {
        for node in nodes {
            match node {
                CfNode::Block(id) => {
                    out.push_str(&format!("{}block{}:\n", indent_str(indent), id.index()));
                    for &instr in self.block_instructions(*id) {
                        if let Some(instr) = self.instruction(instr) {
                            out.push_str(&indent_str(indent + 1));
                            out.push_str(&instr.kind.pretty_print(0));
                            out.push('\n');
                        }
                    }
                }
                CfNode::If(region) => {
                    out.push_str(&format!("{}if {} {{\n", indent_str(indent), region.condition));
                    self.pretty_print_nodes(&region.then_body, indent + 1, out);
                    out.push_str(&format!("{}}} else {{\n", indent_str(indent)));
                    self.pretty_print_nodes(&region.else_body, indent + 1, out);
                    out.push_str(&format!("{}}}\n", indent_str(indent)));
                }
                CfNode::Loop(region) => {
                    let trips = match region.trip_count {
                        TripCount::Static(n) => n.to_string(),
                        TripCount::Unknown => "?".to_string(),
                    };
                    out.push_str(&format!("{}loop x{trips} {{\n", indent_str(indent)));
                    self.pretty_print_nodes(&region.body, indent + 1, out);
                    out.push_str(&format!("{}}}\n", indent_str(indent)));
                }
            }
        }
    }
}

impl PrettyPrint for Program {
    fn pretty_print(&self, indent: usize) -> String {
        let stage = match self.stage {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        };
        let mut out = format!("{}{stage} {} {{\n", indent_str(indent), self.name);
        for (id, binding) in self.bindings() {
            let kind = match binding.kind {
                BindingKind::Uniform { slots } => format!("uniform[{slots}]"),
                BindingKind::Image => "image".to_string(),
                BindingKind::Sampler => "sampler".to_string(),
            };
            out.push_str(&format!(
                "{}binding{} {}: {kind}\n",
                indent_str(indent + 1),
                id.index(),
                binding.name
            ));
        }
        self.pretty_print_nodes(&self.body, indent + 1, &mut out);
        out.push_str(&format!("{}}}\n", indent_str(indent)));
        out
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty_print(0))
    }
}
