//! The PIR function (`Code` in spec terms): an arena of instructions grouped
//! into basic blocks, plus the sidecar use-lists instructions need to expose
//! `hasSingleUse()`/`replaceUsesWith()` (spec §6).

use super::entities::{Block, Inst, Value};
use super::instruction::{Instruction, Opcode, ValueType};
use cranelift_entity::{EntityRef, PrimaryMap};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::fmt;

/// A phi's incoming edges: `(predecessor_block, incoming_value)` pairs.
/// Kept out of [`Instruction`] because a phi's "arguments" are pairs, not
/// plain `Value`s (spec §3).
#[derive(Clone, Debug, Default)]
pub struct PhiData {
    pub incoming: Vec<(Block, Value)>,
}

/// Where a `Value` is used: either as the `i`-th plain argument of an
/// instruction, or as the incoming value on the `i`-th edge of a phi.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UseSite {
    Arg(Inst, usize),
    PhiIncoming(Inst, usize),
}

/// An ordered sequence of instructions with explicit successor edges.
///
/// Two successors (`next0`, `next1`) iff the terminator is a conditional
/// branch; one (`next0` only) for an unconditional fallthrough/jump; none
/// for an exit block (`Return`/`Deopt`).
#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
    pub insts: Vec<Inst>,
    pub next0: Option<Block>,
    pub next1: Option<Block>,
}

impl BasicBlock {
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn successors(&self) -> impl Iterator<Item = Block> {
        self.next0.into_iter().chain(self.next1)
    }
}

/// A lowering unit: one function body or one promise body, pre-CSSA and
/// pre-allocation. Mutated in place by CSSA construction only (spec §3
/// invariant: "liveness, allocation, and emission never mutate the IR beyond
/// the CSSA pass").
#[derive(Clone, Debug)]
pub struct Function {
    pub entry: Block,
    pub blocks: PrimaryMap<Block, BasicBlock>,
    pub insts: PrimaryMap<Inst, Instruction>,
    pub phis: FxHashMap<Inst, PhiData>,
    inst_block: FxHashMap<Inst, Block>,
    uses: FxHashMap<Value, Vec<UseSite>>,
}

impl Function {
    pub fn new() -> Self {
        let mut blocks = PrimaryMap::new();
        let entry = blocks.push(BasicBlock::default());
        Function {
            entry,
            blocks,
            insts: PrimaryMap::new(),
            phis: FxHashMap::default(),
            inst_block: FxHashMap::default(),
            uses: FxHashMap::default(),
        }
    }

    pub fn make_block(&mut self) -> Block {
        self.blocks.push(BasicBlock::default())
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn inst_block(&self, inst: Inst) -> Option<Block> {
        self.inst_block.get(&inst).copied()
    }

    /// Append `inst` to the end of `block`, registering its argument uses.
    /// This is the only way new instructions enter the IR, so use-list
    /// bookkeeping lives here rather than in a separate pass.
    pub fn append_inst(&mut self, block: Block, inst: Instruction) -> Inst {
        let key = self.create_inst(block, inst);
        self.blocks[block].insts.push(key);
        key
    }

    /// Insert `inst` immediately before `block`'s terminator, or at the end
    /// of `block` if it has none yet. Used by CSSA construction (§4.2 step
    /// 1) to place a copy ahead of a predecessor's terminating branch.
    pub fn insert_inst_before_terminator(&mut self, block: Block, inst: Instruction) -> Inst {
        let key = self.create_inst(block, inst);
        let insts = &mut self.blocks[block].insts;
        let pos = if insts.last().is_some_and(|&last| self.insts[last].opcode.is_terminator()) {
            insts.len() - 1
        } else {
            insts.len()
        };
        insts.insert(pos, key);
        key
    }

    /// Insert `inst` immediately after `after` within `block`. Used by CSSA
    /// construction (§4.2 step 3) to place the phi's own forwarding copy.
    pub fn insert_inst_after(&mut self, block: Block, after: Inst, inst: Instruction) -> Inst {
        let key = self.create_inst(block, inst);
        let insts = &mut self.blocks[block].insts;
        let pos = insts.iter().position(|&i| i == after).expect("`after` not in `block`") + 1;
        insts.insert(pos, key);
        key
    }

    fn create_inst(&mut self, block: Block, inst: Instruction) -> Inst {
        let has_result = !inst.has_void_result();
        let args: SmallVec<[Value; 4]> = inst.args.clone();
        let is_phi = inst.opcode.is_phi();
        let key = self.insts.push(inst);
        if !is_phi {
            for (i, v) in args.iter().enumerate() {
                self.uses.entry(*v).or_default().push(UseSite::Arg(key, i));
            }
        }
        if has_result {
            self.insts[key].result = Some(self.result_value_for(key));
        }
        self.inst_block.insert(key, block);
        key
    }

    /// Allocate the `Value` a newly-created instruction's result refers to.
    /// One instruction always defines at most one value, so we can derive a
    /// stable `Value` identity directly from the `Inst` index rather than
    /// keeping a separate counter.
    fn result_value_for(&self, inst: Inst) -> Value {
        Value::new(inst.index())
    }

    /// The `Value` that will be assigned to the next instruction appended or
    /// inserted, without actually creating it. CSSA construction (§4.2) uses
    /// this to rewrite a phi's existing uses to its forwarding copy's output
    /// *before* the copy instruction exists, so the rewrite does not also
    /// catch the copy's own argument.
    pub fn next_value(&self) -> Value {
        Value::new(self.insts.len())
    }

    /// Register a phi's incoming edges and, symmetrically with
    /// `append_inst`, record a use at each edge.
    pub fn set_phi_incoming(&mut self, phi_inst: Inst, incoming: Vec<(Block, Value)>) {
        for (i, (_, v)) in incoming.iter().enumerate() {
            self.uses
                .entry(*v)
                .or_default()
                .push(UseSite::PhiIncoming(phi_inst, i));
        }
        self.phis.insert(phi_inst, PhiData { incoming });
    }

    pub fn value_def(&self, v: Value) -> Inst {
        Inst::new(v.index())
    }

    pub fn opcode_of(&self, v: Value) -> Opcode {
        self.insts[self.value_def(v)].opcode
    }

    /// Constants and environment sentinels are never allocated a slot; they
    /// are re-materialized at every use site (spec §3, §4.7).
    pub fn is_materialized_inline(&self, v: Value) -> bool {
        matches!(
            self.opcode_of(v),
            Opcode::LdConst(_) | Opcode::LdNil | Opcode::ParentEnv
        )
    }

    pub fn uses_of(&self, v: Value) -> &[UseSite] {
        self.uses.get(&v).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn use_count(&self, v: Value) -> usize {
        self.uses_of(v).len()
    }

    pub fn has_single_use(&self, v: Value) -> bool {
        self.use_count(v) == 1
    }

    /// Rewrite every use of `old` to refer to `new` instead. Used exclusively
    /// by CSSA construction (§4.2); see `cssa::construct` for why it is
    /// invoked *before* the forwarding copy itself is created.
    pub fn replace_uses_with(&mut self, old: Value, new: Value) {
        let sites = self.uses.remove(&old).unwrap_or_default();
        for site in &sites {
            match *site {
                UseSite::Arg(inst, i) => self.insts[inst].args[i] = new,
                UseSite::PhiIncoming(inst, i) => {
                    self.phis.get_mut(&inst).unwrap().incoming[i].1 = new;
                }
            }
        }
        self.uses.entry(new).or_default().extend(sites);
    }

    pub fn ty_of(&self, v: Value) -> ValueType {
        self.insts[self.value_def(v)].ty
    }

    /// Iterate blocks in the order they were created (used by the emitter's
    /// breadth-first walk as a stable starting order before BFS re-sorts).
    pub fn block_ids(&self) -> impl Iterator<Item = Block> {
        self.blocks.keys()
    }
}

impl Default for Function {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in self.block_ids() {
            writeln!(f, "{block}:")?;
            for &inst in &self.blocks[block].insts {
                let data = &self.insts[inst];
                if let Some(r) = data.result {
                    write!(f, "    {r} = ")?;
                } else {
                    write!(f, "    ")?;
                }
                writeln!(f, "{}({:?})", data.opcode, data.args.as_slice())?;
            }
        }
        Ok(())
    }
}
