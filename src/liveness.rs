//! Liveness analysis (§4.3): a worklist-driven backward fixed-point over the
//! control flow graph, producing a `{live, begin, end}` record for every
//! `(Value, Block)` pair where the value is live.
//!
//! Unlike `cranelift-codegen`'s `regalloc::liveness`, which tracks one
//! live range per value spanning several blocks plus a per-block liveness
//! bit, this keeps one independent record *per block* the value is live in —
//! closer to the conventional "local interval" liveness used by stack-based
//! bytecode allocators, and simpler to interrogate from the stack
//! pre-coloring pass (§4.4), which only ever needs a single block's view.

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Function, Value};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

/// A value's liveness window within one basic block.
///
/// `begin` is the instruction position where the value is defined, or `0` if
/// it is live-in (defined in some other block). `end` is the position of its
/// last use in this block, or the block's length if it is live-out.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LiveRange {
    pub live: bool,
    pub begin: u32,
    pub end: u32,
}

/// Per-block liveness records for every value, computed once and queried
/// throughout the rest of the pipeline (stack pre-coloring, register
/// allocation, the verifier).
#[derive(Default)]
pub struct Liveness {
    ranges: FxHashMap<(Value, Block), LiveRange>,
    live_out: FxHashMap<Block, FxHashSet<Value>>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
        self.live_out.clear();
    }

    pub fn with_function(func: &Function, cfg: &ControlFlowGraph) -> Self {
        let mut liveness = Self::new();
        liveness.compute(func, cfg);
        liveness
    }

    pub fn range(&self, value: Value, block: Block) -> Option<&LiveRange> {
        self.ranges.get(&(value, block))
    }

    pub fn is_live_out(&self, value: Value, block: Block) -> bool {
        self.live_out.get(&block).is_some_and(|set| set.contains(&value))
    }

    /// Do `a` and `b` interfere in `block`? Per §3: both must be live there,
    /// and their `[begin, end]` windows must overlap — equal `begin`s always
    /// count, since two definitions at the same position would need two
    /// slots regardless of how short-lived either one is.
    pub fn interferes(&self, a: Value, b: Value, block: Block) -> bool {
        if a == b {
            return false;
        }
        let (Some(ra), Some(rb)) = (self.range(a, block), self.range(b, block)) else {
            return false;
        };
        ra.live && rb.live && ra.begin <= rb.end && rb.begin <= ra.end
    }

    /// Run the backward dataflow fixed-point over `func`, populating every
    /// per-block liveness record.
    pub fn compute(&mut self, func: &Function, cfg: &ControlFlowGraph) {
        self.clear();

        let mut worklist: VecDeque<Block> = cfg.exits(func).into_iter().collect();
        let mut queued: FxHashSet<Block> = worklist.iter().copied().collect();

        while let Some(block) = worklist.pop_front() {
            queued.remove(&block);
            let (propagate, phi_propagate) = self.process_block(func, block);

            for pred in cfg.predecessors(block) {
                if self.merge_live_out(pred.block, &propagate) && queued.insert(pred.block) {
                    worklist.push_back(pred.block);
                }
            }
            for (pred_block, values) in phi_propagate {
                if self.merge_live_out(pred_block, &values) && queued.insert(pred_block) {
                    worklist.push_back(pred_block);
                }
            }
        }
    }

    fn merge_live_out(&mut self, block: Block, values: &FxHashSet<Value>) -> bool {
        if values.is_empty() {
            return false;
        }
        let set = self.live_out.entry(block).or_default();
        let before = set.len();
        set.extend(values.iter().copied());
        set.len() != before
    }

    /// Process one block's instructions in reverse, per §4.3 steps 1-3.
    /// Returns the accumulator to propagate into every ordinary predecessor's
    /// live-out, and the phi-input accumulators to propagate only into their
    /// specific predecessor.
    fn process_block(
        &mut self,
        func: &Function,
        block: Block,
    ) -> (FxHashSet<Value>, FxHashMap<Block, FxHashSet<Value>>) {
        let insts = &func.blocks[block].insts;
        let len = insts.len() as u32;

        let live_out = self.live_out.get(&block).cloned().unwrap_or_default();
        for &v in &live_out {
            self.ranges.insert(
                (v, block),
                LiveRange { live: true, begin: 0, end: len },
            );
        }

        let mut accumulator: FxHashSet<Value> = live_out;
        let mut phi_accs: FxHashMap<Block, FxHashSet<Value>> = FxHashMap::default();

        for (pos, &inst) in insts.iter().enumerate().rev() {
            let pos = pos as u32;
            let data = &func.insts[inst];

            if data.opcode.is_phi() {
                for &(pred, v) in &func.phis[&inst].incoming {
                    let already = accumulator.contains(&v)
                        || phi_accs.get(&pred).is_some_and(|s| s.contains(&v));
                    if !already {
                        self.ranges
                            .insert((v, block), LiveRange { live: true, begin: 0, end: pos });
                        phi_accs.entry(pred).or_default().insert(v);
                    }
                }
            } else {
                for v in data.each_arg() {
                    if accumulator.insert(v) {
                        self.ranges
                            .insert((v, block), LiveRange { live: true, begin: 0, end: pos });
                    }
                }
            }

            if let Some(result) = data.result {
                if accumulator.remove(&result) {
                    if let Some(r) = self.ranges.get_mut(&(result, block)) {
                        r.begin = pos;
                    }
                }
            }
        }

        // Anything left over at position 0 is live-in: defined elsewhere,
        // so `begin` stays 0 (set when each record was first inserted).
        (accumulator, phi_accs)
    }
}
