//! A control flow graph represented as mappings of basic blocks to their
//! predecessors and successors.
//!
//! Successors are read directly off each [`BasicBlock`]'s `next0`/`next1`
//! fields (spec §3 gives blocks their successor pointers directly, unlike
//! `cranelift-codegen`'s flowgraph, which derives them by analyzing the
//! terminator instruction's branch targets). This module's job is purely to
//! invert that mapping into predecessor lists, exactly as
//! `cranelift-codegen`'s `ControlFlowGraph` does for its own successor sets.

use crate::ir::{Block, Function};
use cranelift_entity::SecondaryMap;

/// A predecessor edge: the block it originates from, and the id (by
/// position in program order) of its terminator, used by the stack
/// pre-coloring rule to distinguish a fallthrough (`next0`) edge from a
/// taken conditional-branch (`next1`) edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPredecessor {
    pub block: Block,
    /// `true` if this predecessor reaches the successor via its `next0`
    /// (fallthrough) edge rather than a conditional `next1` target.
    pub is_fallthrough: bool,
}

#[derive(Clone, Default)]
struct CfgNode {
    predecessors: Vec<BlockPredecessor>,
    successors: Vec<Block>,
}

/// The control flow graph: a mapping of blocks to their predecessors and
/// successors, computed in one pass over the function's blocks.
pub struct ControlFlowGraph {
    data: SecondaryMap<Block, CfgNode>,
    valid: bool,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        ControlFlowGraph {
            data: SecondaryMap::new(),
            valid: false,
        }
    }

    pub fn with_function(func: &Function) -> Self {
        let mut cfg = Self::new();
        cfg.compute(func);
        cfg
    }

    pub fn compute(&mut self, func: &Function) {
        self.data = SecondaryMap::new();
        for block in func.block_ids() {
            let bb = &func.blocks[block];
            let mut successors = Vec::new();
            if let Some(next0) = bb.next0 {
                successors.push(next0);
                self.data[next0].predecessors.push(BlockPredecessor {
                    block,
                    is_fallthrough: true,
                });
            }
            if let Some(next1) = bb.next1 {
                successors.push(next1);
                self.data[next1].predecessors.push(BlockPredecessor {
                    block,
                    is_fallthrough: false,
                });
            }
            self.data[block].successors = successors;
        }
        self.valid = true;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn predecessors(&self, block: Block) -> &[BlockPredecessor] {
        &self.data[block].predecessors
    }

    pub fn successors(&self, block: Block) -> &[Block] {
        &self.data[block].successors
    }

    /// Blocks with no successor: `Return`/`Deopt`-terminated blocks.
    pub fn exits(&self, func: &Function) -> Vec<Block> {
        func.block_ids()
            .filter(|&b| self.successors(b).is_empty())
            .collect()
    }

    /// Transitive reachability test: is `a` a predecessor of `b`, possibly
    /// through intermediate blocks? Used by liveness to propagate a
    /// phi-input accumulator into the specific predecessor (or its
    /// dominators) rather than every predecessor (spec §4.3).
    pub fn is_predecessor(&self, a: Block, b: Block) -> bool {
        let mut stack = vec![b];
        let mut seen = std::collections::HashSet::new();
        while let Some(cur) = stack.pop() {
            if !seen.insert(cur) {
                continue;
            }
            for pred in self.predecessors(cur) {
                if pred.block == a {
                    return true;
                }
                stack.push(pred.block);
            }
        }
        false
    }
}

impl Default for ControlFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}
