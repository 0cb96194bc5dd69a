//! A dominator tree represented as a mapping of blocks to their immediate
//! dominator, computed with the Cooper/Harvey/Kennedy "simple, fast
//! dominance" algorithm — the same iterative finger algorithm
//! `cranelift-codegen`'s `DominatorTree` uses, adapted to this crate's
//! block-owns-its-successors representation (no branch-instruction
//! indirection is needed here; see `flowgraph.rs`).

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Function};
use cranelift_entity::SecondaryMap;

#[derive(Clone, Copy, Default)]
struct DomNode {
    /// Position in reverse postorder, `0` for unreachable blocks.
    rpo_number: u32,
    idom: Option<Block>,
}

pub struct DominatorTree {
    nodes: SecondaryMap<Block, DomNode>,
    postorder: Vec<Block>,
    valid: bool,
}

impl DominatorTree {
    pub fn new() -> Self {
        DominatorTree {
            nodes: SecondaryMap::new(),
            postorder: Vec::new(),
            valid: false,
        }
    }

    pub fn with_function(func: &Function, cfg: &ControlFlowGraph) -> Self {
        let mut tree = Self::new();
        tree.compute(func, cfg);
        tree
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_reachable(&self, block: Block) -> bool {
        self.nodes[block].rpo_number != 0
    }

    pub fn idom(&self, block: Block) -> Option<Block> {
        self.nodes[block].idom
    }

    /// Compute the dominator tree of `func` from scratch.
    pub fn compute(&mut self, func: &Function, cfg: &ControlFlowGraph) {
        self.nodes = SecondaryMap::new();
        self.postorder = compute_postorder(func, cfg);

        // RPO number: index into the reverse of `postorder`, 1-based so 0 is
        // free to mean "unreachable".
        for (rpo_idx, &block) in self.postorder.iter().rev().enumerate() {
            self.nodes[block].rpo_number = (rpo_idx + 1) as u32;
        }

        let entry = func.entry;
        self.nodes[entry].idom = Some(entry);

        let mut changed = true;
        while changed {
            changed = false;
            // Process in RPO (forwards), skipping the entry block.
            for &block in self.postorder.iter().rev() {
                if block == entry {
                    continue;
                }
                let mut new_idom: Option<Block> = None;
                for pred in cfg.predecessors(block) {
                    if self.nodes[pred.block].rpo_number == 0 {
                        continue; // predecessor not yet processed/unreachable
                    }
                    new_idom = Some(match new_idom {
                        None => pred.block,
                        Some(cur) => self.intersect(cur, pred.block),
                    });
                }
                if self.nodes[block].idom != new_idom {
                    self.nodes[block].idom = new_idom;
                    changed = true;
                }
            }
        }
        self.valid = true;
    }

    fn intersect(&self, mut a: Block, mut b: Block) -> Block {
        while a != b {
            while self.nodes[a].rpo_number > self.nodes[b].rpo_number {
                a = self.nodes[a].idom.expect("walked past entry");
            }
            while self.nodes[b].rpo_number > self.nodes[a].rpo_number {
                b = self.nodes[b].idom.expect("walked past entry");
            }
        }
        a
    }

    /// Does `a` dominate `b`? Every block dominates itself.
    pub fn dominates(&self, a: Block, mut b: Block) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return a == b;
        }
        loop {
            if a == b {
                return true;
            }
            match self.nodes[b].idom {
                Some(idom) if idom != b => b = idom,
                _ => return false,
            }
        }
    }

    /// Blocks in dominator-tree preorder: a block always precedes everything
    /// it dominates. Drives the register allocator's dominance-order
    /// coloring walk (spec §4.5(b)).
    pub fn preorder(&self, func: &Function) -> Vec<Block> {
        let mut children: SecondaryMap<Block, Vec<Block>> = SecondaryMap::new();
        for block in func.block_ids() {
            if !self.is_reachable(block) || block == func.entry {
                continue;
            }
            if let Some(idom) = self.idom(block) {
                children[idom].push(block);
            }
        }
        let mut order = Vec::with_capacity(func.num_blocks());
        let mut stack = vec![func.entry];
        while let Some(block) = stack.pop() {
            order.push(block);
            // Push in reverse so children are visited in creation order.
            for &child in children[block].iter().rev() {
                stack.push(child);
            }
        }
        order
    }
}

impl Default for DominatorTree {
    fn default() -> Self {
        Self::new()
    }
}

fn compute_postorder(func: &Function, cfg: &ControlFlowGraph) -> Vec<Block> {
    let mut seen = SecondaryMap::<Block, bool>::new();
    let mut postorder = Vec::new();
    // (block, next successor index to visit) explicit stack, to avoid
    // recursion on arbitrarily deep CFGs.
    let mut stack: Vec<(Block, usize)> = vec![(func.entry, 0)];
    seen[func.entry] = true;
    while let Some(top) = stack.last_mut() {
        let block = top.0;
        let succs = cfg.successors(block);
        if top.1 < succs.len() {
            let succ = succs[top.1];
            top.1 += 1;
            if !seen[succ] {
                seen[succ] = true;
                stack.push((succ, 0));
            }
        } else {
            postorder.push(block);
            stack.pop();
        }
    }
    postorder
}
