//! Stack pre-coloring (§4.4): the first of the allocator's two tiers. Marks
//! values that can flow across an instruction, or across a block boundary,
//! on the evaluation stack without any explicit `load-local`/`store-local`
//! shuffling — exactly the moves a peephole pass over a stack machine is
//! good at spotting, and the reason this pass runs before the heavier
//! dominance-order coloring of `regalloc.rs`.
//!
//! Grounded on `cranelift-codegen`'s `regalloc/coalescing.rs` in spirit
//! (a cheap pre-pass that reduces what the general allocator has to color)
//! though the peephole itself has no cranelift analogue — `spec.md` §4.4 is
//! specific to a stack-plus-locals bytecode target.

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Function, SlotAssignment, Value};
use cranelift_entity::SecondaryMap;
use std::collections::VecDeque;

/// Whether non-fallthrough (conditional-branch-target) predecessors are
/// allowed to participate in the §4.4(a) phi-at-entry check.
///
/// spec.md leaves this an open question; SPEC_FULL.md §9 resolves it to the
/// *safe* policy: any non-fallthrough predecessor disqualifies the whole
/// check for that block. `Permissive` is kept only so both branches of the
/// open question have a concrete implementation to test against.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum FallthroughPolicy {
    #[default]
    Safe,
    Permissive,
}

/// Run both stack pre-coloring heuristics over every block of `func`,
/// recording `STACK` assignments into `alloc`. Must run before
/// `regalloc::allocate`, which only ever considers values this pass left
/// `Unassigned`.
pub fn color(
    func: &Function,
    cfg: &ControlFlowGraph,
    alloc: &mut SecondaryMap<Value, SlotAssignment>,
    policy: FallthroughPolicy,
) {
    for block in func.block_ids() {
        phi_at_entry(func, cfg, block, alloc, policy);
    }
    for block in func.block_ids() {
        in_block_window(func, block, alloc);
    }
}

/// §4.4(a): if the first `k` instructions of `block` are phis, and every one
/// of their incoming values sits at the matching depth from the top of every
/// predecessor's end-of-block stack, color both the phi and every incoming
/// value `STACK`.
fn phi_at_entry(
    func: &Function,
    cfg: &ControlFlowGraph,
    block: Block,
    alloc: &mut SecondaryMap<Value, SlotAssignment>,
    policy: FallthroughPolicy,
) {
    let preds = cfg.predecessors(block);
    if preds.is_empty() {
        return;
    }
    if policy == FallthroughPolicy::Safe && preds.iter().any(|p| !p.is_fallthrough) {
        return;
    }

    // Each predecessor's simulated end-of-block stack, topmost last, built
    // the same way the in-block window pass would see it: only maximal
    // runs of single-use, non-phi producers are pushed (see `simulate`
    // below for the shared core).
    let pred_stacks: Vec<Vec<Value>> = preds
        .iter()
        .map(|p| simulate_block_stack(func, p.block))
        .collect();

    let insts = &func.blocks[block].insts;
    for (j, &inst) in insts.iter().enumerate() {
        let data = &func.insts[inst];
        if !data.opcode.is_phi() {
            break;
        }
        let phi = &func.phis[&inst];

        // Phi `j` (0-indexed here, matching spec's "position j" with
        // position 1 being the top of stack, i.e. depth `j` from the top)
        // must match the `j`-th-from-top slot in every predecessor's stack.
        let mut all_match = true;
        for (pred_idx, &(pred_block, incoming)) in phi.incoming.iter().enumerate() {
            let stack = &pred_stacks[pred_idx];
            let depth_from_top = j;
            let matches = stack
                .len()
                .checked_sub(depth_from_top + 1)
                .and_then(|i| stack.get(i))
                .is_some_and(|&v| v == incoming);
            if !matches || func.inst_block(func.value_def(incoming)) != Some(pred_block) {
                all_match = false;
                break;
            }
        }

        if !all_match {
            break; // "first phi that fails stops the sweep for that block"
        }

        let result = data.result.expect("phi always has a result");
        alloc[result] = SlotAssignment::Stack;
        for &(_, incoming) in &phi.incoming {
            alloc[incoming] = SlotAssignment::Stack;
        }
    }
}

/// Simulate the end-of-block evaluation stack for `block` in isolation,
/// using the same push/match rules as `in_block_window` but without
/// recording alloc decisions — used only to answer "what's on top of this
/// predecessor's stack" for the phi-at-entry check.
fn simulate_block_stack(func: &Function, block: Block) -> Vec<Value> {
    let mut deque: VecDeque<Value> = VecDeque::new();
    for &inst in &func.blocks[block].insts {
        let data = &func.insts[inst];
        try_match(func, data, &mut deque);
        if should_push(func, data) {
            deque.push_back(data.result.unwrap());
        }
    }
    deque.into_iter().collect()
}

/// §4.4(b): walk `block` with a local deque simulating the evaluation
/// stack. For each instruction, try to match its arguments against the top
/// of the deque (marking matches `STACK`); then, if the instruction itself
/// produces a single-use, non-phi result, push it.
fn in_block_window(func: &Function, block: Block, alloc: &mut SecondaryMap<Value, SlotAssignment>) {
    let mut deque: VecDeque<Value> = VecDeque::new();
    for &inst in &func.blocks[block].insts {
        let data = &func.insts[inst];
        if let Some(matched) = try_match(func, data, &mut deque) {
            for &v in &matched {
                // A phi input or phi result already colored by the
                // phi-at-entry pass must not be reconsidered here; but an
                // ordinary argument earns its `Stack` coloring right now.
                if alloc[v] == SlotAssignment::Unassigned {
                    alloc[v] = SlotAssignment::Stack;
                }
            }
        }
        if should_push(func, data) {
            deque.push_back(data.result.unwrap());
        }
    }
}

/// Is `data`'s result a candidate for the in-block stack window at all?
/// Constants and environment sentinels are never allocated a slot (§3) —
/// they are re-materialized at every use site by the emitter instead of
/// ever living on the simulated stack, so pushing them here would let them
/// wrongly "match" a later use and end up `Stack`-colored.
fn should_push(func: &Function, data: &crate::ir::Instruction) -> bool {
    match data.result {
        Some(result) => {
            !data.opcode.is_phi() && func.has_single_use(result) && !func.is_materialized_inline(result)
        }
        None => false,
    }
}

/// Shared matching core for both heuristics: scan `deque` from the top
/// downward for `data`'s argument sequence (in reverse, since the deepest
/// argument is consumed first). On a full match, discard everything above
/// the deepest matched entry (anything skipped over was not part of the
/// match and must fall back to local allocation — SPEC_FULL.md §9's
/// resolution of the second open question) and return the matched values so
/// the caller can color them. Returns `None` if there were too few entries
/// or no contiguous-enough match was found; phis are never matched (their
/// "arguments" are not plain `Instruction::args`).
fn try_match(
    func: &Function,
    data: &crate::ir::Instruction,
    deque: &mut VecDeque<Value>,
) -> Option<Vec<Value>> {
    if data.opcode.is_phi() {
        return None;
    }
    // Constants and environment sentinels never occupy a deque slot (§3):
    // they are re-materialized at every use site regardless of stack state,
    // so they neither need to be found here nor can disqualify a match.
    let wanted: Vec<Value> = data
        .each_arg_rev()
        .filter(|&v| !func.is_materialized_inline(v))
        .collect();
    let n = wanted.len();
    if n == 0 || deque.len() < n {
        return None;
    }

    // Look for `data`'s (non-materialized) arguments, scanning from the top
    // of the deque downward, matching back-to-front (the last argument is
    // expected nearest the top).
    let mut want = wanted.into_iter();
    let mut matched_positions = Vec::with_capacity(n);
    let mut cursor = deque.len();
    let mut next_wanted = want.next()?;
    while cursor > 0 {
        cursor -= 1;
        if deque[cursor] == next_wanted {
            matched_positions.push(cursor);
            match want.next() {
                Some(w) => next_wanted = w,
                None => break,
            }
        }
    }
    if matched_positions.len() != n {
        return None;
    }

    let deepest = *matched_positions.last().unwrap();
    let matched: Vec<Value> = matched_positions.iter().rev().map(|&i| deque[i]).collect();

    // Drop everything from `deepest` upward: matched entries are consumed,
    // unmatched intervening entries are demoted to locals by simply never
    // being colored `Stack` (caller skips already-unassigned-remaining
    // values naturally since they are no longer in the deque to match
    // again).
    deque.drain(deepest..);

    Some(matched)
}
