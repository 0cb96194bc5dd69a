//! The verifier (§4.6): a symbolic interpreter that replays every reachable
//! control-flow edge at most once, checking that each instruction observes
//! exactly the `Value` the allocator and emitter committed to its operand
//! positions.
//!
//! Grounded on `cranelift-codegen`'s `verifier/mod.rs` (a collector of
//! `VerifierErrors` rather than a first-failure abort, run after every pass
//! per `regalloc/context.rs::Context::run`) but specialized to this crate's
//! actual failure mode: not "is this SSA well-formed" but "does the
//! allocation the emitter is about to encode actually replay correctly on a
//! stack-plus-locals machine."

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Function, Instruction, SlotAssignment, Value};
use crate::result::{ErrorLocation, VerifierError, VerifierErrors};
use cranelift_entity::SecondaryMap;
use rustc_hash::{FxHashMap, FxHashSet};

/// Symbolic machine state threaded along one control-flow path. Cloned at
/// every branch point so each successor explores its own independent copy,
/// per §4.6 ("copying state when a block has two successors").
#[derive(Clone, Default)]
struct State {
    registers: FxHashMap<u32, Value>,
    stack: Vec<Value>,
}

/// Run the symbolic verifier over `func` given its allocation map, appending
/// any failures to `errors`. Returns `Ok(())` iff no failures were recorded
/// (mirrors `VerifierErrors::as_result`'s short-circuit contract).
pub fn verify(
    func: &Function,
    cfg: &ControlFlowGraph,
    alloc: &SecondaryMap<Value, SlotAssignment>,
    errors: &mut VerifierErrors,
) -> Result<(), ()> {
    let mut visited_edges: FxHashSet<(Block, Block)> = FxHashSet::default();
    let mut worklist: Vec<(Block, State)> = vec![(func.entry, State::default())];

    // A synthetic "entry edge" key so the first block is only ever walked
    // once even if it also happens to be its own predecessor (an
    // unreachable-in-practice but not impossible degenerate CFG).
    let mut visited_entry = false;

    while let Some((block, mut state)) = worklist.pop() {
        if block == func.entry {
            if visited_entry {
                continue;
            }
            visited_entry = true;
        }

        for &inst in &func.blocks[block].insts {
            let data = &func.insts[inst];
            step(func, block, inst, data, alloc, &mut state, errors);
        }

        let successors = cfg.successors(block);
        if successors.is_empty() {
            if !state.stack.is_empty() {
                errors.push(VerifierError::new(
                    ErrorLocation::Block(block),
                    format!(
                        "stack-discipline fault: {} residual value(s) at block with no successors",
                        state.stack.len()
                    ),
                ));
            }
            continue;
        }

        for &succ in successors {
            if visited_edges.insert((block, succ)) {
                worklist.push((succ, state.clone()));
            }
        }
    }

    errors.as_result()
}

fn step(
    func: &Function,
    block: Block,
    inst: crate::ir::Inst,
    data: &Instruction,
    alloc: &SecondaryMap<Value, SlotAssignment>,
    state: &mut State,
    errors: &mut VerifierErrors,
) {
    if data.opcode.is_phi() {
        // The emitter pops one entry for a stack-allocated phi without
        // checking its identity: the predecessor's copy is what pushed it,
        // and that identity was already validated when the copy itself
        // executed as a non-phi instruction. The phi's own identity
        // (`result`) then takes over that same stack slot for downstream
        // consumers. A local-allocated phi needs no popping at all: its
        // CSSA-coalesced inputs already wrote the same slot at the
        // predecessor's copy, so `result` simply becomes that slot's name.
        if let Some(result) = data.result {
            match alloc[result] {
                SlotAssignment::Stack => {
                    if state.stack.pop().is_none() {
                        errors.push(VerifierError::new(
                            ErrorLocation::Inst(inst),
                            "stack-discipline fault: phi expected a stack entry, found none",
                        ));
                    }
                    state.stack.push(result);
                }
                SlotAssignment::Local(slot) => {
                    state.registers.insert(slot, result);
                }
                SlotAssignment::Unassigned => {}
            }
        }
        return;
    }

    for arg in data.each_arg_rev() {
        match alloc[arg] {
            SlotAssignment::Stack => match state.stack.pop() {
                Some(found) if found == arg => {}
                Some(found) => errors.push(VerifierError::new(
                    ErrorLocation::Inst(inst),
                    format!("allocation fault: stack top: expected {arg}, found {found}"),
                )),
                None => errors.push(VerifierError::new(
                    ErrorLocation::Inst(inst),
                    format!("stack-discipline fault: expected {arg} on stack, stack empty"),
                )),
            },
            SlotAssignment::Local(slot) => match state.registers.get(&slot) {
                Some(&found) if found == arg => {}
                Some(&found) => errors.push(VerifierError::new(
                    ErrorLocation::Inst(inst),
                    format!("allocation fault: slot local{slot}: expected {arg}, found {found}"),
                )),
                None => errors.push(VerifierError::new(
                    ErrorLocation::Inst(inst),
                    format!("allocation fault: slot local{slot}: expected {arg}, found nothing"),
                )),
            },
            SlotAssignment::Unassigned => {
                if !func.is_materialized_inline(arg) {
                    errors.push(VerifierError::new(
                        ErrorLocation::Value(arg),
                        "allocation fault: live operand has no slot and is not a constant",
                    ));
                }
            }
        }
    }

    if let Some(result) = data.result {
        match alloc[result] {
            SlotAssignment::Stack => state.stack.push(result),
            SlotAssignment::Local(slot) => {
                state.registers.insert(slot, result);
            }
            SlotAssignment::Unassigned => {} // dead result, popped by the emitter
        }
    }

    let _ = block;
}
