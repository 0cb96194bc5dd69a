//! Register allocation (§4.5): the second allocator tier, assigning every
//! value the stack pre-coloring pass (`stack_coloring.rs`) left `Unassigned`
//! to a numbered local slot.
//!
//! Two phases, both grounded on `cranelift-codegen`'s `regalloc/coloring.rs`
//! and `regalloc/affinity.rs`: phi coalescing first (coalescing a CSSA phi
//! web onto one slot is always safe once CSSA has run, and doing it before
//! the general walk means the general walk never has to special-case phis),
//! then a single dominance-order eager-coloring pass with move-reducing
//! hints, in place of cranelift's iterative solver — this ISA tolerates
//! extra slots per spec.md's Non-goals, so a single linear pass suffices.

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Function, Opcode, SlotAssignment, Value};
use crate::liveness::Liveness;
use crate::dominator_tree::DominatorTree;
use cranelift_entity::SecondaryMap;
use rustc_hash::FxHashMap;

/// Slot 0 is reserved as the "unassigned" sentinel (glossary); real locals
/// start at 1.
const FIRST_LOCAL: u32 = 1;

/// Assign every `Unassigned` value in `func` a local slot, mutating `alloc`
/// in place. Values already colored `Stack` by `stack_coloring::color` are
/// left untouched.
pub fn allocate(
    func: &Function,
    cfg: &ControlFlowGraph,
    domtree: &DominatorTree,
    liveness: &Liveness,
    alloc: &mut SecondaryMap<Value, SlotAssignment>,
) {
    let mut owners: FxHashMap<u32, Vec<Value>> = FxHashMap::default();

    coalesce_phis(func, liveness, alloc, &mut owners);
    color_dominance_order(func, cfg, domtree, liveness, alloc, &mut owners);
}

/// §4.5(a): for every phi not yet assigned, find the smallest slot free for
/// both the phi and all of its (CSSA-inserted-copy) inputs, and assign all
/// of them to it in one step. CSSA guarantees the inputs do not interfere
/// with each other at the phi's own merge point, so the only interference
/// that can block a candidate slot is with values defined along other,
/// unrelated live ranges.
fn coalesce_phis(
    func: &Function,
    liveness: &Liveness,
    alloc: &mut SecondaryMap<Value, SlotAssignment>,
    owners: &mut FxHashMap<u32, Vec<Value>>,
) {
    for block in func.block_ids() {
        for &inst in &func.blocks[block].insts {
            let data = &func.insts[inst];
            if !data.opcode.is_phi() {
                continue;
            }
            let p = match data.result {
                Some(p) if alloc[p] == SlotAssignment::Unassigned => p,
                _ => continue, // already stack-colored by §4.4(a), or dead
            };
            let phi = &func.phis[&inst];
            let web: Vec<Value> = std::iter::once(p)
                .chain(phi.incoming.iter().map(|&(_, v)| v))
                .filter(|&v| alloc[v] == SlotAssignment::Unassigned)
                .collect();
            if web.is_empty() {
                continue; // every input already resolved to Stack too
            }

            let mut slot = FIRST_LOCAL;
            loop {
                if web.iter().all(|&v| slot_is_free(func, liveness, owners, slot, v)) {
                    break;
                }
                slot += 1;
            }
            for &v in &web {
                alloc[v] = SlotAssignment::Local(slot);
                owners.entry(slot).or_default().push(v);
            }
        }
    }
}

/// §4.5(b): walk blocks in dominator-tree preorder, instructions in program
/// order within each block. For every still-unassigned value with a
/// liveness record, try a move-reducing hint first (its first argument's
/// slot, if that argument is itself slotted and the slot is free), falling
/// back to the first free slot starting at 1.
fn color_dominance_order(
    func: &Function,
    cfg: &ControlFlowGraph,
    domtree: &DominatorTree,
    liveness: &Liveness,
    alloc: &mut SecondaryMap<Value, SlotAssignment>,
    owners: &mut FxHashMap<u32, Vec<Value>>,
) {
    let _ = cfg; // kept in the signature: dominance-order coloring is meaningless without a cfg-derived domtree, and future passes (e.g. a spiller) would need it alongside domtree.
    for block in domtree.preorder(func) {
        for &inst in &func.blocks[block].insts {
            let data = &func.insts[inst];
            let v = match data.result {
                Some(v) if alloc[v] == SlotAssignment::Unassigned => v,
                _ => continue,
            };
            if func.is_materialized_inline(v) {
                continue; // constants/sentinels are never allocated (§3)
            }
            if liveness.range(v, block).is_none() {
                continue; // dead value: no liveness record, result is popped
            }

            let hint = data.args.first().and_then(|&a| alloc[a].local_slot());
            let slot = match hint {
                Some(h) if slot_is_free(func, liveness, owners, h, v) => h,
                _ => {
                    let mut slot = FIRST_LOCAL;
                    while !slot_is_free(func, liveness, owners, slot, v) {
                        slot += 1;
                    }
                    slot
                }
            };
            alloc[v] = SlotAssignment::Local(slot);
            owners.entry(slot).or_default().push(v);
        }
    }
}

/// Is `slot` free for `v`: does no value currently assigned to `slot`
/// interfere with `v` in any block where both have a liveness record?
fn slot_is_free(
    func: &Function,
    liveness: &Liveness,
    owners: &FxHashMap<u32, Vec<Value>>,
    slot: u32,
    v: Value,
) -> bool {
    let Some(current) = owners.get(&slot) else {
        return true;
    };
    current.iter().all(|&other| {
        func.block_ids().all(|block| !liveness.interferes(v, other, block))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowgraph::ControlFlowGraph;
    use crate::ir::{ConstId, Function, Instruction, ValueType};
    use smallvec::smallvec;

    fn pipeline(func: &Function) -> (ControlFlowGraph, DominatorTree, Liveness) {
        let cfg = ControlFlowGraph::with_function(func);
        let domtree = DominatorTree::with_function(func, &cfg);
        let liveness = Liveness::with_function(func, &cfg);
        (cfg, domtree, liveness)
    }

    #[test]
    fn reused_value_gets_a_single_local_slot() {
        let mut func = Function::new();
        let entry = func.entry;
        let a0 = func.append_inst(entry, Instruction::new(Opcode::LdArg(0), smallvec![], ValueType::Any));
        let va0 = func.insts[a0].result.unwrap();
        let add = func.append_inst(entry, Instruction::new(Opcode::Add, smallvec![va0, va0], ValueType::Any));
        let vadd = func.insts[add].result.unwrap();
        func.append_inst(entry, Instruction::new(Opcode::Return, smallvec![vadd], ValueType::Void));

        let (cfg, domtree, liveness) = pipeline(&func);
        let mut alloc = SecondaryMap::new();
        crate::stack_coloring::color(&func, &cfg, &mut alloc, crate::stack_coloring::FallthroughPolicy::Safe);
        allocate(&func, &cfg, &domtree, &liveness, &mut alloc);

        assert_eq!(alloc[va0], SlotAssignment::Local(1));
        assert_eq!(alloc[vadd], SlotAssignment::Stack);
    }

    #[test]
    fn phi_and_both_inputs_share_one_slot() {
        let mut func = Function::new();
        let entry = func.entry;
        let b1 = func.make_block();
        let b2 = func.make_block();
        let merge = func.make_block();
        func.blocks[entry].next0 = Some(b1);
        func.blocks[entry].next1 = Some(b2);
        func.blocks[b1].next0 = Some(merge);
        func.blocks[b2].next0 = Some(merge);

        let cond = func.append_inst(entry, Instruction::new(Opcode::LdConst(ConstId(0)), smallvec![], ValueType::Any));
        let vcond = func.insts[cond].result.unwrap();
        func.append_inst(entry, Instruction::new(Opcode::Branch, smallvec![vcond], ValueType::Void));

        // Force x and y into locals (each used twice) so the phi-at-entry
        // stack heuristic can't coalesce them onto the stack instead,
        // isolating the register allocator's own coalescing behavior.
        let x = func.append_inst(b1, Instruction::new(Opcode::LdConst(ConstId(1)), smallvec![], ValueType::Any));
        let vx = func.insts[x].result.unwrap();
        func.append_inst(b1, Instruction::new(Opcode::Add, smallvec![vx, vx], ValueType::Any));
        func.append_inst(b1, Instruction::new(Opcode::Jump, smallvec![], ValueType::Void));

        let y = func.append_inst(b2, Instruction::new(Opcode::LdConst(ConstId(2)), smallvec![], ValueType::Any));
        let vy = func.insts[y].result.unwrap();
        func.append_inst(b2, Instruction::new(Opcode::Add, smallvec![vy, vy], ValueType::Any));
        func.append_inst(b2, Instruction::new(Opcode::Jump, smallvec![], ValueType::Void));

        let phi = func.append_inst(merge, Instruction::new(Opcode::Phi, smallvec![], ValueType::Any));
        func.set_phi_incoming(phi, vec![(b1, vx), (b2, vy)]);
        let vphi = func.insts[phi].result.unwrap();
        func.append_inst(merge, Instruction::new(Opcode::Return, smallvec![vphi], ValueType::Void));

        crate::cssa::construct(&mut func);
        let (cfg, domtree, liveness) = pipeline(&func);
        // Deliberately skip stack_coloring::color here: this test isolates
        // register allocation's own phi-coalescing (§4.5(a)) from the
        // stack pre-coloring heuristic (§4.4(a)), which on this exact
        // fallthrough diamond would otherwise also coalesce the phi web
        // onto the stack and make the two passes indistinguishable.
        let mut alloc = SecondaryMap::new();
        allocate(&func, &cfg, &domtree, &liveness, &mut alloc);

        let phi_data = &func.phis[&phi];
        let slots: Vec<SlotAssignment> = phi_data.incoming.iter().map(|&(_, v)| alloc[v]).collect();
        let phi_slot = alloc[vphi];
        assert!(phi_slot.is_local());
        assert!(slots.iter().all(|&s| s == phi_slot));
    }
}
