//! Code emission (§4.7): the per-basic-block walk that turns allocated PIR
//! into a bytecode stream. The largest single component by spec's own
//! weighting (30%), because it is where every upstream decision — CSSA
//! copies, stack vs. local coloring, the verifier's pass/fail — actually
//! has to turn into concrete instructions, in the right order, with jump
//! targets patched and environment installation threaded through.
//!
//! Grounded on `cranelift-codegen`'s separation of instruction encoding
//! (`binemit`) from the buffer/writer that owns final layout (`MachBuffer`):
//! this module only ever calls through the `CodeStream` trait (§6), never
//! touches bytes directly.

use crate::bytecode::{BytecodeOp, CodeStream, Label};
use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, CodeRef, Function, Instruction, Opcode, SlotAssignment, Value};
use cranelift_entity::SecondaryMap;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

/// Resolves a `CodeRef` (a not-yet-lowered nested body, §4.8) to the literal
/// operand the bytecode should carry. Promises resolve to a `CodeIndex`
/// already finalized into *this* function's own `EmittedFunction` (§6);
/// closures resolve to nothing the emitter needs to look up at all, since a
/// closure's tier is selected at call time through its own dispatch table,
/// not baked into the creating function's bytecode — see `context.rs`.
pub trait CodeRefResolver {
    fn promise_index(&self, r: CodeRef) -> u32;
}

/// Walk every reachable block of `func` in breadth-first order (chasing
/// empty blocks before minting labels, per §4.7's "empty-block skip") and
/// emit its bytecode to `stream`. Returns the number of local slots the
/// function needs, derived from the highest `Local(n)` assignment seen.
pub fn emit<W: CodeStream>(
    func: &Function,
    cfg: &ControlFlowGraph,
    alloc: &SecondaryMap<Value, SlotAssignment>,
    resolver: &impl CodeRefResolver,
    stream: &mut W,
) -> u32 {
    let order = bfs_order(func, cfg);
    let labels: FxHashMap<Block, Label> = order.iter().map(|&b| (b, stream.mk_label())).collect();

    let mut current_env: Option<Value> = None;
    let mut locals_count = 0u32;

    for &block in &order {
        stream.bind_label(labels[&block]);
        for &inst in &func.blocks[block].insts {
            let data = &func.insts[inst];

            if is_silent_materialization(func, data) {
                // Constants and environment sentinels produce no code at
                // their own definition point; they are re-materialized at
                // each use site instead (§3, §4.7).
                continue;
            }

            load_env(func, data, alloc, &mut current_env, stream);
            load_args(func, data, alloc, stream);
            dispatch(func, block, &labels, data, resolver, stream);
            handle_result(data, alloc, stream, &mut locals_count);
        }
    }

    locals_count
}

/// Breadth-first block visitation order, per block reachable from the
/// entry through `cfg`'s successor edges, with every jump target chased
/// through zero-instruction blocks first so a label is only ever minted for
/// a non-empty block.
fn bfs_order(func: &Function, cfg: &ControlFlowGraph) -> Vec<Block> {
    let mut order = Vec::new();
    let mut seen: FxHashSet<Block> = FxHashSet::default();
    let mut queue: VecDeque<Block> = VecDeque::new();

    let start = chase(func, func.entry);
    queue.push_back(start);
    seen.insert(start);

    while let Some(block) = queue.pop_front() {
        order.push(block);
        for &succ in cfg.successors(block) {
            let target = chase(func, succ);
            if seen.insert(target) {
                queue.push_back(target);
            }
        }
    }
    order
}

/// Chase through zero-instruction blocks along their `next0` edge until a
/// non-empty block (or a dead end) is found.
fn chase(func: &Function, mut block: Block) -> Block {
    while func.blocks[block].is_empty() {
        match func.blocks[block].next0 {
            Some(next) if next != block => block = next,
            _ => break,
        }
    }
    block
}

/// LdConst/LdNil/ParentEnv are never emitted at their own definition point:
/// their result is never allocated (§3), so nothing would ever consume a
/// standalone push of them here.
fn is_silent_materialization(func: &Function, data: &Instruction) -> bool {
    matches!(data.result, Some(v) if func.is_materialized_inline(v))
}

/// Push the value a constant/sentinel Value stands for directly onto the
/// stack, at whatever use site needs it (§4.7's "materialized inline").
fn materialize(func: &Function, v: Value, stream: &mut impl CodeStream) {
    match func.opcode_of(v) {
        Opcode::LdConst(c) => stream.emit(BytecodeOp::LdConst(c.0)),
        Opcode::LdNil => stream.emit(BytecodeOp::LdNil),
        Opcode::ParentEnv => stream.emit(BytecodeOp::ParentEnv),
        other => unreachable!("materialize called on a non-inline-able value ({other:?})"),
    }
}

/// Step 1 of instruction emission: install the active environment if this
/// instruction implicitly reads it and it differs from `current_env`.
fn load_env(
    func: &Function,
    data: &Instruction,
    alloc: &SecondaryMap<Value, SlotAssignment>,
    current_env: &mut Option<Value>,
    stream: &mut impl CodeStream,
) {
    if !data.opcode.reads_env() {
        return;
    }
    let Some(env) = data.env() else { return };

    if Some(env) == *current_env {
        // Already installed; if it was *also* pushed to the stack for this
        // instruction (the in-block window matched it as a plain operand),
        // that push is now orphaned and must be popped (§4.7).
        if alloc[env] == SlotAssignment::Stack {
            stream.emit(BytecodeOp::Pop);
        }
        return;
    }

    match alloc[env] {
        SlotAssignment::Stack => {} // already on top, nothing to load
        SlotAssignment::Local(slot) => stream.emit(BytecodeOp::LdLocal(slot)),
        SlotAssignment::Unassigned => materialize(func, env, stream),
    }
    stream.emit(BytecodeOp::SetEnv);
    *current_env = Some(env);
}

/// Step 1 continued: load every remaining (non-environment) argument in
/// definition order. Stack-resident operands need nothing; everything else
/// is a `load-local` or an inline re-materialization.
fn load_args(func: &Function, data: &Instruction, alloc: &SecondaryMap<Value, SlotAssignment>, stream: &mut impl CodeStream) {
    for (i, &v) in data.args.iter().enumerate() {
        if data.env_slot == Some(i) {
            continue; // handled by `load_env`
        }
        match alloc[v] {
            SlotAssignment::Stack => {}
            SlotAssignment::Local(slot) => stream.emit(BytecodeOp::LdLocal(slot)),
            SlotAssignment::Unassigned => materialize(func, v, stream),
        }
    }
}

/// Step 2: dispatch on the instruction's opcode, emitting the matching
/// bytecode op(s). Terminators reach here too (they are ordinary
/// instructions in program order) and are the only tags that need `block`,
/// `labels` and `cfg`-derived successor information rather than just their
/// own arguments.
fn dispatch<W: CodeStream>(
    func: &Function,
    block: Block,
    labels: &FxHashMap<Block, Label>,
    data: &Instruction,
    resolver: &impl CodeRefResolver,
    stream: &mut W,
) {
    match data.opcode {
        Opcode::LdArg(n) => stream.emit(BytecodeOp::LdArg(n)),
        Opcode::LdConst(c) => stream.emit(BytecodeOp::LdConst(c.0)),
        Opcode::LdNil => stream.emit(BytecodeOp::LdNil),
        Opcode::Add => {
            stream.emit(BytecodeOp::Add);
            attach_src(data, stream);
        }
        Opcode::Sub => {
            stream.emit(BytecodeOp::Sub);
            attach_src(data, stream);
        }
        Opcode::Mul => {
            stream.emit(BytecodeOp::Mul);
            attach_src(data, stream);
        }
        Opcode::Lt => {
            stream.emit(BytecodeOp::Lt);
            attach_src(data, stream);
        }
        Opcode::MkEnv => {
            stream.emit(BytecodeOp::MkEnv);
            attach_src(data, stream);
        }
        Opcode::LdEnv => {
            stream.emit(BytecodeOp::LdEnv);
            attach_src(data, stream);
        }
        Opcode::SetEnv => stream.emit(BytecodeOp::SetEnv),
        Opcode::ParentEnv => stream.emit(BytecodeOp::ParentEnv),
        Opcode::Phi | Opcode::Copy => {
            // Phis never reach here: `emit`'s per-instruction loop in a
            // real run still walks over them in program order, but a
            // phi has no plain `args` for `load_args` to have consumed and
            // nothing to dispatch — its entire effect (consuming one
            // stack slot, or simply adopting a coalesced local) is already
            // captured by the allocation map the predecessors' copies
            // wrote into, so the only actual bytecode work left is
            // `handle_result` below. `Copy`, by contrast, really is a
            // plain one-argument forward and needs no opcode of its own:
            // the value loaded by `load_args` *is* the copy's result.
        }
        Opcode::MkClosure(r) => {
            stream.emit(BytecodeOp::MkClosure(r.0));
            attach_src(data, stream);
        }
        Opcode::MkPromise(r) => {
            stream.emit(BytecodeOp::MkPromise(resolver.promise_index(r)));
            attach_src(data, stream);
        }
        Opcode::MkArg => {
            stream.emit(BytecodeOp::MkArg);
            attach_src(data, stream);
        }
        Opcode::Branch => emit_conditional_branch(func, block, labels, stream),
        Opcode::Jump => emit_fallthrough(func, block, labels, stream),
        Opcode::Return => stream.emit(BytecodeOp::Ret),
        Opcode::Deopt => emit_deopt(data, stream),
    }
}

fn attach_src(data: &Instruction, stream: &mut impl CodeStream) {
    if let Some(src) = data.src_idx {
        stream.add_src_idx(src);
    }
}

/// Conditional branch: `brfalse(next0); br(next1)`, each target chased
/// through empty blocks and resolved against the pre-minted label map.
fn emit_conditional_branch<W: CodeStream>(func: &Function, block: Block, labels: &FxHashMap<Block, Label>, stream: &mut W) {
    let bb = &func.blocks[block];
    let next0 = chase(func, bb.next0.expect("conditional branch missing next0"));
    let next1 = chase(func, bb.next1.expect("conditional branch missing next1"));
    stream.emit(BytecodeOp::BrFalse(labels[&next0]));
    stream.emit(BytecodeOp::Br(labels[&next1]));
}

/// Unconditional fallthrough: `br(next0)`.
fn emit_fallthrough<W: CodeStream>(func: &Function, block: Block, labels: &FxHashMap<Block, Label>, stream: &mut W) {
    let bb = &func.blocks[block];
    let next0 = chase(func, bb.next0.expect("jump missing next0"));
    stream.emit(BytecodeOp::Br(labels[&next0]));
}

/// Deopt: pop every operand, emit the trap sequence, then `ret`. By the
/// time a terminator reaches `dispatch`, `load_args` has already pushed
/// every one of `data.args` onto the stack — a `Local`/constant operand via
/// `LdLocal`/`materialize`, a `Stack` operand was already there — so every
/// operand, not just the `Stack`-colored ones, needs exactly one `Pop` here
/// to keep the terminal stack-empty invariant (§4.6).
fn emit_deopt(data: &Instruction, stream: &mut impl CodeStream) {
    for _ in &data.args {
        stream.emit(BytecodeOp::Pop);
    }
    stream.emit(BytecodeOp::Trap);
    stream.emit(BytecodeOp::Ret);
}

/// Step 3: dispose of the instruction's result according to its
/// allocation — popped if dead, left in place if stack-colored, or stored
/// to its local slot.
fn handle_result(data: &Instruction, alloc: &SecondaryMap<Value, SlotAssignment>, stream: &mut impl CodeStream, locals_count: &mut u32) {
    let Some(result) = data.result else { return };
    match alloc[result] {
        SlotAssignment::Unassigned => stream.emit(BytecodeOp::Pop),
        SlotAssignment::Stack => {}
        SlotAssignment::Local(slot) => {
            stream.emit(BytecodeOp::StLocal(slot));
            *locals_count = (*locals_count).max(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::VecCodeStream;
    use crate::cssa;
    use crate::dominator_tree::DominatorTree;
    use crate::ir::{Function, Instruction, Opcode, ValueType};
    use crate::liveness::Liveness;
    use crate::regalloc;
    use crate::stack_coloring::{self, FallthroughPolicy};
    use smallvec::smallvec;

    struct NoPromises;
    impl CodeRefResolver for NoPromises {
        fn promise_index(&self, _r: CodeRef) -> u32 {
            unreachable!("no promises in these tests")
        }
    }

    fn lower(func: &mut Function) -> (ControlFlowGraph, SecondaryMap<Value, SlotAssignment>) {
        cssa::construct(func);
        let cfg = ControlFlowGraph::with_function(func);
        let domtree = DominatorTree::with_function(func, &cfg);
        let liveness = Liveness::with_function(func, &cfg);
        let mut alloc = SecondaryMap::new();
        stack_coloring::color(func, &cfg, &mut alloc, FallthroughPolicy::Safe);
        regalloc::allocate(func, &cfg, &domtree, &liveness, &mut alloc);
        (cfg, alloc)
    }

    /// Boundary scenario 1 (spec §8): `Return Nil` alone.
    #[test]
    fn empty_function_emits_push_nil_ret() {
        let mut func = Function::new();
        let entry = func.entry;
        let nil = func.append_inst(entry, Instruction::new(Opcode::LdNil, smallvec![], ValueType::Any));
        let vnil = func.insts[nil].result.unwrap();
        func.append_inst(entry, Instruction::new(Opcode::Return, smallvec![vnil], ValueType::Void));

        let (cfg, alloc) = lower(&mut func);
        let mut stream = VecCodeStream::new();
        let locals = emit(&func, &cfg, &alloc, &NoPromises, &mut stream);
        let code = stream.finalize(false, locals);

        assert_eq!(code.locals_count, 0);
        assert_eq!(code.ops, vec![BytecodeOp::LdNil, BytecodeOp::Ret]);
    }

    /// Boundary scenario 2: straight-line arithmetic, everything stack-allocated.
    #[test]
    fn straight_line_arithmetic_all_stack_zero_locals() {
        let mut func = Function::new();
        let entry = func.entry;
        let a0 = func.append_inst(entry, Instruction::new(Opcode::LdArg(0), smallvec![], ValueType::Any));
        let va0 = func.insts[a0].result.unwrap();
        let a1 = func.append_inst(entry, Instruction::new(Opcode::LdArg(1), smallvec![], ValueType::Any));
        let va1 = func.insts[a1].result.unwrap();
        let add = func.append_inst(entry, Instruction::new(Opcode::Add, smallvec![va0, va1], ValueType::Any));
        let vadd = func.insts[add].result.unwrap();
        func.append_inst(entry, Instruction::new(Opcode::Return, smallvec![vadd], ValueType::Void));

        let (cfg, alloc) = lower(&mut func);
        let mut stream = VecCodeStream::new();
        let locals = emit(&func, &cfg, &alloc, &NoPromises, &mut stream);
        let code = stream.finalize(false, locals);

        assert_eq!(code.locals_count, 0);
        assert_eq!(
            code.ops,
            vec![BytecodeOp::LdArg(0), BytecodeOp::LdArg(1), BytecodeOp::Add, BytecodeOp::Ret]
        );
    }

    /// Boundary scenario 3: a value used twice is forced into a local.
    #[test]
    fn reused_value_forced_to_local() {
        let mut func = Function::new();
        let entry = func.entry;
        let a0 = func.append_inst(entry, Instruction::new(Opcode::LdArg(0), smallvec![], ValueType::Any));
        let va0 = func.insts[a0].result.unwrap();
        let add = func.append_inst(entry, Instruction::new(Opcode::Add, smallvec![va0, va0], ValueType::Any));
        let vadd = func.insts[add].result.unwrap();
        func.append_inst(entry, Instruction::new(Opcode::Return, smallvec![vadd], ValueType::Void));

        let (cfg, alloc) = lower(&mut func);
        let mut stream = VecCodeStream::new();
        let locals = emit(&func, &cfg, &alloc, &NoPromises, &mut stream);
        let code = stream.finalize(false, locals);

        assert_eq!(code.locals_count, 1);
        assert_eq!(
            code.ops,
            vec![
                BytecodeOp::LdArg(0),
                BytecodeOp::StLocal(1),
                BytecodeOp::LdLocal(1),
                BytecodeOp::LdLocal(1),
                BytecodeOp::Add,
                BytecodeOp::Ret,
            ]
        );
    }

    /// Boundary scenario 4: diamond with phi, both branches feeding a
    /// coalesced slot, merge reloading and returning it.
    #[test]
    fn diamond_with_phi_shares_a_slot() {
        let mut func = Function::new();
        let entry = func.entry;
        let b1 = func.make_block();
        let b2 = func.make_block();
        let merge = func.make_block();
        func.blocks[entry].next0 = Some(b1);
        func.blocks[entry].next1 = Some(b2);
        func.blocks[b1].next0 = Some(merge);
        func.blocks[b2].next0 = Some(merge);

        let cond = func.append_inst(entry, Instruction::new(Opcode::LdArg(0), smallvec![], ValueType::Any));
        let vcond = func.insts[cond].result.unwrap();
        func.append_inst(entry, Instruction::new(Opcode::Branch, smallvec![vcond], ValueType::Void));

        // Double-use x/y in each arm so stack pre-coloring can't coalesce
        // the phi onto the stack instead, isolating the register
        // allocator's coalescing behavior for this test (mirrors the same
        // concern documented in regalloc.rs's own coalescing test).
        let x = func.append_inst(b1, Instruction::new(Opcode::LdArg(1), smallvec![], ValueType::Any));
        let vx = func.insts[x].result.unwrap();
        func.append_inst(b1, Instruction::new(Opcode::Add, smallvec![vx, vx], ValueType::Any));
        func.append_inst(b1, Instruction::new(Opcode::Jump, smallvec![], ValueType::Void));

        let y = func.append_inst(b2, Instruction::new(Opcode::LdArg(2), smallvec![], ValueType::Any));
        let vy = func.insts[y].result.unwrap();
        func.append_inst(b2, Instruction::new(Opcode::Add, smallvec![vy, vy], ValueType::Any));
        func.append_inst(b2, Instruction::new(Opcode::Jump, smallvec![], ValueType::Void));

        let phi = func.append_inst(merge, Instruction::new(Opcode::Phi, smallvec![], ValueType::Any));
        func.set_phi_incoming(phi, vec![(b1, vx), (b2, vy)]);
        let vphi = func.insts[phi].result.unwrap();
        func.append_inst(merge, Instruction::new(Opcode::Return, smallvec![vphi], ValueType::Void));

        let (cfg, alloc) = lower(&mut func);

        let phi_slot = alloc[vphi].local_slot().expect("phi coalesced to a local");
        let x_copy_slot = func.phis[&phi]
            .incoming
            .iter()
            .find(|&&(pred, _)| pred == b1)
            .and_then(|&(_, v)| alloc[v].local_slot());
        assert_eq!(x_copy_slot, Some(phi_slot));

        let mut stream = VecCodeStream::new();
        let locals = emit(&func, &cfg, &alloc, &NoPromises, &mut stream);
        let code = stream.finalize(false, locals);

        // Both arms store into the same slot before falling through;
        // the merge block reloads it once and returns.
        let stores: Vec<_> = code
            .ops
            .iter()
            .filter(|op| matches!(op, BytecodeOp::StLocal(s) if *s == phi_slot))
            .collect();
        assert_eq!(stores.len(), 2, "{:?}", code.ops);
        assert!(code.ops.ends_with(&[BytecodeOp::LdLocal(phi_slot), BytecodeOp::Ret]));
    }

    #[test]
    fn empty_block_jump_targets_are_chased() {
        let mut func = Function::new();
        let entry = func.entry;
        let trampoline = func.make_block();
        let target = func.make_block();
        func.blocks[entry].next0 = Some(trampoline);
        func.blocks[trampoline].next0 = Some(target);

        func.append_inst(entry, Instruction::new(Opcode::Jump, smallvec![], ValueType::Void));
        let nil = func.append_inst(target, Instruction::new(Opcode::LdNil, smallvec![], ValueType::Any));
        let vnil = func.insts[nil].result.unwrap();
        func.append_inst(target, Instruction::new(Opcode::Return, smallvec![vnil], ValueType::Void));

        let (cfg, alloc) = lower(&mut func);
        let mut stream = VecCodeStream::new();
        let locals = emit(&func, &cfg, &alloc, &NoPromises, &mut stream);
        let code = stream.finalize(false, locals);

        // `entry`'s jump must resolve straight past the empty trampoline
        // block to `target`'s first real op (position 0), not mint a
        // label for the trampoline itself.
        match &code.ops[0] {
            BytecodeOp::Br(Label(pos)) => assert_eq!(*pos, 0),
            other => panic!("expected Br, got {other:?}"),
        }
    }

    #[test]
    fn environment_reads_are_coalesced_across_consecutive_uses() {
        let mut func = Function::new();
        let entry = func.entry;
        let env = func.append_inst(entry, Instruction::new(Opcode::ParentEnv, smallvec![], ValueType::Env));
        let venv = func.insts[env].result.unwrap();
        let mk = func.append_inst(entry, Instruction::new(Opcode::MkEnv, smallvec![venv], ValueType::Env));
        let venv2 = func.insts[mk].result.unwrap();

        let mut ld1 = Instruction::new(Opcode::LdEnv, smallvec![venv2], ValueType::Any);
        ld1.env_slot = Some(0);
        let r1 = func.append_inst(entry, ld1);
        let v1 = func.insts[r1].result.unwrap();

        let mut ld2 = Instruction::new(Opcode::LdEnv, smallvec![venv2], ValueType::Any);
        ld2.env_slot = Some(0);
        let r2 = func.append_inst(entry, ld2);
        let v2 = func.insts[r2].result.unwrap();

        let add = func.append_inst(entry, Instruction::new(Opcode::Add, smallvec![v1, v2], ValueType::Any));
        let vadd = func.insts[add].result.unwrap();
        func.append_inst(entry, Instruction::new(Opcode::Return, smallvec![vadd], ValueType::Void));

        let (cfg, alloc) = lower(&mut func);
        let mut stream = VecCodeStream::new();
        let locals = emit(&func, &cfg, &alloc, &NoPromises, &mut stream);
        let code = stream.finalize(false, locals);

        // Only one SetEnv: the second LdEnv sees the same `current_env`
        // already installed and skips reloading/resetting it.
        let set_envs = code.ops.iter().filter(|op| matches!(op, BytecodeOp::SetEnv)).count();
        assert_eq!(set_envs, 1, "{:?}", code.ops);
    }

    /// `emit_deopt` pops one entry per operand regardless of how each one
    /// was allocated: `load_args` (run by `emit` before `dispatch`) has
    /// already pushed every non-stack operand, so a `Pop` gated on
    /// `alloc[v] == Stack` would leave `Local`/constant operands dangling
    /// on the stack at `Trap; Ret`, breaking the terminal stack-empty
    /// invariant (§4.6). `emit_deopt` no longer consults the allocation map
    /// at all, so this is exercised directly against a bare `Instruction`.
    #[test]
    fn deopt_pops_every_operand_unconditionally() {
        let mut func = Function::new();
        let entry = func.entry;
        let a0 = func.append_inst(entry, Instruction::new(Opcode::LdArg(0), smallvec![], ValueType::Any));
        let va0 = func.insts[a0].result.unwrap();
        let a1 = func.append_inst(entry, Instruction::new(Opcode::LdArg(1), smallvec![], ValueType::Any));
        let va1 = func.insts[a1].result.unwrap();
        let a2 = func.append_inst(entry, Instruction::new(Opcode::LdArg(2), smallvec![], ValueType::Any));
        let va2 = func.insts[a2].result.unwrap();
        let deopt = Instruction::new(Opcode::Deopt, smallvec![va0, va1, va2], ValueType::Void);

        let mut stream = VecCodeStream::new();
        emit_deopt(&deopt, &mut stream);
        let code = stream.finalize(false, 0);

        assert_eq!(
            code.ops,
            vec![BytecodeOp::Pop, BytecodeOp::Pop, BytecodeOp::Pop, BytecodeOp::Trap, BytecodeOp::Ret]
        );
    }

    /// A deopt consuming a mix of a twice-used (forced-local) value and a
    /// single-use (stack-resident) value must still satisfy the verifier's
    /// terminal stack-empty check (§4.6) — the exact invariant `emit_deopt`
    /// popping only `Stack`-colored operands used to violate.
    #[test]
    fn deopt_with_mixed_allocation_satisfies_verifier() {
        let mut func = Function::new();
        let entry = func.entry;
        let a0 = func.append_inst(entry, Instruction::new(Opcode::LdArg(0), smallvec![], ValueType::Any));
        let va0 = func.insts[a0].result.unwrap();
        func.append_inst(entry, Instruction::new(Opcode::Add, smallvec![va0, va0], ValueType::Any));
        let a1 = func.append_inst(entry, Instruction::new(Opcode::LdArg(1), smallvec![], ValueType::Any));
        let va1 = func.insts[a1].result.unwrap();
        func.append_inst(entry, Instruction::new(Opcode::Deopt, smallvec![va0, va1], ValueType::Void));

        let (cfg, alloc) = lower(&mut func);
        let mut errors = crate::result::VerifierErrors::new();
        assert!(
            crate::verifier::verify(&func, &cfg, &alloc, &mut errors).is_ok(),
            "{errors}"
        );

        let mut stream = VecCodeStream::new();
        let locals = emit(&func, &cfg, &alloc, &NoPromises, &mut stream);
        let code = stream.finalize(false, locals);
        // Whatever `load_args` emitted to bring `va0`/`va1` into place, the
        // deopt's own trap sequence is exactly one `Pop` per operand
        // followed by `Trap; Ret` — regardless of how either operand was
        // allocated.
        assert!(
            code.ops.ends_with(&[BytecodeOp::Pop, BytecodeOp::Pop, BytecodeOp::Trap, BytecodeOp::Ret]),
            "{:?}",
            code.ops
        );
    }
}
