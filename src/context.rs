//! The top-level compilation entry point: owns per-compilation scratch state
//! and runs every pass in sequence, mirroring `cranelift-codegen`'s own
//! `Context::compile` (CSSA-equivalent passes, then coloring, then an
//! interleaved verify after each stage that actually changes the allocation
//! map, per `regalloc/context.rs::Context::run`).
//!
//! Nested code bodies (closures and promises) are the one place this crate's
//! pipeline branches from a single straight-line `compile()` call. A promise
//! is lowered into the *same* `EmittedFunction` as its owning body — it is
//! only ever invoked by that body, cached by identity so it is lowered at
//! most once, and referenced by a `CodeIndex` local to that function's own
//! code list. A closure is lowered completely independently: it is
//! separately tiered and dispatched, so its body goes through its own
//! `compile()` call against its own `DispatchTable` entry, and the creating
//! function's bytecode never needs to resolve anything about it beyond the
//! identity the host runtime already tracks.

use crate::bytecode::CodeStream;
use crate::cssa;
use crate::dominator_tree::DominatorTree;
use crate::dispatch::{DispatchTable, EmittedFunction, FunctionWriter, Tier, VecFunctionWriter};
use crate::emitter::{self, CodeRefResolver};
use crate::flowgraph::ControlFlowGraph;
use crate::ir::{ClosureId, CodeIndex, CodeRef, Function, Opcode};
use crate::liveness::Liveness;
use crate::regalloc;
use crate::result::{CodegenError, CodegenResult, VerifierErrors};
use crate::settings::{DebugFlag, Flags};
use crate::stack_coloring::{self, FallthroughPolicy};
use crate::verifier;
use cranelift_entity::{EntityRef, SecondaryMap};
use rustc_hash::{FxHashMap, FxHashSet};

/// The tier this crate's own pipeline installs at (§6: "tier 0 is the
/// baseline, the lowering core installs at tier 1").
const OWN_TIER: Tier = 1;

/// `trace!`-logs `$msg` through `log`, gated on both the `trace-log` Cargo
/// feature (which decides whether the call site compiles in at all) and the
/// runtime `DebugAllocator` flag (which decides whether it actually fires) —
/// the two are independent knobs per `settings.rs`'s own doc comment.
macro_rules! allocator_trace {
    ($flags:expr, $($arg:tt)*) => {
        #[cfg(feature = "trace-log")]
        {
            if $flags.is_set(DebugFlag::DebugAllocator) {
                log::trace!($($arg)*);
            }
        }
        #[cfg(not(feature = "trace-log"))]
        {
            let _ = &$flags;
        }
    };
}

/// Per-compilation state. Cheap to construct; one `Context` is meant to be
/// reused across many `compile()` calls the way a host runtime reuses one
/// per worker thread, but nothing inside it is actually mutated between
/// calls today — it exists as the extension point future passes (a spiller,
/// a second allocator tier) would hang scratch buffers off of, the same
/// role `cranelift_codegen::Context` plays for its own pipeline. A `Context`
/// must not be shared across threads concurrently; nothing here enforces
/// that with `unsafe impl !Sync`, it is simply a documented invariant, as in
/// the teacher.
pub struct Context {
    pub flags: Flags,
}

impl Context {
    pub fn new(flags: Flags) -> Self {
        Context { flags }
    }

    /// Lower `func` to bytecode, along with every promise body it (directly
    /// or transitively) creates. `promises` supplies the PIR for each
    /// `CodeRef` a `MkPromise` in `func` or one of its own promises might
    /// name; a ref with no entry, or one whose lowering recurses back into
    /// itself before completing, is an error (`UnresolvedNestedBody`) rather
    /// than an infinite loop.
    ///
    /// Returns the `CodeIndex` of `func`'s own body within `writer`. Promise
    /// bodies are finalized into the same writer first, in post-order, so
    /// their indices exist before `func`'s own body needs to reference them.
    pub fn compile(
        &mut self,
        func: &Function,
        promises: &FxHashMap<CodeRef, Function>,
        writer: &mut impl FunctionWriter,
    ) -> CodegenResult<CodeIndex> {
        let mut resolved: FxHashMap<CodeRef, CodeIndex> = FxHashMap::default();
        let mut done: FxHashSet<CodeRef> = FxHashSet::default();
        self.lower_promises_of(func, promises, writer, &mut resolved, &mut done)?;
        self.lower_one(func, &resolved, writer)
    }

    fn lower_promises_of(
        &mut self,
        func: &Function,
        promises: &FxHashMap<CodeRef, Function>,
        writer: &mut impl FunctionWriter,
        resolved: &mut FxHashMap<CodeRef, CodeIndex>,
        done: &mut FxHashSet<CodeRef>,
    ) -> CodegenResult<()> {
        for block in func.block_ids() {
            for &inst in &func.blocks[block].insts {
                let Opcode::MkPromise(r) = func.insts[inst].opcode else {
                    continue;
                };
                if resolved.contains_key(&r) {
                    continue;
                }
                if !done.insert(r) {
                    return Err(CodegenError::UnresolvedNestedBody(r));
                }
                let body = promises
                    .get(&r)
                    .ok_or(CodegenError::UnresolvedNestedBody(r))?;
                self.lower_promises_of(body, promises, writer, resolved, done)?;
                let index = self.lower_one(body, resolved, writer)?;
                resolved.insert(r, index);
            }
        }
        Ok(())
    }

    /// Run every pass over one function body — CSSA, liveness, the two
    /// allocator tiers, the verifier, and emission — and finalize its
    /// bytecode into `writer`. Does not recurse into nested bodies itself;
    /// callers (`compile`/`lower_promises_of`) are responsible for lowering
    /// promise bodies before the body that references them reaches here.
    fn lower_one(
        &mut self,
        func: &Function,
        resolved: &FxHashMap<CodeRef, CodeIndex>,
        writer: &mut impl FunctionWriter,
    ) -> CodegenResult<CodeIndex> {
        let mut func = func.clone();
        cssa::construct(&mut func);
        if self.flags.is_set(DebugFlag::PrintCssa) {
            log::debug!("after CSSA construction:\n{func}");
        }

        let cfg = ControlFlowGraph::with_function(&func);
        let domtree = DominatorTree::with_function(&func, &cfg);
        allocator_trace!(self.flags, "dominator tree computed over {} blocks", func.num_blocks());

        let liveness = Liveness::with_function(&func, &cfg);
        allocator_trace!(self.flags, "liveness fixed point reached");

        let mut alloc = SecondaryMap::new();
        stack_coloring::color(&func, &cfg, &mut alloc, FallthroughPolicy::Safe);
        allocator_trace!(self.flags, "stack pre-coloring done");
        regalloc::allocate(&func, &cfg, &domtree, &liveness, &mut alloc);
        allocator_trace!(self.flags, "dominance-order coloring done");

        if self.flags.is_set(DebugFlag::PrintLivenessIntervals) {
            log::debug!("allocation map:\n{}", format_allocation_map(&func, &alloc));
        }

        if self.flags.enable_verifier() {
            let mut errors = VerifierErrors::new();
            if verifier::verify(&func, &cfg, &alloc, &mut errors).is_err() {
                return Err(CodegenError::Verifier(errors));
            }
        }

        if self.flags.is_set(DebugFlag::PrintFinalPir) {
            log::debug!("final PIR before emission:\n{func}");
        }

        let resolver = PromiseResolver { resolved };
        let mut stream = writer.new_stream();
        let locals = emitter::emit(&func, &cfg, &alloc, &resolver, &mut stream);
        let index = writer.finalize(stream, false, locals);
        Ok(index)
    }

    /// Lower a closure's own body and, unless `DryRun` is set, install it
    /// into its dispatch table at tier 1 (§6, §4.8).
    ///
    /// If tier 1 is already present, returns `Ok(None)` without recompiling
    /// — the dispatch-table check named in §6 ("if tier 1 is already present,
    /// the core returns without recompiling"). If `closure` is already in
    /// `done`, this is a self- or mutually-recursive compilation attempt
    /// revisiting a body still being lowered further up the call stack; it
    /// also short-circuits to `Ok(None)` rather than recursing forever (§9
    /// "Closure recursion" — the set is keyed by IR-closure identity, not
    /// user-level function name, so two differently-named closures sharing
    /// one recursive binding are still only ever attempted once).
    pub fn compile_closure<D: DispatchTable>(
        &mut self,
        closure: ClosureId,
        func: &Function,
        promises: &FxHashMap<CodeRef, Function>,
        table: &mut D,
        done: &mut FxHashSet<ClosureId>,
    ) -> CodegenResult<Option<EmittedFunction>> {
        if table.available(OWN_TIER) {
            return Ok(None);
        }
        if !done.insert(closure) {
            return Ok(None);
        }

        let mut writer = VecFunctionWriter::new();
        self.compile(func, promises, &mut writer)?;
        let emitted = writer.finish();

        if self.flags.is_set(DebugFlag::PrintFinalRir) {
            for (i, code) in emitted.codes.iter().enumerate() {
                log::debug!("final bytecode, code[{i}]:\n{code}");
            }
        }

        if !self.flags.is_set(DebugFlag::DryRun) {
            table.put(OWN_TIER, emitted.clone());
        }
        Ok(Some(emitted))
    }
}

/// §6 "PrintLivenessIntervals": a plain-text dump of every allocated value's
/// slot, for the `PrintLivenessIntervals` debug flag. Named after the flag
/// rather than after `Liveness` itself, since what it actually prints is the
/// *outcome* of allocation (per §6's own table: "Dump allocation map").
fn format_allocation_map(func: &Function, alloc: &SecondaryMap<crate::ir::Value, crate::ir::SlotAssignment>) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    for block in func.block_ids() {
        for &inst in &func.blocks[block].insts {
            if let Some(result) = func.insts[inst].result {
                let _ = writeln!(out, "  {result} -> {}", alloc[result]);
            }
        }
    }
    out
}

struct PromiseResolver<'a> {
    resolved: &'a FxHashMap<CodeRef, CodeIndex>,
}

impl CodeRefResolver for PromiseResolver<'_> {
    fn promise_index(&self, r: CodeRef) -> u32 {
        self.resolved
            .get(&r)
            .copied()
            .unwrap_or_else(|| panic!("promise {r:?} referenced before it was lowered"))
            .index() as u32
    }
}
