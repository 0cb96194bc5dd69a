//! Function Writer and Dispatch Table (§6): the two collaborators a host
//! runtime owns and this crate only ever calls into.

use crate::bytecode::{FinalizedCode, VecCodeStream};
use crate::ir::CodeIndex;
use rustc_hash::FxHashMap;

/// Accepts finalized code streams and hands back a compact function object.
/// The emitter opens one stream per body (the outer function, plus one per
/// nested closure/promise — §4.8), finalizes each, and the writer assigns
/// it the next `CodeIndex` in the order streams are finalized.
pub trait FunctionWriter {
    fn new_stream(&mut self) -> VecCodeStream;
    fn finalize(
        &mut self,
        stream: VecCodeStream,
        is_default_arg: bool,
        locals_count: u32,
    ) -> CodeIndex;
}

/// The compact function object a `FunctionWriter` hands back: every code
/// body lowered during one `Context::compile` call, indexed by `CodeIndex`.
#[derive(Clone, Debug, Default)]
pub struct EmittedFunction {
    pub codes: Vec<FinalizedCode>,
}

impl EmittedFunction {
    pub fn code(&self, index: CodeIndex) -> &FinalizedCode {
        &self.codes[index.index()]
    }
}

/// An in-memory reference `FunctionWriter`: interns finalized code bodies
/// into a plain `Vec`, in finalization order. Mirrors how
/// `cranelift-codegen`'s `binemit::MemoryCodeSink` is both the production
/// sink and the one its own test suite asserts against.
#[derive(Default)]
pub struct VecFunctionWriter {
    codes: Vec<FinalizedCode>,
}

impl VecFunctionWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> EmittedFunction {
        EmittedFunction { codes: self.codes }
    }
}

impl FunctionWriter for VecFunctionWriter {
    fn new_stream(&mut self) -> VecCodeStream {
        VecCodeStream::new()
    }

    fn finalize(
        &mut self,
        stream: VecCodeStream,
        is_default_arg: bool,
        locals_count: u32,
    ) -> CodeIndex {
        use cranelift_entity::EntityRef;
        let index = CodeIndex::new(self.codes.len());
        self.codes.push(stream.finalize(is_default_arg, locals_count));
        index
    }
}

/// A compilation tier: `0` is the baseline interpreter body, `1` is this
/// crate's own output. Higher tiers belong to a future optimizing pipeline
/// this crate does not implement.
pub type Tier = u32;

/// Per-closure table selecting which code body the interpreter runs, keyed
/// by tier. The lowering core only ever reads `available`/`first` and
/// writes via `put`; the table's own eviction/promotion policy across tiers
/// is a host-runtime concern (Non-goal, §9).
pub trait DispatchTable {
    fn capacity(&self) -> usize;
    fn available(&self, tier: Tier) -> bool;
    fn first(&self) -> Option<Tier>;
    fn put(&mut self, tier: Tier, function: EmittedFunction);
    fn get(&self, tier: Tier) -> Option<&EmittedFunction>;
}

/// An in-memory reference dispatch table, one per closure.
#[derive(Default)]
pub struct HashMapDispatchTable {
    tiers: FxHashMap<Tier, EmittedFunction>,
}

impl HashMapDispatchTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DispatchTable for HashMapDispatchTable {
    fn capacity(&self) -> usize {
        self.tiers.capacity()
    }

    fn available(&self, tier: Tier) -> bool {
        self.tiers.contains_key(&tier)
    }

    fn first(&self) -> Option<Tier> {
        self.tiers.keys().min().copied()
    }

    fn put(&mut self, tier: Tier, function: EmittedFunction) {
        self.tiers.insert(tier, function);
    }

    fn get(&self, tier: Tier) -> Option<&EmittedFunction> {
        self.tiers.get(&tier)
    }
}
