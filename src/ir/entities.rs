//! Dense entity references used throughout the lowering core.
//!
//! Instructions, basic blocks and values are never referenced through Rust
//! references: they are 32-bit indices into arenas owned by [`super::Function`].
//! This keeps the IR `Copy`, keeps sidecar maps (liveness, allocation) dense
//! vectors rather than hash maps, and matches the representation described in
//! spec §9 ("Ownership of IR").

use cranelift_entity::entity_impl;
use std::fmt;

/// A basic block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An SSA value: the result of an instruction, a phi, a constant, or an
/// environment sentinel. Constants and environment sentinels are `Value`s
/// but are never allocated a slot — they are materialized at each use site.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);
entity_impl!(Value, "v");

/// An instruction within a basic block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// A lowered, finalized code object: one per function body or promise body.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeIndex(u32);
entity_impl!(CodeIndex, "code");

/// Identity of a nested closure body, for the `done`-set recursion bound of
/// §4.8/§9 ("Closure recursion"): keyed by IR-closure identity, not by
/// user-level function name, since two closures can share a name but never
/// an identity. Distinct from [`CodeIndex`] (a *finalized* body's slot in an
/// `EmittedFunction`) and from `Instruction::CodeRef` (a promise reference
/// scoped to a single function's own promise list) — a closure is lowered
/// against its own independent dispatch table and needs identity stable
/// across the whole mutually-recursive compilation forest it may belong to.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClosureId(u32);
entity_impl!(ClosureId, "closure");

/// Slot assigned to a [`Value`] by the storage allocator.
///
/// Mirrors `cranelift-codegen`'s `regalloc::Affinity` tri-state
/// (`Unassigned` / `Stack` / `Reg`), but with `Reg` replaced by a numbered
/// local slot rather than a machine register class.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum SlotAssignment {
    /// Not yet assigned, or dead (the value's result is popped, never read).
    #[default]
    Unassigned,
    /// Lives on the evaluation stack rather than in a local slot.
    Stack,
    /// Lives in local slot `n`. Slot 0 is reserved as the unassigned
    /// sentinel per the glossary, so real local slots start at 1.
    Local(u32),
}

impl SlotAssignment {
    pub fn is_stack(self) -> bool {
        matches!(self, SlotAssignment::Stack)
    }

    pub fn is_local(self) -> bool {
        matches!(self, SlotAssignment::Local(_))
    }

    pub fn local_slot(self) -> Option<u32> {
        match self {
            SlotAssignment::Local(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for SlotAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotAssignment::Unassigned => write!(f, "unassigned"),
            SlotAssignment::Stack => write!(f, "stack"),
            SlotAssignment::Local(n) => write!(f, "local{n}"),
        }
    }
}
