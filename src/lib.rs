//! PIR-to-bytecode lowering core: CSSA construction, liveness analysis,
//! two-tier storage allocation, a symbolic verifier, and a code emitter.
//!
//! The entry point is [`Context::compile`] (or [`Context::compile_closure`]
//! for the dispatch-table-aware, recursion-bounded variant used to lower a
//! nested closure's own body — see `context.rs`). Everything else in this
//! crate is a component of that one pipeline or an external collaborator's
//! reference implementation (`dispatch.rs`'s `VecFunctionWriter`/
//! `HashMapDispatchTable`, `bytecode.rs`'s `VecCodeStream`) that a host
//! runtime would normally supply its own version of.

pub mod bytecode;
pub mod context;
pub mod cssa;
pub mod dispatch;
pub mod dominator_tree;
pub mod emitter;
pub mod flowgraph;
pub mod ir;
pub mod liveness;
pub mod regalloc;
pub mod result;
pub mod settings;
pub mod stack_coloring;
pub mod verifier;

pub use context::Context;
pub use result::{CodegenError, CodegenResult};
pub use settings::{DebugFlag, Flags};
