//! Compilation results and the error taxonomy (§7).
//!
//! The lowering core treats every failure as a compiler bug: there are no
//! recoverable error paths, only diagnostics that let a caller print a good
//! bug report before aborting the compilation attempt. This mirrors
//! `cranelift-codegen::result::{CodegenError, CodegenResult}`, down to
//! `Verifier` being the one variant that carries a structured list rather
//! than a single message.

use std::fmt;
use thiserror::Error;

/// The location an error is attributed to, for diagnostic display.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorLocation {
    Block(crate::ir::Block),
    Inst(crate::ir::Inst),
    Value(crate::ir::Value),
}

impl fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorLocation::Block(b) => write!(f, "{b}"),
            ErrorLocation::Inst(i) => write!(f, "{i}"),
            ErrorLocation::Value(v) => write!(f, "{v}"),
        }
    }
}

/// One failed check, located precisely enough to reproduce from a bug
/// report: the slot involved, and what the verifier expected versus found.
#[derive(Clone, Debug, Error)]
#[error("{location}: {message}")]
pub struct VerifierError {
    pub location: ErrorLocation,
    pub message: String,
}

impl VerifierError {
    pub fn new(location: ErrorLocation, message: impl Into<String>) -> Self {
        VerifierError { location, message: message.into() }
    }
}

/// An accumulated list of verifier failures. Passes append to this instead
/// of aborting on the first mismatch, so a single bad compilation surfaces
/// every broken invariant at once.
#[derive(Clone, Debug, Default)]
pub struct VerifierErrors(pub Vec<VerifierError>);

impl VerifierErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, err: VerifierError) {
        self.0.push(err);
    }

    /// Fail with `Ok(())` if no errors were recorded, `Err(())` otherwise —
    /// mirrors `cranelift-codegen`'s `VerifierErrors::as_result`, letting a
    /// pass short-circuit `Context::run`'s interleaved verify steps without
    /// cloning the list.
    pub fn as_result(&self) -> Result<(), ()> {
        if self.is_empty() { Ok(()) } else { Err(()) }
    }
}

impl fmt::Display for VerifierErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

/// Everything that can cause `Context::compile` to fail. Every variant is a
/// compiler bug per §7 — none of these are meant to be handled by matching
/// on the variant and retrying.
#[derive(Clone, Debug, Error)]
pub enum CodegenError {
    /// The input PIR itself is malformed: an unknown opcode tag or an
    /// operand that does not resolve to a defined `Value`.
    #[error("malformed IR: {0}")]
    MalformedIr(String),

    /// The symbolic verifier (§4.6) rejected the allocated, emitted
    /// function.
    #[error("verification failed:\n{0}")]
    Verifier(VerifierErrors),

    /// A closure/promise body referenced by `MkClosure`/`MkPromise`
    /// resolves to no cached lowering and recursion bottomed out without
    /// completing it (§4.8).
    #[error("nested body {0:?} never finished lowering")]
    UnresolvedNestedBody(crate::ir::CodeRef),
}

impl From<VerifierErrors> for CodegenError {
    fn from(errors: VerifierErrors) -> Self {
        CodegenError::Verifier(errors)
    }
}

pub type CodegenResult<T> = Result<T, CodegenError>;
