//! Contract layer for the capability-hosted module runtime.
//!
//! Defines the three host-implemented object kinds a loaded module can call
//! into (`Capability`, `Output`, `Model`), the import declaration model
//! shared by the artifact codec and the registry, and the capability-level
//! error type.
//!
//! Nothing in this crate executes module code; it is the seam between the
//! host and the runtime in `module-host`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Imports
// ---------------------------------------------------------------------------

/// The kind of host object an import slot binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportKind {
    Capability,
    Output,
    Model,
}

impl fmt::Display for ImportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capability => write!(f, "capability"),
            Self::Output => write!(f, "output"),
            Self::Model => write!(f, "model"),
        }
    }
}

/// One host dependency a module declares before it can run.
///
/// `(kind, name)` is unique within an artifact; the parser rejects
/// duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImportDeclaration {
    pub kind: ImportKind,
    pub name: String,
}

impl ImportDeclaration {
    pub fn new(kind: ImportKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ImportDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures a concrete capability/output/model reports to its caller.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("CAP-001: unknown parameter '{name}'")]
    InvalidParameter { name: String },

    #[error("CAP-002: buffer too small: need {needed} bytes, capacity is {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    #[error("CAP-003: {0}")]
    Failed(String),
}

impl CapabilityError {
    /// Shorthand for implementation-specific failures.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

// ---------------------------------------------------------------------------
// Host object traits
// ---------------------------------------------------------------------------

/// A host-implemented source of generated data.
///
/// Invoked synchronously by the running module; implementations own no
/// runtime internals.
pub trait Capability: Send {
    /// Set a named numeric parameter. Unrecognized names fail with
    /// `InvalidParameter`.
    fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), CapabilityError>;

    /// Fill `dest` with generated content and return the number of bytes
    /// written. Must never write past `dest.len()`; content larger than the
    /// capacity fails with `BufferTooSmall` and leaves `dest` unwritten.
    fn generate(&mut self, dest: &mut [u8]) -> Result<usize, CapabilityError>;
}

/// A host-implemented consumer of byte buffers emitted by a module.
pub trait Output: Send {
    /// Accept a buffer for host-side disposition. `data` is only borrowed
    /// for the duration of the call; copy it to retain it. Must not be
    /// mutated.
    fn consume(&mut self, data: &[u8]) -> Result<(), CapabilityError>;
}

/// A host-implemented model transforming an input buffer into an output
/// buffer.
pub trait Model: Send {
    /// Run inference over `input`, writing into `output` and returning the
    /// number of bytes written. Same capacity contract as
    /// [`Capability::generate`].
    fn infer(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize, CapabilityError>;
}
