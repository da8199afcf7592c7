//! Load/run error taxonomy.
//!
//! Every fallible entry point returns one of these; nothing here panics or
//! exits the process. Messages carry stable code prefixes (`LD-`, `RUN-`)
//! so callers and logs can match on them without parsing prose.

use module_abi::{CapabilityError, ImportKind};
use thiserror::Error;

use crate::artifact::ArtifactError;

/// Failures while loading an artifact. All-or-nothing: none of these ever
/// leaves a partially constructed instance behind.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("LD-001: malformed artifact: {0}")]
    MalformedArtifact(#[from] ArtifactError),

    #[error("LD-002: unknown import: no {kind} factory registered for '{name}'")]
    UnknownImport { kind: ImportKind, name: String },

    #[error("LD-003: constructing {kind} '{name}' failed: {source}")]
    CapabilityConstructionFailed {
        kind: ImportKind,
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Failures while running a loaded instance.
#[derive(Debug, Error)]
pub enum RunError {
    /// The module faulted mid-run; the instance is now terminal.
    #[error("RUN-001: module fault at op {op_index}: {source}")]
    ModuleFault {
        op_index: usize,
        #[source]
        source: CapabilityError,
    },

    #[error("RUN-002: instance is faulted and cannot be run again")]
    InstanceFaulted,

    #[error("RUN-003: instance already completed and cannot be run again")]
    InstanceFinished,
}
