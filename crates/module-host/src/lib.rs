//! Capability-hosted module runtime.
//!
//! Loads a compiled module artifact, wires every import it declares to a
//! host-supplied factory, and drives the module to completion while the
//! host observes everything it emits through the outputs it injected.
//!
//! ```
//! use module_abi::ImportKind;
//! use module_host::artifact::{ArtifactBuilder, Op};
//! use module_host::builtins::BufferOutput;
//! use module_host::{load, HostRegistry};
//!
//! let sink = BufferOutput::new();
//! let registry = {
//!     let sink = sink.clone();
//!     HostRegistry::builder()
//!         .output("serial", move || Ok(Box::new(sink.clone())))
//!         .build()
//! };
//!
//! let artifact = ArtifactBuilder::new()
//!     .import(ImportKind::Output, "serial")
//!     .op(Op::LoadLiteral { reg: 0, bytes: b"hi".to_vec() })
//!     .op(Op::Consume { slot: 0, reg: 0 })
//!     .build();
//!
//! let mut instance = load(&artifact, &registry).unwrap();
//! instance.run().unwrap();
//! assert_eq!(sink.buffers(), vec![b"hi".to_vec()]);
//! ```
//!
//! Execution is synchronous and single-threaded: `load` and `run` block
//! the calling thread, and module-issued callbacks reach the host in
//! exactly the order the module issues them.

pub mod artifact;
pub mod builtins;
pub mod errors;
mod instance;
mod loader;
pub mod registry;

pub use crate::{
    artifact::{Artifact, ArtifactBuilder, Op},
    errors::{LoadError, RunError},
    instance::{InstanceState, RunReport, RuntimeInstance},
    loader::load,
    registry::{HostRegistry, HostRegistryBuilder},
};
