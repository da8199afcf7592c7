//! Load entry point: parse, resolve, materialize, bind.
//!
//! The load is all-or-nothing. Imports are resolved against the registry
//! before any factory runs, so an unknown import never triggers
//! construction side effects; a failing factory aborts with the underlying
//! cause attached. No module code executes during load.

use module_abi::{Capability, ImportKind, Model, Output};

use crate::artifact;
use crate::errors::LoadError;
use crate::instance::RuntimeInstance;
use crate::registry::{HostRegistry, ResolvedFactory};

/// Load a compiled artifact against a registry, returning a wired but
/// unstarted [`RuntimeInstance`].
pub fn load(bytes: &[u8], registry: &HostRegistry) -> Result<RuntimeInstance, LoadError> {
    let artifact = artifact::parse(bytes)?;

    tracing::debug!(
        digest = %hex::encode(blake3::hash(bytes).as_bytes()),
        imports = artifact.imports.len(),
        ops = artifact.ops.len(),
        registers = artifact.register_count,
        "load.parsed"
    );

    // Resolve everything first: a single unresolved import aborts the load
    // before any factory has run.
    let mut resolved = Vec::with_capacity(artifact.imports.len());
    for decl in &artifact.imports {
        resolved.push(registry.resolve(decl)?);
    }

    // Materialize one instance per declared import, in declaration order.
    // Slot indices count per kind, so each kind gets its own table.
    let mut capabilities: Vec<Box<dyn Capability>> = Vec::new();
    let mut outputs: Vec<Box<dyn Output>> = Vec::new();
    let mut models: Vec<Box<dyn Model>> = Vec::new();

    for (decl, factory) in artifact.imports.iter().zip(resolved) {
        let construction_failed = |source: anyhow::Error| LoadError::CapabilityConstructionFailed {
            kind: decl.kind,
            name: decl.name.clone(),
            source,
        };
        match factory {
            ResolvedFactory::Capability(f) => {
                capabilities.push(f().map_err(construction_failed)?);
            }
            ResolvedFactory::Output(f) => {
                outputs.push(f().map_err(construction_failed)?);
            }
            ResolvedFactory::Model(f) => {
                models.push(f().map_err(construction_failed)?);
            }
        }
    }

    tracing::info!(
        capabilities = capabilities.len(),
        outputs = outputs.len(),
        models = models.len(),
        ops = artifact.ops.len(),
        "load.done"
    );

    Ok(RuntimeInstance::new(
        artifact,
        capabilities,
        outputs,
        models,
        registry.log_hook(),
    ))
}
