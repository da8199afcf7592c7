//! Capability registry: resolves a module's declared imports to
//! host-supplied factories.
//!
//! The host supplies behavior, not data: every entry is a zero-argument
//! factory producing one concrete `Capability`/`Output`/`Model`. A registry
//! is built wholesale, is read-only afterwards, and may be shared across
//! any number of loads.

use std::collections::HashMap;
use std::sync::Arc;

use module_abi::{Capability, ImportDeclaration, ImportKind, Model, Output};

use crate::errors::LoadError;

pub type CapabilityFactory = Box<dyn Fn() -> anyhow::Result<Box<dyn Capability>> + Send + Sync>;
pub type OutputFactory = Box<dyn Fn() -> anyhow::Result<Box<dyn Output>> + Send + Sync>;
pub type ModelFactory = Box<dyn Fn() -> anyhow::Result<Box<dyn Model>> + Send + Sync>;

/// Host instrumentation hook, invokable by the module (never by the core).
pub type LogHook = Arc<dyn Fn(&str) + Send + Sync>;

/// A factory resolved for one declared import.
pub enum ResolvedFactory<'a> {
    Capability(&'a CapabilityFactory),
    Output(&'a OutputFactory),
    Model(&'a ModelFactory),
}

#[derive(Default)]
pub struct HostRegistry {
    capabilities: HashMap<String, CapabilityFactory>,
    outputs: HashMap<String, OutputFactory>,
    models: HashMap<String, ModelFactory>,
    // Kind-wide fallbacks, serving any name the exact maps miss.
    create_capability: Option<CapabilityFactory>,
    create_output: Option<OutputFactory>,
    create_model: Option<ModelFactory>,
    log: Option<LogHook>,
}

impl HostRegistry {
    pub fn builder() -> HostRegistryBuilder {
        HostRegistryBuilder::default()
    }

    /// A registry with no factories. Only zero-import artifacts load
    /// against it.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up the factory for one declared import. Exact `(kind, name)`
    /// entries win over the kind-wide fallback. Pure lookup, no side
    /// effects.
    pub fn resolve(&self, decl: &ImportDeclaration) -> Result<ResolvedFactory<'_>, LoadError> {
        let missing = || LoadError::UnknownImport {
            kind: decl.kind,
            name: decl.name.clone(),
        };
        match decl.kind {
            ImportKind::Capability => self
                .capabilities
                .get(&decl.name)
                .or(self.create_capability.as_ref())
                .map(ResolvedFactory::Capability)
                .ok_or_else(missing),
            ImportKind::Output => self
                .outputs
                .get(&decl.name)
                .or(self.create_output.as_ref())
                .map(ResolvedFactory::Output)
                .ok_or_else(missing),
            ImportKind::Model => self
                .models
                .get(&decl.name)
                .or(self.create_model.as_ref())
                .map(ResolvedFactory::Model)
                .ok_or_else(missing),
        }
    }

    pub fn log_hook(&self) -> Option<LogHook> {
        self.log.clone()
    }
}

/// Builds a [`HostRegistry`]. Per-name registrations take precedence over
/// the kind-wide `create_*` fallbacks.
#[derive(Default)]
pub struct HostRegistryBuilder {
    registry: HostRegistry,
}

impl HostRegistryBuilder {
    pub fn capability<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Capability>> + Send + Sync + 'static,
    {
        self.registry.capabilities.insert(name.into(), Box::new(f));
        self
    }

    pub fn output<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Output>> + Send + Sync + 'static,
    {
        self.registry.outputs.insert(name.into(), Box::new(f));
        self
    }

    pub fn model<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Model>> + Send + Sync + 'static,
    {
        self.registry.models.insert(name.into(), Box::new(f));
        self
    }

    /// Fallback serving every capability name without an exact entry.
    pub fn create_capability<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Capability>> + Send + Sync + 'static,
    {
        self.registry.create_capability = Some(Box::new(f));
        self
    }

    /// Fallback serving every output name without an exact entry.
    pub fn create_output<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Output>> + Send + Sync + 'static,
    {
        self.registry.create_output = Some(Box::new(f));
        self
    }

    /// Fallback serving every model name without an exact entry.
    pub fn create_model<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Model>> + Send + Sync + 'static,
    {
        self.registry.create_model = Some(Box::new(f));
        self
    }

    pub fn log<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.registry.log = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> HostRegistry {
        self.registry
    }
}
