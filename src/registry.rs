//! Versioned orchestration and activity registries.
//!
//! Handlers register under a name plus a semver version; resolution picks the
//! latest version by default, or an exact one when the caller pins it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use semver::Version;

use crate::OrchestrationContext;

/// Orchestration logic. Must be deterministic: every effect goes through the
/// context, and errors travel as `String` payloads rather than `anyhow`-style
/// opaque errors so they serialize into failure details.
///
/// The boxed-future shape (rather than `async_trait`) lets the replayer hold
/// and poll the future manually with its own waker.
pub trait OrchestrationHandler: Send + Sync {
    fn invoke(
        &self,
        ctx: OrchestrationContext,
        input: Option<String>,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Option<String>, String>> + Send + '_>,
    >;
}

/// Activity logic: plain async work with no determinism constraints.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn invoke(&self, input: Option<String>) -> Result<Option<String>, String>;
}

/// Adapter turning an async closure into an [`OrchestrationHandler`].
pub struct FnOrchestration<F>(pub F);

impl<F, Fut> OrchestrationHandler for FnOrchestration<F>
where
    F: Fn(OrchestrationContext, Option<String>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Option<String>, String>> + Send + 'static,
{
    fn invoke(
        &self,
        ctx: OrchestrationContext,
        input: Option<String>,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Option<String>, String>> + Send + '_>,
    > {
        Box::pin((self.0)(ctx, input))
    }
}

/// Adapter turning an async closure into an [`ActivityHandler`].
pub struct FnActivity<F>(pub F);

#[async_trait]
impl<F, Fut> ActivityHandler for FnActivity<F>
where
    F: Fn(Option<String>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Option<String>, String>> + Send,
{
    async fn invoke(&self, input: Option<String>) -> Result<Option<String>, String> {
        (self.0)(input).await
    }
}

/// Which registered version a lookup should resolve to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionPolicy {
    Latest,
    Exact(Version),
}

/// Name -> version -> handler map. `BTreeMap` keeps versions ordered so
/// `Latest` is the last entry.
pub struct Registry<H: ?Sized> {
    handlers: HashMap<String, BTreeMap<Version, Arc<H>>>,
}

impl<H: ?Sized> Clone for Registry<H> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<H: ?Sized> Default for Registry<H> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<H: ?Sized> Registry<H> {
    pub fn builder() -> RegistryBuilder<H> {
        RegistryBuilder {
            registry: Self::default(),
        }
    }

    pub fn resolve(&self, name: &str, policy: &VersionPolicy) -> Option<Arc<H>> {
        let versions = self.handlers.get(name)?;
        match policy {
            VersionPolicy::Latest => versions.values().next_back().cloned(),
            VersionPolicy::Exact(v) => versions.get(v).cloned(),
        }
    }

    /// Resolve by the optional version string handlers carry on the wire:
    /// absent or unparsable pins nothing and falls back to `Latest`.
    pub fn resolve_wire(&self, name: &str, version: Option<&str>) -> Option<Arc<H>> {
        let policy = version
            .and_then(|v| Version::parse(v).ok())
            .map(VersionPolicy::Exact)
            .unwrap_or(VersionPolicy::Latest);
        self.resolve(name, &policy)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

pub struct RegistryBuilder<H: ?Sized> {
    registry: Registry<H>,
}

impl<H: ?Sized> RegistryBuilder<H> {
    /// Register under version `1.0.0`.
    pub fn register(self, name: impl Into<String>, handler: Arc<H>) -> Self {
        self.register_versioned(name, Version::new(1, 0, 0), handler)
    }

    pub fn register_versioned(
        mut self,
        name: impl Into<String>,
        version: Version,
        handler: Arc<H>,
    ) -> Self {
        self.registry
            .handlers
            .entry(name.into())
            .or_default()
            .insert(version, handler);
        self
    }

    pub fn build(self) -> Registry<H> {
        self.registry
    }
}

pub type OrchestrationRegistry = Registry<dyn OrchestrationHandler>;
pub type ActivityRegistry = Registry<dyn ActivityHandler>;
