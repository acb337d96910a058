//! Engine handle
//!
//! Owns the registry, instance cache, sandbox, journal and normalizer, and
//! exposes the authoring and resolution API. Share it behind an `Arc`.

use fte_context::{Context, Normalizer};
use serde::Serialize;
use std::sync::Arc;

use crate::cache::{CacheStats, InstanceCache};
use crate::config::EngineConfig;
use crate::error::{ConfigError, EngineError};
use crate::graph::DependencyGraph;
use crate::journal::Journal;
use crate::registry::{FactSummary, Registry};
use crate::resolver::{Resolution, Resolver};
use crate::sandbox::{Sandbox, WorkerCommand};
use crate::store::DataStore;
use crate::types::{FactDefinition, FactDefinitionVersion, FactId, VersionKey};

/// Everything `inspect` knows about a fact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactReport {
    pub definition: FactDefinition,
    pub versions: Vec<u32>,
    pub active: Option<FactDefinitionVersion>,
    /// Active facts that depend on this one
    pub dependents: Vec<FactId>,
    /// Instances cached for the active version
    pub cached_instances: usize,
}

/// Main engine handle
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    registry: Registry,
    cache: InstanceCache,
    sandbox: Sandbox,
    journal: Journal,
    normalizer: Normalizer,
}

impl Engine {
    /// Create an engine over a data store
    ///
    /// # Errors
    /// [`ConfigError::InvalidValue`] when the configuration does not validate.
    pub fn new(config: EngineConfig, store: Arc<dyn DataStore>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::assemble(config, store))
    }

    /// Engine with the default configuration
    pub fn with_store(store: Arc<dyn DataStore>) -> Self {
        Self::assemble(EngineConfig::default(), store)
    }

    fn assemble(config: EngineConfig, store: Arc<dyn DataStore>) -> Self {
        let worker = config.worker_program.clone().map(WorkerCommand::fte);
        Self {
            normalizer: config.normalizer(),
            registry: Registry::new(),
            cache: InstanceCache::new(),
            journal: Journal::with_capacity(config.journal_capacity),
            sandbox: Sandbox::new(config.isolation, worker, config.limits, store),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn cache(&self) -> &InstanceCache {
        &self.cache
    }

    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    #[must_use]
    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    #[must_use]
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// # Errors
    /// See [`Registry::register`].
    pub fn register(&self, definition: FactDefinition) -> Result<(), EngineError> {
        self.registry.register(definition)
    }

    /// Append a version after checking its bindings against the store
    ///
    /// # Errors
    /// [`EngineError::MalformedLogic`] for a binding to a primitive the store
    /// does not offer, otherwise see [`Registry::add_version`].
    pub fn add_version(&self, version: FactDefinitionVersion) -> Result<(), EngineError> {
        let primitives = self.sandbox.store().primitives();
        if let Some(binding) = version
            .bindings
            .iter()
            .find(|b| !primitives.contains(&b.primitive))
        {
            return Err(EngineError::MalformedLogic {
                fact: version.fact.clone(),
                version: version.version,
                message: format!(
                    "binding '{}' uses unknown primitive '{}'",
                    binding.name, binding.primitive
                ),
            });
        }
        self.registry.add_version(version)
    }

    /// # Errors
    /// See [`Registry::activate`].
    pub fn activate(&self, fact: &FactId, version: u32) -> Result<(), EngineError> {
        self.registry.activate(fact, version)
    }

    /// # Errors
    /// See [`Registry::deactivate`].
    pub fn deactivate(&self, fact: &FactId) -> Result<(), EngineError> {
        self.registry.deactivate(fact)
    }

    /// Resolve a fact over a context
    ///
    /// # Errors
    /// Any per-request [`EngineError`]; nothing is cached on failure.
    pub async fn resolve(&self, fact: &FactId, context: Context) -> Result<Resolution, EngineError> {
        Resolver {
            registry: &self.registry,
            cache: &self.cache,
            sandbox: &self.sandbox,
            journal: &self.journal,
            normalizer: &self.normalizer,
            default_timeout: self.config.timeout(),
            max_depth: self.config.max_resolution_depth,
        }
        .resolve(fact, context)
        .await
    }

    /// Resolve with a textual identifier and a JSON context
    ///
    /// # Errors
    /// [`EngineError::InvalidIdentifier`], [`EngineError::UnnormalizableContext`]
    /// for a non-mapping context, otherwise as [`Engine::resolve`].
    pub async fn resolve_json(
        &self,
        fact: &str,
        context: &serde_json::Value,
    ) -> Result<Resolution, EngineError> {
        let fact = FactId::new(fact)?;
        let context = Context::from_json(context)?;
        self.resolve(&fact, context).await
    }

    /// # Errors
    /// [`EngineError::UnknownDefinition`].
    pub fn inspect(&self, fact: &FactId) -> Result<FactReport, EngineError> {
        let definition = self.registry.definition(fact)?;
        let versions = self
            .registry
            .versions(fact)?
            .iter()
            .map(|v| v.version)
            .collect();
        let active = self
            .registry
            .get_active_version(fact)
            .ok()
            .map(|h| h.version.as_ref().clone());
        let cached_instances = active
            .as_ref()
            .map_or(0, |v| self.cache.instances_of(&v.key()).len());
        Ok(FactReport {
            definition,
            versions,
            active,
            dependents: self.registry.active_graph().dependents(fact),
            cached_instances,
        })
    }

    #[must_use]
    pub fn list(&self, namespace: Option<&str>) -> Vec<FactSummary> {
        self.registry.list(namespace)
    }

    #[must_use]
    pub fn search(&self, query: &str) -> Vec<FactSummary> {
        self.registry.search(query)
    }

    /// Graph over active versions
    #[must_use]
    pub fn graph(&self) -> Arc<DependencyGraph> {
        self.registry.active_graph()
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Administrative removal of one version's cached instances
    ///
    /// # Errors
    /// [`EngineError::UnknownVersion`] when the version does not exist.
    pub async fn invalidate_version(&self, fact: &FactId, version: u32) -> Result<usize, EngineError> {
        self.registry.get_version(fact, version)?;
        Ok(self
            .cache
            .invalidate_version(&VersionKey::new(fact.clone(), version))
            .await)
    }
}
