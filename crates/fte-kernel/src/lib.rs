//! Fact Taxonomy Engine kernel (fte-kernel)
//!
//! Resolves named, versioned facts over a context:
//! 1. **Authoring**: definitions and versions are registered, and activation
//!    proves the dependency graph acyclic before it takes effect
//! 2. **Resolution**: the context is fingerprinted, validated against the
//!    version's schema, dependencies are resolved, and the logic runs in a
//!    sandbox; the result is memoized first-writer-wins
//!
//! # Quick Start
//!
//! ```rust
//! use fte_kernel::prelude::*;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let engine = Engine::with_store(Arc::new(EmptyDataStore));
//! let fact = FactId::new("invoice.total").unwrap();
//! engine.register(FactDefinition::new(fact.clone(), ValueKind::Scalar, "")).unwrap();
//! engine
//!     .add_version(FactDefinitionVersion::new(fact.clone(), 1, LogicKind::Expression, "qty * price"))
//!     .unwrap();
//! engine.activate(&fact, 1).unwrap();
//!
//! let ctx = Context::new().with("qty", 3_i64).with("price", 7_i64);
//! let resolved = engine.resolve(&fact, ctx).await.unwrap();
//! assert_eq!(resolved.value(), &Value::Int(21));
//! # });
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod journal;
pub mod registry;
pub mod resolver;
pub mod sandbox;
pub mod schema;
pub mod selftest;
pub mod store;
pub mod taxonomy;
pub mod types;

pub use error::*;
pub use types::*;

/// Common imports
pub mod prelude {
    pub use crate::cache::{CacheOutcome, CacheStats, InstanceCache};
    pub use crate::config::EngineConfig;
    pub use crate::engine::{Engine, FactReport};
    pub use crate::error::{ConfigError, EngineError, TaxonomyError};
    pub use crate::graph::DependencyGraph;
    pub use crate::journal::{Journal, JournalEntry};
    pub use crate::registry::{FactSummary, Registry};
    pub use crate::resolver::{Resolution, ResolutionState};
    pub use crate::sandbox::{IsolationLevel, SandboxLimits};
    pub use crate::schema::{CompiledSchema, ParameterSchema};
    pub use crate::selftest::{run_self_tests, SelfTestReport};
    pub use crate::store::{DataStore, EmptyDataStore, InMemoryDataStore, TransactionRecord};
    pub use crate::taxonomy::{load_taxonomy, load_taxonomy_file, TaxonomyDocument};
    pub use crate::types::{
        DependencySpec, FactDefinition, FactDefinitionVersion, FactId, FactInstance, LogicKind,
        InstanceKey, Provenance, ValueKind, VersionKey,
    };
    pub use fte_context::{Context, Fingerprint, Value};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if running with strict debugging enabled
#[must_use]
pub const fn strict_debug() -> bool {
    cfg!(feature = "strict-debug")
}
