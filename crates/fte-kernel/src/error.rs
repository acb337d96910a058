//! Error types for the fact engine
//!
//! Errors fall into two classes:
//! - structural: rejected when a taxonomy is authored (registration,
//!   version append, activation);
//! - per-request: returned to the caller of `resolve`, never retried and
//!   never cached.

use fte_context::NormalizeError;
use std::fmt;

use crate::types::FactId;

/// Cycle path with the first node repeated at the end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclePath(pub Vec<FactId>);

impl fmt::Display for CyclePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

/// Main engine error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Identifier is not a valid dotted name
    #[error("invalid fact identifier '{0}'")]
    InvalidIdentifier(String),

    /// No definition registered under this identifier
    #[error("unknown definition: {0}")]
    UnknownDefinition(FactId),

    /// Definition exists but has no active version
    #[error("no active version for fact {0}")]
    UnknownFact(FactId),

    /// Version number not present for the definition
    #[error("unknown version {fact}@v{version}")]
    UnknownVersion { fact: FactId, version: u32 },

    /// Dependency is unregistered or has no active version
    #[error("{fact} depends on unknown fact {dependency}")]
    UnknownDependency { fact: FactId, dependency: FactId },

    /// Identifier already registered
    #[error("definition {0} already registered")]
    DuplicateDefinition(FactId),

    /// Version number already present
    #[error("version {fact}@v{version} already exists")]
    DuplicateVersion { fact: FactId, version: u32 },

    /// Version number lower than the latest
    #[error("version {fact}@v{version} is older than latest v{latest}")]
    VersionOutOfOrder {
        fact: FactId,
        version: u32,
        latest: u32,
    },

    /// Dependency graph would contain a cycle
    #[error("dependency cycle: {0}")]
    CycleDetected(CyclePath),

    /// Context failed the parameter schema
    #[error("schema violation at '{field}': {reason}")]
    SchemaViolation { field: String, reason: String },

    /// Parameter schema itself is malformed
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Logic body or binding argument does not parse
    #[error("malformed logic in {fact}@v{version}: {message}")]
    MalformedLogic {
        fact: FactId,
        version: u32,
        message: String,
    },

    /// Deactivation blocked by active dependents
    #[error("{fact} has active dependents: {}", join(.dependents))]
    ActiveDependents {
        fact: FactId,
        dependents: Vec<FactId>,
    },

    /// Wall-clock budget exceeded
    #[error("execution of {fact} timed out after {timeout_ms}ms")]
    ExecutionTimeout { fact: FactId, timeout_ms: u64 },

    /// Logic raised an error
    #[error("execution of {fact} failed: {cause}")]
    ExecutionFailed { fact: FactId, cause: String },

    /// Kind tag has no executor
    #[error("unsupported logic kind '{0}'")]
    UnsupportedLogicKind(String),

    /// Context could not be canonicalized
    #[error("unnormalizable context: {0}")]
    UnnormalizableContext(#[from] NormalizeError),

    /// Resolution walked deeper than the configured ceiling
    #[error("resolution depth exceeded limit of {limit}")]
    ResolutionDepthExceeded { limit: usize },

    /// Worker could not be started or broke protocol
    #[error("isolation failure: {0}")]
    Isolation(String),
}

fn join(ids: &[FactId]) -> String {
    ids.iter().map(FactId::as_str).collect::<Vec<_>>().join(", ")
}

impl EngineError {
    /// Create a cycle error from a path
    pub fn cycle(path: Vec<FactId>) -> Self {
        Self::CycleDetected(CyclePath(path))
    }

    /// Create a schema violation
    pub fn schema_violation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an execution failure
    pub fn execution_failed(fact: &FactId, cause: impl fmt::Display) -> Self {
        Self::ExecutionFailed {
            fact: fact.clone(),
            cause: cause.to_string(),
        }
    }

    /// Check if error is rejected at authoring time
    #[inline]
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifier(_)
                | Self::UnknownDefinition(_)
                | Self::UnknownVersion { .. }
                | Self::UnknownDependency { .. }
                | Self::DuplicateDefinition(_)
                | Self::DuplicateVersion { .. }
                | Self::VersionOutOfOrder { .. }
                | Self::CycleDetected(_)
                | Self::InvalidSchema(_)
                | Self::MalformedLogic { .. }
                | Self::ActiveDependents { .. }
        )
    }

    /// Check if error is returned from a single resolution
    #[inline]
    #[must_use]
    pub fn is_per_request(&self) -> bool {
        !self.is_structural()
    }

    /// Stable snake-case name, used in the journal and CLI output
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier(_) => "invalid_identifier",
            Self::UnknownDefinition(_) => "unknown_definition",
            Self::UnknownFact(_) => "unknown_fact",
            Self::UnknownVersion { .. } => "unknown_version",
            Self::UnknownDependency { .. } => "unknown_dependency",
            Self::DuplicateDefinition(_) => "duplicate_definition",
            Self::DuplicateVersion { .. } => "duplicate_version",
            Self::VersionOutOfOrder { .. } => "version_out_of_order",
            Self::CycleDetected(_) => "cycle_detected",
            Self::SchemaViolation { .. } => "schema_violation",
            Self::InvalidSchema(_) => "invalid_schema",
            Self::MalformedLogic { .. } => "malformed_logic",
            Self::ActiveDependents { .. } => "active_dependents",
            Self::ExecutionTimeout { .. } => "execution_timeout",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::UnsupportedLogicKind(_) => "unsupported_logic_kind",
            Self::UnnormalizableContext(_) => "unnormalizable_context",
            Self::ResolutionDepthExceeded { .. } => "resolution_depth_exceeded",
            Self::Isolation(_) => "isolation",
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML did not parse
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Taxonomy document errors
#[derive(Debug, thiserror::Error)]
pub enum TaxonomyError {
    /// File could not be read
    #[error("cannot read taxonomy: {0}")]
    Io(#[from] std::io::Error),

    /// YAML did not parse
    #[error("invalid taxonomy document: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Document refers to a version it does not declare
    #[error("{fact} activates v{version}, which the document does not declare")]
    UndeclaredActivation { fact: FactId, version: u32 },

    /// A registry operation rejected the document
    #[error(transparent)]
    Engine(#[from] EngineError),
}
