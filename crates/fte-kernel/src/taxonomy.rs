//! Taxonomy documents
//!
//! A YAML document declares definitions, their versions and which version
//! to activate. Loading goes through the public engine API, so every
//! structural check applies:
//!
//! ```yaml
//! facts:
//!   - id: spend.total
//!     kind: scalar
//!     description: Total spend for an account over a date range
//!     activate: 1
//!     versions:
//!       - version: 1
//!         logic: sum(pluck(transactions, "amount"))
//!         bindings:
//!           - { name: transactions, primitive: transactions, args: [accountId, range] }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::engine::Engine;
use crate::error::TaxonomyError;
use crate::graph::DependencyGraph;
use crate::schema::ParameterSchema;
use crate::types::{
    DataBinding, DependencySpec, FactDefinition, FactDefinitionVersion, FactId, TestCase,
    ValueKind, VersionKey,
};

/// Whole document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaxonomyDocument {
    #[serde(default)]
    pub facts: Vec<FactDocument>,
}

/// One definition with its versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FactDocument {
    pub id: FactId,
    #[serde(default)]
    pub kind: ValueKind,
    #[serde(default)]
    pub description: String,
    /// Version to activate; the highest declared version when omitted
    #[serde(default)]
    pub activate: Option<u32>,
    #[serde(default)]
    pub versions: Vec<VersionDocument>,
}

/// A version without its owning identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionDocument {
    pub version: u32,
    #[serde(default = "default_logic_kind")]
    pub logic_kind: String,
    pub logic: String,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default)]
    pub schema: ParameterSchema,
    #[serde(default)]
    pub bindings: Vec<DataBinding>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub output_template: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_logic_kind() -> String {
    "expression".to_string()
}

impl VersionDocument {
    fn into_version(self, fact: FactId) -> FactDefinitionVersion {
        FactDefinitionVersion {
            fact,
            version: self.version,
            dependencies: self.dependencies,
            schema: self.schema,
            logic_kind: self.logic_kind,
            logic: self.logic,
            bindings: self.bindings,
            test_cases: self.test_cases,
            output_template: self.output_template,
            timeout_ms: self.timeout_ms,
        }
    }
}

impl TaxonomyDocument {
    /// # Errors
    /// [`TaxonomyError::Parse`].
    pub fn parse(text: &str) -> Result<Self, TaxonomyError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// # Errors
    /// I/O and parse errors.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TaxonomyError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }
}

/// What a load changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub definitions: usize,
    pub versions: usize,
    /// In activation order
    pub activated: Vec<VersionKey>,
}

/// Apply a document: register, add versions, then activate in dependency
/// order
///
/// # Errors
/// The first registry rejection, or [`TaxonomyError::UndeclaredActivation`].
/// Steps already applied stay applied.
pub fn load_taxonomy(engine: &Engine, document: TaxonomyDocument) -> Result<LoadReport, TaxonomyError> {
    let mut report = LoadReport::default();
    let mut targets: BTreeMap<FactId, u32> = BTreeMap::new();

    for fact in &document.facts {
        let target = match fact.activate {
            Some(v) if fact.versions.iter().any(|d| d.version == v) => Some(v),
            Some(version) => {
                return Err(TaxonomyError::UndeclaredActivation {
                    fact: fact.id.clone(),
                    version,
                })
            }
            None => fact.versions.iter().map(|d| d.version).max(),
        };
        if let Some(v) = target {
            targets.insert(fact.id.clone(), v);
        }
    }

    for fact in &document.facts {
        engine.register(FactDefinition::new(
            fact.id.clone(),
            fact.kind,
            fact.description.clone(),
        ))?;
        report.definitions += 1;
    }
    for fact in document.facts {
        for version in fact.versions {
            engine.add_version(version.into_version(fact.id.clone()))?;
            report.versions += 1;
        }
    }

    let registry = engine.registry();
    let mut prospective: BTreeMap<FactId, Arc<FactDefinitionVersion>> = registry
        .active_versions()
        .into_iter()
        .map(|h| (h.version.fact.clone(), h.version))
        .collect();
    for (fact, &version) in &targets {
        prospective.insert(fact.clone(), registry.get_version(fact, version)?.version);
    }
    let graph = DependencyGraph::build(prospective.values().map(|v| v.as_ref()))?;
    for fact in graph.order() {
        if let Some(&version) = targets.get(&fact) {
            engine.activate(&fact, version)?;
            report.activated.push(VersionKey::new(fact, version));
        }
    }
    info!(
        definitions = report.definitions,
        versions = report.versions,
        activated = report.activated.len(),
        "loaded taxonomy"
    );
    Ok(report)
}

/// Parse and apply a document file
///
/// # Errors
/// See [`TaxonomyDocument::from_path`] and [`load_taxonomy`].
pub fn load_taxonomy_file(engine: &Engine, path: impl AsRef<Path>) -> Result<LoadReport, TaxonomyError> {
    load_taxonomy(engine, TaxonomyDocument::from_path(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::store::EmptyDataStore;

    const DOC: &str = r#"
facts:
  - id: ratio
    description: a over b
    versions:
      - version: 1
        logic: a / b
        dependencies: [a, b]
  - id: a
    versions:
      - version: 1
        logic: "10"
      - version: 2
        logic: "12"
    activate: 1
  - id: b
    versions:
      - version: 1
        logic: n
        schema:
          type: object
          properties:
            n: { type: integer, minimum: 1 }
"#;

    fn id(s: &str) -> FactId {
        FactId::new(s).unwrap()
    }

    #[test]
    fn activates_dependencies_first() {
        let engine = Engine::with_store(Arc::new(EmptyDataStore));
        let report = load_taxonomy(&engine, TaxonomyDocument::parse(DOC).unwrap()).unwrap();
        assert_eq!(report.definitions, 3);
        assert_eq!(report.versions, 4);
        let order: Vec<&str> = report.activated.iter().map(|k| k.fact.as_str()).collect();
        assert_eq!(order.last(), Some(&"ratio"));
        assert_eq!(engine.registry().active_version_number(&id("a")), Some(1));
        assert_eq!(engine.registry().active_version_number(&id("b")), Some(1));
    }

    #[test]
    fn undeclared_activation_is_rejected() {
        let doc = TaxonomyDocument::parse("facts:\n  - id: a\n    activate: 3\n    versions:\n      - {version: 1, logic: \"1\"}\n").unwrap();
        let engine = Engine::with_store(Arc::new(EmptyDataStore));
        assert!(matches!(
            load_taxonomy(&engine, doc),
            Err(TaxonomyError::UndeclaredActivation { version: 3, .. })
        ));
    }

    #[test]
    fn cyclic_document_is_rejected() {
        let doc = TaxonomyDocument::parse(
            "facts:\n  - id: a\n    versions: [{version: 1, logic: b, dependencies: [b]}]\n  - id: b\n    versions: [{version: 1, logic: a, dependencies: [a]}]\n",
        )
        .unwrap();
        let engine = Engine::with_store(Arc::new(EmptyDataStore));
        assert!(matches!(
            load_taxonomy(&engine, doc),
            Err(TaxonomyError::Engine(EngineError::CycleDetected(_)))
        ));
        assert_eq!(engine.graph().node_count(), 0);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            TaxonomyDocument::parse("facts:\n  - id: a\n    colour: red\n"),
            Err(TaxonomyError::Parse(_))
        ));
    }
}
