//! Fact registry
//!
//! Definitions and their append-only version logs, plus one active pointer
//! per definition. Every write that changes the active set re-runs the graph
//! builder over the would-be graph and commits only when it succeeds.

use fte_context::Fingerprint;
use fte_logic::{parse_expression, parse_procedure};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::graph::DependencyGraph;
use crate::schema::CompiledSchema;
use crate::types::{FactDefinition, FactDefinitionVersion, FactId, LogicKind, ValueKind};

/// A stored version with its compiled schema
#[derive(Debug, Clone)]
pub struct VersionHandle {
    pub version: Arc<FactDefinitionVersion>,
    pub schema: Arc<CompiledSchema>,
}

#[derive(Debug)]
struct DefinitionEntry {
    definition: FactDefinition,
    versions: BTreeMap<u32, VersionHandle>,
    active: Option<u32>,
}

impl DefinitionEntry {
    fn active_handle(&self) -> Option<&VersionHandle> {
        self.active.and_then(|v| self.versions.get(&v))
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    definitions: BTreeMap<FactId, DefinitionEntry>,
    graph: Arc<DependencyGraph>,
}

impl RegistryState {
    fn entry(&self, fact: &FactId) -> Result<&DefinitionEntry, EngineError> {
        self.definitions
            .get(fact)
            .ok_or_else(|| EngineError::UnknownDefinition(fact.clone()))
    }

    /// Graph over the active set with `fact`'s pointer replaced by `active`
    fn prospective_graph(
        &self,
        fact: &FactId,
        active: Option<&FactDefinitionVersion>,
    ) -> Result<DependencyGraph, EngineError> {
        let others = self
            .definitions
            .iter()
            .filter(|(id, _)| *id != fact)
            .filter_map(|(_, e)| e.active_handle())
            .map(|h| h.version.as_ref());
        DependencyGraph::build(others.chain(active))
    }
}

/// One row of `list` and `search`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactSummary {
    pub id: FactId,
    pub kind: ValueKind,
    pub description: String,
    pub active_version: Option<u32>,
    pub latest_version: Option<u32>,
}

/// Process-scoped fact registry
#[derive(Debug, Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new definition
    ///
    /// # Errors
    /// [`EngineError::DuplicateDefinition`] if the identifier was used before.
    pub fn register(&self, definition: FactDefinition) -> Result<(), EngineError> {
        let mut state = self.state.write();
        if state.definitions.contains_key(&definition.id) {
            return Err(EngineError::DuplicateDefinition(definition.id));
        }
        info!(fact = %definition.id, kind = ?definition.kind, "registered definition");
        state.definitions.insert(
            definition.id.clone(),
            DefinitionEntry {
                definition,
                versions: BTreeMap::new(),
                active: None,
            },
        );
        Ok(())
    }

    /// Append a version; it is not active until [`Registry::activate`]
    ///
    /// # Errors
    /// Unknown definition, duplicate or out-of-order version number,
    /// unregistered dependency, self-dependency, invalid schema or logic
    /// that does not parse.
    pub fn add_version(&self, version: FactDefinitionVersion) -> Result<(), EngineError> {
        let mut state = self.state.write();
        let entry = state.entry(&version.fact)?;
        if entry.versions.contains_key(&version.version) {
            return Err(EngineError::DuplicateVersion {
                fact: version.fact,
                version: version.version,
            });
        }
        if let Some((&latest, _)) = entry.versions.last_key_value() {
            if version.version < latest {
                return Err(EngineError::VersionOutOfOrder {
                    fact: version.fact,
                    version: version.version,
                    latest,
                });
            }
        }
        for dep in version.dependency_ids() {
            if *dep == version.fact {
                return Err(EngineError::cycle(vec![dep.clone(), dep.clone()]));
            }
            if !state.definitions.contains_key(dep) {
                return Err(EngineError::UnknownDependency {
                    fact: version.fact.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        let schema = version.schema.compile()?;
        check_logic(&version)?;

        info!(
            fact = %version.fact,
            version = version.version,
            dependencies = version.dependencies.len(),
            "added version"
        );
        let number = version.version;
        let fact = version.fact.clone();
        let handle = VersionHandle {
            version: Arc::new(version),
            schema: Arc::new(schema),
        };
        if let Some(entry) = state.definitions.get_mut(&fact) {
            entry.versions.insert(number, handle);
        }
        Ok(())
    }

    /// Point the definition at `version`
    ///
    /// # Errors
    /// [`EngineError::CycleDetected`] or [`EngineError::UnknownDependency`]
    /// when the resulting graph is invalid; the previous graph stays in place.
    pub fn activate(&self, fact: &FactId, version: u32) -> Result<(), EngineError> {
        let mut state = self.state.write();
        let entry = state.entry(fact)?;
        let handle = entry
            .versions
            .get(&version)
            .ok_or_else(|| EngineError::UnknownVersion {
                fact: fact.clone(),
                version,
            })?
            .clone();
        if entry.active == Some(version) {
            return Ok(());
        }
        let graph = match state.prospective_graph(fact, Some(&handle.version)) {
            Ok(graph) => graph,
            Err(e) => {
                warn!(fact = %fact, version, error = %e, "activation rejected");
                return Err(e);
            }
        };
        state.graph = Arc::new(graph);
        if let Some(entry) = state.definitions.get_mut(fact) {
            entry.active = Some(version);
        }
        info!(fact = %fact, version, "activated version");
        Ok(())
    }

    /// Clear the active pointer; cached instances are kept
    ///
    /// # Errors
    /// [`EngineError::UnknownFact`] when nothing is active and
    /// [`EngineError::ActiveDependents`] while active facts depend on it.
    pub fn deactivate(&self, fact: &FactId) -> Result<(), EngineError> {
        let mut state = self.state.write();
        if state.entry(fact)?.active.is_none() {
            return Err(EngineError::UnknownFact(fact.clone()));
        }
        let dependents = state.graph.dependents(fact);
        if !dependents.is_empty() {
            warn!(fact = %fact, dependents = dependents.len(), "deactivation rejected");
            return Err(EngineError::ActiveDependents {
                fact: fact.clone(),
                dependents,
            });
        }
        let graph = state.prospective_graph(fact, None)?;
        state.graph = Arc::new(graph);
        if let Some(entry) = state.definitions.get_mut(fact) {
            entry.active = None;
        }
        info!(fact = %fact, "deactivated");
        Ok(())
    }

    /// Version used for new resolutions
    ///
    /// # Errors
    /// [`EngineError::UnknownFact`] when the fact is unregistered or has no
    /// active version.
    pub fn get_active_version(&self, fact: &FactId) -> Result<VersionHandle, EngineError> {
        self.state
            .read()
            .definitions
            .get(fact)
            .and_then(DefinitionEntry::active_handle)
            .cloned()
            .ok_or_else(|| EngineError::UnknownFact(fact.clone()))
    }

    /// Active version of `fact` and the lineage digest of its dependency
    /// closure, read under one lock
    ///
    /// The lineage covers the active version of every fact reachable from
    /// `fact`, itself included, so it changes whenever any of them is
    /// re-pointed.
    ///
    /// # Errors
    /// [`EngineError::UnknownFact`] when the fact has no active version.
    pub fn active_with_lineage(&self, fact: &FactId) -> Result<(VersionHandle, Fingerprint), EngineError> {
        let state = self.state.read();
        let handle = state
            .definitions
            .get(fact)
            .and_then(DefinitionEntry::active_handle)
            .cloned()
            .ok_or_else(|| EngineError::UnknownFact(fact.clone()))?;
        let mut lines: Vec<String> = state
            .graph
            .topo_order(fact)?
            .into_iter()
            .map(|id| {
                let version = state.definitions.get(&id).and_then(|e| e.active).unwrap_or(0);
                format!("{id}@{version}\n")
            })
            .collect();
        lines.sort();
        Ok((handle, Fingerprint::compute(lines.concat().as_bytes())))
    }

    /// A specific version, active or not
    ///
    /// # Errors
    /// [`EngineError::UnknownDefinition`] or [`EngineError::UnknownVersion`].
    pub fn get_version(&self, fact: &FactId, version: u32) -> Result<VersionHandle, EngineError> {
        let state = self.state.read();
        state
            .entry(fact)?
            .versions
            .get(&version)
            .cloned()
            .ok_or_else(|| EngineError::UnknownVersion {
                fact: fact.clone(),
                version,
            })
    }

    /// # Errors
    /// [`EngineError::UnknownDefinition`].
    pub fn definition(&self, fact: &FactId) -> Result<FactDefinition, EngineError> {
        Ok(self.state.read().entry(fact)?.definition.clone())
    }

    /// Every version in ascending order
    ///
    /// # Errors
    /// [`EngineError::UnknownDefinition`].
    pub fn versions(&self, fact: &FactId) -> Result<Vec<Arc<FactDefinitionVersion>>, EngineError> {
        Ok(self
            .state
            .read()
            .entry(fact)?
            .versions
            .values()
            .map(|h| Arc::clone(&h.version))
            .collect())
    }

    #[must_use]
    pub fn active_version_number(&self, fact: &FactId) -> Option<u32> {
        self.state.read().definitions.get(fact).and_then(|e| e.active)
    }

    /// Active versions in identifier order
    #[must_use]
    pub fn active_versions(&self) -> Vec<VersionHandle> {
        self.state
            .read()
            .definitions
            .values()
            .filter_map(DefinitionEntry::active_handle)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn contains(&self, fact: &FactId) -> bool {
        self.state.read().definitions.contains_key(fact)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().definitions.is_empty()
    }

    /// Definitions whose namespace equals or falls under `namespace`
    #[must_use]
    pub fn list(&self, namespace: Option<&str>) -> Vec<FactSummary> {
        self.summaries(|e| {
            namespace.map_or(true, |ns| {
                let own = e.definition.id.namespace();
                own == ns || own.strip_prefix(ns).is_some_and(|rest| rest.starts_with('.'))
            })
        })
    }

    /// Case-insensitive substring search over identifiers and descriptions
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<FactSummary> {
        let query = query.to_lowercase();
        self.summaries(|e| {
            e.definition.id.as_str().to_lowercase().contains(&query)
                || e.definition.description.to_lowercase().contains(&query)
        })
    }

    fn summaries(&self, keep: impl Fn(&DefinitionEntry) -> bool) -> Vec<FactSummary> {
        self.state
            .read()
            .definitions
            .values()
            .filter(|e| keep(e))
            .map(|e| FactSummary {
                id: e.definition.id.clone(),
                kind: e.definition.kind,
                description: e.definition.description.clone(),
                active_version: e.active,
                latest_version: e.versions.keys().next_back().copied(),
            })
            .collect()
    }

    /// Snapshot of the graph over active versions
    #[must_use]
    pub fn active_graph(&self) -> Arc<DependencyGraph> {
        Arc::clone(&self.state.read().graph)
    }
}

/// Parse the body and binding arguments of known logic kinds
fn check_logic(version: &FactDefinitionVersion) -> Result<(), EngineError> {
    let malformed = |message: String| EngineError::MalformedLogic {
        fact: version.fact.clone(),
        version: version.version,
        message,
    };
    match LogicKind::from_tag(&version.logic_kind) {
        Some(LogicKind::Expression) => {
            parse_expression(&version.logic).map_err(|e| malformed(e.to_string()))?;
        }
        Some(LogicKind::Procedure) => {
            parse_procedure(&version.logic).map_err(|e| malformed(e.to_string()))?;
        }
        None => return Ok(()),
    }
    for binding in &version.bindings {
        for arg in &binding.args {
            parse_expression(arg)
                .map_err(|e| malformed(format!("binding '{}': {e}", binding.name)))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ParameterSchema;
    use crate::types::DependencySpec;

    fn id(s: &str) -> FactId {
        FactId::new(s).unwrap()
    }

    fn expr(fact: &str, version: u32, logic: &str) -> FactDefinitionVersion {
        FactDefinitionVersion::new(id(fact), version, LogicKind::Expression, logic)
    }

    fn registry(facts: &[&str]) -> Registry {
        let r = Registry::new();
        for f in facts {
            r.register(FactDefinition::new(id(f), ValueKind::Scalar, format!("{f} fact")))
                .unwrap();
        }
        r
    }

    #[test]
    fn duplicate_definition_rejected() {
        let r = registry(&["a"]);
        assert_eq!(
            r.register(FactDefinition::new(id("a"), ValueKind::Scalar, "")),
            Err(EngineError::DuplicateDefinition(id("a")))
        );
    }

    #[test]
    fn version_append_checks() {
        let r = registry(&["a"]);
        assert_eq!(
            r.add_version(expr("missing", 1, "1")),
            Err(EngineError::UnknownDefinition(id("missing")))
        );
        r.add_version(expr("a", 2, "1")).unwrap();
        assert!(matches!(
            r.add_version(expr("a", 2, "1")),
            Err(EngineError::DuplicateVersion { version: 2, .. })
        ));
        assert!(matches!(
            r.add_version(expr("a", 1, "1")),
            Err(EngineError::VersionOutOfOrder { version: 1, latest: 2, .. })
        ));
        assert!(matches!(
            r.add_version(expr("a", 3, "1 +")),
            Err(EngineError::MalformedLogic { version: 3, .. })
        ));
        assert!(matches!(
            r.add_version(expr("a", 3, "1").depends_on(DependencySpec::on(id("a")))),
            Err(EngineError::CycleDetected(_))
        ));
        assert!(matches!(
            r.add_version(expr("a", 3, "1").depends_on(DependencySpec::on(id("nope")))),
            Err(EngineError::UnknownDependency { .. })
        ));
        let bad_schema = ParameterSchema::new(serde_json::json!({"type": 12}));
        assert!(matches!(
            r.add_version(expr("a", 3, "1").with_schema(bad_schema)),
            Err(EngineError::InvalidSchema(_))
        ));
        assert_eq!(r.versions(&id("a")).unwrap().len(), 1);
    }

    #[test]
    fn lineage_follows_dependency_activation() {
        let r = registry(&["rate", "fee", "other"]);
        r.add_version(expr("rate", 1, "10")).unwrap();
        r.add_version(expr("rate", 2, "50")).unwrap();
        r.add_version(expr("fee", 1, "rate * 2").depends_on(DependencySpec::on(id("rate"))))
            .unwrap();
        r.add_version(expr("other", 1, "1")).unwrap();
        for (f, v) in [("rate", 1), ("fee", 1), ("other", 1)] {
            r.activate(&id(f), v).unwrap();
        }

        let (handle, before) = r.active_with_lineage(&id("fee")).unwrap();
        assert_eq!(handle.version.version, 1);
        let (_, other_before) = r.active_with_lineage(&id("other")).unwrap();

        r.activate(&id("rate"), 2).unwrap();
        let (handle, after) = r.active_with_lineage(&id("fee")).unwrap();
        assert_eq!(handle.version.version, 1);
        assert_ne!(before, after);
        assert_eq!(r.active_with_lineage(&id("other")).unwrap().1, other_before);

        r.activate(&id("rate"), 1).unwrap();
        assert_eq!(r.active_with_lineage(&id("fee")).unwrap().1, before);
        assert!(matches!(
            r.active_with_lineage(&id("missing")),
            Err(EngineError::UnknownFact(_))
        ));
    }

    #[test]
    fn unknown_kind_is_stored() {
        let r = registry(&["a"]);
        let mut v = expr("a", 1, "import os");
        v.logic_kind = "python".into();
        r.add_version(v).unwrap();
        r.activate(&id("a"), 1).unwrap();
        assert_eq!(r.get_active_version(&id("a")).unwrap().version.logic_kind, "python");
    }

    #[test]
    fn activation_requires_active_dependencies() {
        let r = registry(&["a", "b"]);
        r.add_version(expr("a", 1, "b + 1").depends_on(DependencySpec::on(id("b"))))
            .unwrap();
        r.add_version(expr("b", 1, "1")).unwrap();
        assert!(matches!(
            r.activate(&id("a"), 1),
            Err(EngineError::UnknownDependency { .. })
        ));
        r.activate(&id("b"), 1).unwrap();
        r.activate(&id("a"), 1).unwrap();
        assert_eq!(r.active_graph().dependents(&id("b")), vec![id("a")]);
    }

    #[test]
    fn cyclic_activation_keeps_previous_graph() {
        let r = registry(&["a", "b"]);
        r.add_version(expr("a", 1, "1")).unwrap();
        r.add_version(expr("b", 1, "a").depends_on(DependencySpec::on(id("a"))))
            .unwrap();
        r.activate(&id("a"), 1).unwrap();
        r.activate(&id("b"), 1).unwrap();
        r.add_version(expr("a", 2, "b").depends_on(DependencySpec::on(id("b"))))
            .unwrap();

        let before = r.active_graph();
        match r.activate(&id("a"), 2) {
            Err(EngineError::CycleDetected(path)) => {
                assert_eq!(path.0, vec![id("a"), id("b"), id("a")]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(Arc::ptr_eq(&before, &r.active_graph()));
        assert_eq!(r.active_version_number(&id("a")), Some(1));
    }

    #[test]
    fn deactivation_blocked_by_dependents() {
        let r = registry(&["a", "b"]);
        r.add_version(expr("a", 1, "1")).unwrap();
        r.add_version(expr("b", 1, "a").depends_on(DependencySpec::on(id("a"))))
            .unwrap();
        r.activate(&id("a"), 1).unwrap();
        r.activate(&id("b"), 1).unwrap();
        assert!(matches!(
            r.deactivate(&id("a")),
            Err(EngineError::ActiveDependents { .. })
        ));
        r.deactivate(&id("b")).unwrap();
        r.deactivate(&id("a")).unwrap();
        assert_eq!(r.get_active_version(&id("a")).unwrap_err(), EngineError::UnknownFact(id("a")));
        assert_eq!(r.active_graph().node_count(), 0);
    }

    #[test]
    fn list_and_search() {
        let r = registry(&["spend.total", "spend.by_category", "income.total", "spending_ratio"]);
        let ids = |rows: Vec<FactSummary>| rows.into_iter().map(|s| s.id).collect::<Vec<_>>();
        assert_eq!(
            ids(r.list(Some("spend"))),
            vec![id("spend.by_category"), id("spend.total")]
        );
        assert_eq!(r.list(None).len(), 4);
        assert_eq!(
            ids(r.search("TOTAL")),
            vec![id("income.total"), id("spend.total")]
        );
        assert_eq!(ids(r.search("ratio fact")), vec![id("spending_ratio")]);
    }

    #[test]
    fn namespace_listing_includes_nested() {
        let r = registry(&["finance.spend.total", "finance.rate", "financex.other"]);
        let rows = r.list(Some("finance"));
        assert_eq!(rows.len(), 2);
    }
}
