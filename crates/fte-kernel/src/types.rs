//! Core data model: definitions, versions, instances

use chrono::{DateTime, Utc};
use fte_context::{Fingerprint, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EngineError;
use crate::schema::ParameterSchema;

/// Dotted fact identifier, e.g. `spend.total`
///
/// Segments are ASCII identifiers (`[A-Za-z_][A-Za-z0-9_]*`) joined by `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FactId(String);

impl FactId {
    /// Parse and validate an identifier
    ///
    /// # Errors
    /// [`EngineError::InvalidIdentifier`] when a segment is empty or holds
    /// characters other than ASCII letters, digits and `_`.
    pub fn new(id: impl Into<String>) -> Result<Self, EngineError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.split('.').all(|segment| {
                let mut chars = segment.chars();
                chars
                    .next()
                    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            });
        if valid {
            Ok(Self(id))
        } else {
            Err(EngineError::InvalidIdentifier(id))
        }
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix before the last dot, empty for single-segment identifiers
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.0.rsplit_once('.').map_or("", |(ns, _)| ns)
    }

    /// Identifier with dots replaced by underscores, usable as a logic name
    #[must_use]
    pub fn alias(&self) -> String {
        self.0.replace('.', "_")
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FactId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for FactId {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<FactId> for String {
    fn from(id: FactId) -> Self {
        id.0
    }
}

/// Declared shape of a fact's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    #[default]
    Scalar,
    Mapping,
    Sequence,
    Tabular,
    Distribution,
}

/// A fact identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactDefinition {
    pub id: FactId,
    #[serde(default)]
    pub kind: ValueKind,
    #[serde(default)]
    pub description: String,
}

impl FactDefinition {
    pub fn new(id: FactId, kind: ValueKind, description: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            description: description.into(),
        }
    }
}

/// Supported logic kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicKind {
    /// Single side-effect-free expression
    Expression,
    /// Statement body that may call data primitives
    Procedure,
}

impl LogicKind {
    /// Resolve a kind tag, `None` when unsupported
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "expression" => Some(Self::Expression),
            "procedure" => Some(Self::Procedure),
            _ => None,
        }
    }

    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Expression => "expression",
            Self::Procedure => "procedure",
        }
    }
}

/// A declared dependency, optionally deriving a sub-context
///
/// Accepts either a bare identifier or `{ fact, with }` when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DependencyRepr")]
pub struct DependencySpec {
    pub fact: FactId,
    /// Target key → template. `"{{a.b}}"` copies the value at a context
    /// path, other strings with placeholders render as text, anything else
    /// is a literal.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DependencyRepr {
    Plain(FactId),
    Mapped {
        fact: FactId,
        #[serde(default)]
        with: BTreeMap<String, serde_json::Value>,
    },
}

impl From<DependencyRepr> for DependencySpec {
    fn from(repr: DependencyRepr) -> Self {
        match repr {
            DependencyRepr::Plain(fact) => Self::on(fact),
            DependencyRepr::Mapped { fact, with } => Self { fact, with },
        }
    }
}

impl DependencySpec {
    /// Pass-through dependency
    #[must_use]
    pub fn on(fact: FactId) -> Self {
        Self {
            fact,
            with: BTreeMap::new(),
        }
    }

    /// Add one parameter mapping entry
    #[must_use]
    pub fn map(mut self, key: impl Into<String>, template: impl Into<serde_json::Value>) -> Self {
        self.with.insert(key.into(), template.into());
        self
    }
}

/// `name = primitive(args...)`, fetched before the logic runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataBinding {
    pub name: String,
    pub primitive: String,
    /// Argument expressions over the context
    #[serde(default)]
    pub args: Vec<String>,
}

/// Self-test case carried by a version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub context: serde_json::Value,
    pub expected: serde_json::Value,
}

/// One immutable version of a fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactDefinitionVersion {
    pub fact: FactId,
    pub version: u32,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default)]
    pub schema: ParameterSchema,
    /// Kind tag; unknown tags are stored and rejected at execution
    pub logic_kind: String,
    pub logic: String,
    #[serde(default)]
    pub bindings: Vec<DataBinding>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub output_template: Option<String>,
    /// Overrides the configured execution timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl FactDefinitionVersion {
    /// Version with the given logic and no dependencies, schema or bindings
    pub fn new(fact: FactId, version: u32, kind: LogicKind, logic: impl Into<String>) -> Self {
        Self {
            fact,
            version,
            dependencies: Vec::new(),
            schema: ParameterSchema::default(),
            logic_kind: kind.tag().to_string(),
            logic: logic.into(),
            bindings: Vec::new(),
            test_cases: Vec::new(),
            output_template: None,
            timeout_ms: None,
        }
    }

    #[must_use]
    pub fn depends_on(mut self, dependency: DependencySpec) -> Self {
        self.dependencies.push(dependency);
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema: ParameterSchema) -> Self {
        self.schema = schema;
        self
    }

    #[must_use]
    pub fn bind(
        mut self,
        name: impl Into<String>,
        primitive: impl Into<String>,
        args: &[&str],
    ) -> Self {
        self.bindings.push(DataBinding {
            name: name.into(),
            primitive: primitive.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        });
        self
    }

    #[must_use]
    pub fn with_test_case(mut self, context: serde_json::Value, expected: serde_json::Value) -> Self {
        self.test_cases.push(TestCase {
            name: None,
            context,
            expected,
        });
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    #[must_use]
    pub fn key(&self) -> VersionKey {
        VersionKey::new(self.fact.clone(), self.version)
    }

    /// Identifiers of declared dependencies, in order
    pub fn dependency_ids(&self) -> impl Iterator<Item = &FactId> {
        self.dependencies.iter().map(|d| &d.fact)
    }
}

/// `(fact, version number)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionKey {
    pub fact: FactId,
    pub version: u32,
}

impl VersionKey {
    #[must_use]
    pub fn new(fact: FactId, version: u32) -> Self {
        Self { fact, version }
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.fact, self.version)
    }
}

/// Cache identity of an instance
///
/// `lineage` digests the active version of every fact in the dependency
/// closure, so activating a new dependency version yields a new key for
/// every dependent while older instances stay addressable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub version: VersionKey,
    /// Normalized context
    pub fingerprint: Fingerprint,
    pub lineage: Fingerprint,
}

impl InstanceKey {
    #[must_use]
    pub fn new(version: VersionKey, fingerprint: Fingerprint, lineage: Fingerprint) -> Self {
        Self {
            version,
            fingerprint,
            lineage,
        }
    }
}

/// Immutable computed value of one version over one context
#[derive(Debug, Clone, PartialEq)]
pub struct FactInstance {
    pub id: Uuid,
    pub version: VersionKey,
    pub fingerprint: Fingerprint,
    /// Active dependency versions the value was computed against
    pub lineage: Fingerprint,
    pub value: Value,
    pub computed_at: DateTime<Utc>,
    /// Instances of the dependencies used, in declared order
    pub dependencies: Vec<Arc<FactInstance>>,
}

impl FactInstance {
    pub fn new(key: InstanceKey, value: Value, dependencies: Vec<Arc<FactInstance>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: key.version,
            fingerprint: key.fingerprint,
            lineage: key.lineage,
            value,
            computed_at: Utc::now(),
            dependencies,
        }
    }

    #[must_use]
    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.version.clone(), self.fingerprint, self.lineage)
    }

    /// Serializable provenance tree rooted at this instance
    #[must_use]
    pub fn provenance(&self) -> Provenance {
        Provenance {
            instance: self.id,
            fact: self.version.fact.clone(),
            version: self.version.version,
            fingerprint: self.fingerprint,
            computed_at: self.computed_at,
            dependencies: self.dependencies.iter().map(|d| d.provenance()).collect(),
        }
    }
}

/// Chain of instances that produced a value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub instance: Uuid,
    pub fact: FactId,
    pub version: u32,
    pub fingerprint: Fingerprint,
    pub computed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Provenance>,
}

impl Provenance {
    /// Number of instances in the tree, including the root
    #[must_use]
    pub fn instance_count(&self) -> usize {
        1 + self
            .dependencies
            .iter()
            .map(Provenance::instance_count)
            .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fact_id_validation() {
        assert!(FactId::new("spend.total").is_ok());
        assert!(FactId::new("_private.x1").is_ok());
        assert!(FactId::new("").is_err());
        assert!(FactId::new("spend..total").is_err());
        assert!(FactId::new("spend.1total").is_err());
        assert!(FactId::new("spend total").is_err());
    }

    #[test]
    fn namespace_and_alias() {
        let id = FactId::new("finance.spend.total").unwrap();
        assert_eq!(id.namespace(), "finance.spend");
        assert_eq!(id.alias(), "finance_spend_total");
        assert_eq!(FactId::new("root").unwrap().namespace(), "");
    }

    #[test]
    fn dependency_accepts_both_shapes() {
        let plain: DependencySpec = serde_json::from_str("\"spend.total\"").unwrap();
        assert!(plain.with.is_empty());

        let mapped: DependencySpec = serde_json::from_value(serde_json::json!({
            "fact": "spend.total",
            "with": {"accountId": "{{account}}"}
        }))
        .unwrap();
        assert_eq!(mapped.fact.as_str(), "spend.total");
        assert_eq!(mapped.with.len(), 1);
    }

    #[test]
    fn logic_kind_tags() {
        assert_eq!(LogicKind::from_tag("expression"), Some(LogicKind::Expression));
        assert_eq!(LogicKind::from_tag("python"), None);
        assert_eq!(LogicKind::Procedure.tag(), "procedure");
    }

    #[test]
    fn version_key_display() {
        let key = VersionKey::new(FactId::new("a.b").unwrap(), 3);
        assert_eq!(key.to_string(), "a.b@v3");
    }
}
