//! Version self-tests
//!
//! Each active version may carry test cases. An expected value matches when
//! - it is a string `$.a.b.0`: that path exists in the result;
//! - it is a mapping and the result is a mapping: every expected entry
//!   matches the entry of the same name (subset match);
//! - otherwise both sides have the same canonical form, so `10.50` and
//!   `10.5` compare equal.

use fte_context::{Context, Normalizer, Value};
use serde::Serialize;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::types::FactId;

/// Outcome of one case
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseResult {
    pub fact: FactId,
    pub version: u32,
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// All cases of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelfTestReport {
    pub cases: Vec<CaseResult>,
}

impl SelfTestReport {
    #[must_use]
    pub fn passed(&self) -> usize {
        self.cases.iter().filter(|c| c.passed).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.cases.len() - self.passed()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Resolve every active version's test cases
pub async fn run_self_tests(engine: &Engine) -> SelfTestReport {
    let mut report = SelfTestReport::default();
    for handle in engine.registry().active_versions() {
        let version = &handle.version;
        for (i, case) in version.test_cases.iter().enumerate() {
            let name = case.name.clone().unwrap_or_else(|| format!("case {}", i + 1));
            let detail = run_case(engine, &version.fact, &case.context, &case.expected).await;
            if let Some(reason) = &detail {
                warn!(fact = %version.fact, version = version.version, case = %name, reason = %reason, "self-test failed");
            }
            report.cases.push(CaseResult {
                fact: version.fact.clone(),
                version: version.version,
                name,
                passed: detail.is_none(),
                detail,
            });
        }
    }
    info!(passed = report.passed(), failed = report.failed(), "self-tests finished");
    report
}

/// `None` when the case passes, otherwise the reason
async fn run_case(
    engine: &Engine,
    fact: &FactId,
    context: &serde_json::Value,
    expected: &serde_json::Value,
) -> Option<String> {
    let context = if context.is_null() {
        Context::new()
    } else {
        match Context::from_json(context) {
            Ok(ctx) => ctx,
            Err(e) => return Some(format!("bad test context: {e}")),
        }
    };
    match engine.resolve(fact, context).await {
        Err(e) => Some(e.to_string()),
        Ok(resolution) if matches(expected, resolution.value(), engine.normalizer()) => None,
        Ok(resolution) => Some(format!("expected {expected}, got {}", resolution.value())),
    }
}

fn matches(expected: &serde_json::Value, actual: &Value, normalizer: &Normalizer) -> bool {
    if let Some(path) = expected.as_str().and_then(|s| s.strip_prefix('$')) {
        return path_exists(actual, path);
    }
    match (expected, actual) {
        (serde_json::Value::Object(want), Value::Map(got)) => want.iter().all(|(k, v)| {
            got.get(k).is_some_and(|actual| matches(v, actual, normalizer))
        }),
        _ => {
            let want = normalizer.normalize_value(&Value::from_json(expected));
            let got = normalizer.normalize_value(actual);
            matches!((want, got), (Ok(a), Ok(b)) if a == b)
        }
    }
}

/// `path` is empty or `.seg.seg...`
fn path_exists(value: &Value, path: &str) -> bool {
    if path.is_empty() {
        return true;
    }
    let Some(rest) = path.strip_prefix('.') else {
        return false;
    };
    let mut current = value;
    for segment in rest.split('.') {
        current = match current {
            Value::Map(map) => match map.get(segment) {
                Some(v) => v,
                None => return false,
            },
            Value::Seq(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(v) => v,
                None => return false,
            },
            _ => return false,
        };
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EmptyDataStore;
    use crate::types::{FactDefinition, FactDefinitionVersion, LogicKind, ValueKind};
    use serde_json::json;
    use std::sync::Arc;

    fn value(json: serde_json::Value) -> Value {
        Value::from_json(&json)
    }

    #[test]
    fn numeric_forms_compare_canonically() {
        let n = Normalizer::default();
        assert!(matches(&json!(10.5), &Value::Decimal("10.50".parse().unwrap()), &n));
        assert!(matches(&json!(10), &Value::Float(10.0), &n));
        assert!(!matches(&json!(10), &Value::Int(11), &n));
    }

    #[test]
    fn mapping_is_subset_match() {
        let n = Normalizer::default();
        let got = value(json!({"total": 30, "count": 2, "rows": [1, 2]}));
        assert!(matches(&json!({"total": 30}), &got, &n));
        assert!(!matches(&json!({"total": 31}), &got, &n));
        assert!(!matches(&json!({"missing": 1}), &got, &n));
    }

    #[test]
    fn path_expectations() {
        let n = Normalizer::default();
        let got = value(json!({"rows": [{"amount": 1}]}));
        assert!(matches(&json!("$.rows.0.amount"), &got, &n));
        assert!(matches(&json!("$"), &got, &n));
        assert!(!matches(&json!("$.rows.1"), &got, &n));
        assert!(!matches(&json!("$.rows.x"), &got, &n));
    }

    #[tokio::test]
    async fn reports_pass_and_fail() {
        let engine = Engine::with_store(Arc::new(EmptyDataStore));
        let fact = FactId::new("double").unwrap();
        engine
            .register(FactDefinition::new(fact.clone(), ValueKind::Scalar, ""))
            .unwrap();
        engine
            .add_version(
                FactDefinitionVersion::new(fact.clone(), 1, LogicKind::Expression, "n * 2")
                    .with_test_case(json!({"n": 2}), json!(4))
                    .with_test_case(json!({"n": 3}), json!(7))
                    .with_test_case(json!({}), json!(0)),
            )
            .unwrap();
        engine.activate(&fact, 1).unwrap();

        let report = run_self_tests(&engine).await;
        assert_eq!(report.cases.len(), 3);
        assert_eq!(report.passed(), 1);
        assert!(!report.is_success());
        assert!(report.cases[1].detail.as_deref().unwrap().contains("expected 7"));
        assert_eq!(report.cases[2].name, "case 3");
    }
}
