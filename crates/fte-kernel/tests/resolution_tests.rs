use fte_kernel::journal::{Journal, JournalError};
use fte_kernel::prelude::*;
use fte_test_utils::{dec, id, sample_store, spend_context, spend_engine, thread_config, thread_engine};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_spend_total_sums_matching_amounts() {
    let (engine, store) = spend_engine();
    let ctx = spend_context("A1", "2024-01-01", "2024-01-31");

    let first = engine.resolve(&id("spend.total"), ctx.clone()).await.unwrap();
    assert_eq!(first.value(), &Value::Decimal(dec("42.75")));
    assert_eq!(first.outcome, CacheOutcome::Computed);
    assert_eq!(store.call_count("transactions"), 1);

    let second = engine.resolve(&id("spend.total"), ctx).await.unwrap();
    assert_eq!(second.outcome, CacheOutcome::Hit);
    assert!(Arc::ptr_eq(&first.instance, &second.instance));
    assert_eq!(store.call_count("transactions"), 1);
}

#[tokio::test]
async fn test_key_order_does_not_split_cache() {
    let (engine, _) = spend_engine();
    let a = engine
        .resolve_json(
            "spend.total",
            &json!({"accountId": "B2", "range": ["2024-01-01", "2024-12-31"]}),
        )
        .await
        .unwrap();
    let b = engine
        .resolve_json(
            "spend.total",
            &json!({"range": ["2024-01-01", "2024-12-31"], "accountId": "B2", "user": "alice"}),
        )
        .await
        .unwrap();
    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_eq!(b.outcome, CacheOutcome::Hit);
    assert_eq!(b.value(), &Value::Decimal(dec("5.00")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_instance() {
    let (engine, _) = spend_engine();
    let engine = Arc::new(engine);
    let ctx = spend_context("A1", "2024-01-01", "2024-02-29");

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let ctx = ctx.clone();
            tokio::spawn(async move { engine.resolve(&id("spend.total"), ctx).await })
        })
        .collect();
    let results: Vec<Resolution> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let first = &results[0];
    for r in &results {
        assert_eq!(r.instance.id, first.instance.id);
        assert_eq!(r.value(), &Value::Decimal(dec("142.74")));
    }
    assert_eq!(engine.cache_stats().commits, 1);
    assert_eq!(engine.journal().count_outcome("computed"), 1);
}

#[tokio::test]
async fn test_schema_violation_never_executes() {
    let (engine, store) = spend_engine();
    let missing = Context::new().with("range", vec!["2024-01-01", "2024-01-31"]);
    match engine.resolve(&id("spend.total"), missing).await {
        Err(EngineError::SchemaViolation { field, .. }) => assert_eq!(field, "accountId"),
        other => panic!("unexpected {other:?}"),
    }

    let bad_pattern = spend_context("a1", "2024-01-01", "2024-01-31");
    match engine.resolve(&id("spend.total"), bad_pattern).await {
        Err(EngineError::SchemaViolation { field, .. }) => assert_eq!(field, "accountId"),
        other => panic!("unexpected {other:?}"),
    }

    let bad_date = spend_context("A1", "January", "2024-01-31");
    match engine.resolve(&id("spend.total"), bad_date).await {
        Err(EngineError::SchemaViolation { field, .. }) => assert_eq!(field, "range.0"),
        other => panic!("unexpected {other:?}"),
    }

    assert_eq!(store.total_calls(), 0);
    assert_eq!(engine.cache_stats().commits, 0);
    assert_eq!(engine.journal().count_outcome("schema_violation"), 3);
}

#[tokio::test]
async fn test_dependency_provenance() {
    let (engine, store) = spend_engine();
    let ctx = spend_context("A1", "2024-01-01", "2024-01-31");
    let avg = engine.resolve(&id("spend.average"), ctx.clone()).await.unwrap();
    assert_eq!(avg.value(), &Value::Decimal(dec("21.38")));

    let provenance = avg.provenance();
    assert_eq!(provenance.instance_count(), 3);
    let deps: Vec<&str> = provenance.dependencies.iter().map(|p| p.fact.as_str()).collect();
    assert_eq!(deps, vec!["spend.total", "spend.count"]);
    assert_eq!(store.call_count("transactions"), 2);

    // dependencies are now cached
    let total = engine.resolve(&id("spend.total"), ctx).await.unwrap();
    assert_eq!(total.outcome, CacheOutcome::Hit);
    assert_eq!(total.instance.id, provenance.dependencies[0].instance);
}

#[tokio::test]
async fn test_dependency_activation_recomputes_dependents() {
    let engine = thread_engine(sample_store());
    for f in ["rate", "fee"] {
        engine
            .register(FactDefinition::new(id(f), ValueKind::Scalar, ""))
            .unwrap();
    }
    engine
        .add_version(FactDefinitionVersion::new(id("rate"), 1, LogicKind::Expression, "10"))
        .unwrap();
    engine
        .add_version(
            FactDefinitionVersion::new(id("fee"), 1, LogicKind::Expression, "rate * 2")
                .depends_on(DependencySpec::on(id("rate"))),
        )
        .unwrap();
    engine.activate(&id("rate"), 1).unwrap();
    engine.activate(&id("fee"), 1).unwrap();

    let before = engine.resolve(&id("fee"), Context::new()).await.unwrap();
    assert_eq!(before.value(), &Value::Int(20));

    engine
        .add_version(FactDefinitionVersion::new(id("rate"), 2, LogicKind::Expression, "50"))
        .unwrap();
    engine.activate(&id("rate"), 2).unwrap();

    let after = engine.resolve(&id("fee"), Context::new()).await.unwrap();
    assert_eq!(after.value(), &Value::Int(100));
    assert_eq!(after.outcome, CacheOutcome::Computed);
    assert_eq!(after.version(), before.version());
    assert_ne!(after.instance.id, before.instance.id);
    assert_eq!(after.provenance().dependencies[0].version, 2);

    // instances computed against the old dependency stay cached
    engine.cache().sync().await;
    assert_eq!(engine.cache().instances_of(&VersionKey::new(id("rate"), 1)).len(), 1);
    assert_eq!(engine.cache().instances_of(&VersionKey::new(id("fee"), 1)).len(), 2);

    engine.activate(&id("rate"), 1).unwrap();
    let again = engine.resolve(&id("fee"), Context::new()).await.unwrap();
    assert_eq!(again.outcome, CacheOutcome::Hit);
    assert_eq!(again.instance.id, before.instance.id);
}

#[tokio::test]
async fn test_mapped_dependency_context() {
    let (engine, _) = spend_engine();
    engine
        .register(FactDefinition::new(id("spend.january"), ValueKind::Scalar, ""))
        .unwrap();
    engine
        .add_version(
            FactDefinitionVersion::new(id("spend.january"), 1, LogicKind::Expression, "spend_total")
                .depends_on(
                    DependencySpec::on(id("spend.total"))
                        .map("accountId", "{{account}}")
                        .map("range", json!(["2024-01-01", "2024-01-31"])),
                ),
        )
        .unwrap();
    engine.activate(&id("spend.january"), 1).unwrap();

    let r = engine
        .resolve_json("spend.january", &json!({"account": "A1"}))
        .await
        .unwrap();
    assert_eq!(r.value(), &Value::Decimal(dec("42.75")));
}

#[tokio::test]
async fn test_unknown_fact_and_inactive_fact() {
    let (engine, _) = spend_engine();
    assert_eq!(
        engine.resolve(&id("nope"), Context::new()).await.unwrap_err(),
        EngineError::UnknownFact(id("nope"))
    );
    engine.deactivate(&id("spend.average")).unwrap();
    assert!(matches!(
        engine.resolve(&id("spend.average"), Context::new()).await,
        Err(EngineError::UnknownFact(_))
    ));
}

#[test]
fn test_cyclic_activation_keeps_graph() {
    let engine = thread_engine(sample_store());
    for f in ["a", "b"] {
        engine
            .register(FactDefinition::new(id(f), ValueKind::Scalar, ""))
            .unwrap();
    }
    engine
        .add_version(FactDefinitionVersion::new(id("a"), 1, LogicKind::Expression, "1"))
        .unwrap();
    engine
        .add_version(
            FactDefinitionVersion::new(id("b"), 1, LogicKind::Expression, "a + 1")
                .depends_on(DependencySpec::on(id("a"))),
        )
        .unwrap();
    engine.activate(&id("a"), 1).unwrap();
    engine.activate(&id("b"), 1).unwrap();
    let before = engine.graph().to_dot();

    engine
        .add_version(
            FactDefinitionVersion::new(id("a"), 2, LogicKind::Expression, "b")
                .depends_on(DependencySpec::on(id("b"))),
        )
        .unwrap();
    let err = engine.activate(&id("a"), 2).unwrap_err();
    assert!(err.is_structural());
    assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
    assert_eq!(engine.graph().to_dot(), before);
    assert_eq!(engine.registry().active_version_number(&id("a")), Some(1));
}

#[tokio::test]
async fn test_infinite_loop_times_out_in_thread() {
    let config = EngineConfig {
        limits: SandboxLimits {
            max_steps: u64::MAX,
            ..SandboxLimits::default()
        },
        ..thread_config(100)
    };
    let engine = Engine::new(config, sample_store()).unwrap();
    engine
        .register(FactDefinition::new(id("spin"), ValueKind::Scalar, ""))
        .unwrap();
    engine
        .add_version(FactDefinitionVersion::new(
            id("spin"),
            1,
            LogicKind::Procedure,
            "let i = 0; while true { i = i + 1; } return i;",
        ))
        .unwrap();
    engine.activate(&id("spin"), 1).unwrap();

    let started = Instant::now();
    let err = engine.resolve(&id("spin"), Context::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::ExecutionTimeout { timeout_ms: 100, .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(engine.cache_stats().commits, 0);
}

#[tokio::test]
async fn test_step_budget_is_execution_failure() {
    let config = EngineConfig {
        limits: SandboxLimits {
            max_steps: 1_000,
            ..SandboxLimits::default()
        },
        ..thread_config(5_000)
    };
    let engine = Engine::new(config, sample_store()).unwrap();
    engine
        .register(FactDefinition::new(id("spin"), ValueKind::Scalar, ""))
        .unwrap();
    engine
        .add_version(FactDefinitionVersion::new(
            id("spin"),
            1,
            LogicKind::Procedure,
            "while true { } return 0;",
        ))
        .unwrap();
    engine.activate(&id("spin"), 1).unwrap();
    assert!(matches!(
        engine.resolve(&id("spin"), Context::new()).await,
        Err(EngineError::ExecutionFailed { .. })
    ));
}

#[tokio::test]
async fn test_resolution_depth_ceiling() {
    let config = EngineConfig {
        max_resolution_depth: 2,
        ..thread_config(1_000)
    };
    let engine = Engine::new(config, sample_store()).unwrap();
    for f in ["a", "b", "c"] {
        engine
            .register(FactDefinition::new(id(f), ValueKind::Scalar, ""))
            .unwrap();
    }
    engine
        .add_version(FactDefinitionVersion::new(id("c"), 1, LogicKind::Expression, "1"))
        .unwrap();
    engine
        .add_version(
            FactDefinitionVersion::new(id("b"), 1, LogicKind::Expression, "c")
                .depends_on(DependencySpec::on(id("c"))),
        )
        .unwrap();
    engine
        .add_version(
            FactDefinitionVersion::new(id("a"), 1, LogicKind::Expression, "b")
                .depends_on(DependencySpec::on(id("b"))),
        )
        .unwrap();
    for f in ["c", "b", "a"] {
        engine.activate(&id(f), 1).unwrap();
    }
    assert_eq!(
        engine.resolve(&id("a"), Context::new()).await.unwrap_err(),
        EngineError::ResolutionDepthExceeded { limit: 2 }
    );
    assert_eq!(
        engine.resolve(&id("b"), Context::new()).await.unwrap().value(),
        &Value::Int(1)
    );
}

#[tokio::test]
async fn test_unsupported_kind_fails_at_execution() {
    let engine = thread_engine(sample_store());
    engine
        .register(FactDefinition::new(id("py"), ValueKind::Scalar, ""))
        .unwrap();
    let mut version = FactDefinitionVersion::new(id("py"), 1, LogicKind::Expression, "print(1)");
    version.logic_kind = "python".into();
    engine.add_version(version).unwrap();
    engine.activate(&id("py"), 1).unwrap();
    assert_eq!(
        engine.resolve(&id("py"), Context::new()).await.unwrap_err(),
        EngineError::UnsupportedLogicKind("python".into())
    );
}

#[tokio::test]
async fn test_unnormalizable_context() {
    let (engine, _) = spend_engine();
    let ctx = spend_context("A1", "2024-01-01", "2024-01-31").with("weight", f64::NAN);
    assert!(matches!(
        engine.resolve(&id("spend.total"), ctx).await,
        Err(EngineError::UnnormalizableContext(_))
    ));
}

#[tokio::test]
async fn test_journal_detects_tampering() {
    let (engine, _) = spend_engine();
    let ctx = spend_context("A1", "2024-01-01", "2024-01-31");
    engine.resolve(&id("spend.average"), ctx.clone()).await.unwrap();
    engine.resolve(&id("spend.average"), ctx).await.unwrap();
    engine.journal().verify_integrity().unwrap();

    let mut entries = engine.journal().entries();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[3].outcome, "cache_hit");
    entries[1].outcome = "cache_hit".into();
    assert_eq!(
        Journal::from_entries(entries).verify_integrity(),
        Err(JournalError::IntegrityViolation { sequence: 1 })
    );
}

#[tokio::test]
async fn test_self_tests_pass_on_spend_taxonomy() {
    let (engine, _) = spend_engine();
    let report = run_self_tests(&engine).await;
    assert_eq!(report.cases.len(), 3);
    assert!(report.is_success(), "{report:?}");
}
