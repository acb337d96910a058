//! Language-level tests: grammar coverage, arithmetic properties, limits

use fte_context::{Decimal, Value};
use fte_logic::{
    eval_str, parse_expression, parse_procedure, run_procedure, run_str, Limits, LogicError,
    NoPrimitives,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn env(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
}

#[test]
fn spend_style_expression() {
    let mut row1 = BTreeMap::new();
    row1.insert("amount".to_string(), Value::Decimal("19.99".parse().unwrap()));
    let mut row2 = BTreeMap::new();
    row2.insert("amount".to_string(), Value::Decimal("0.01".parse().unwrap()));
    let inputs = env(&[(
        "transactions",
        Value::Seq(vec![Value::Map(row1), Value::Map(row2)]),
    )]);
    let total = eval_str("sum(pluck(transactions, \"amount\"))", &inputs).unwrap();
    assert_eq!(total.as_decimal(), Some("20".parse::<Decimal>().unwrap()));
}

#[test]
fn ratio_of_dependencies() {
    let inputs = env(&[("income", Value::Int(4000)), ("spend", Value::Int(1000))]);
    let v = eval_str("if income == 0 then null else round(spend / income, 2)", &inputs).unwrap();
    assert_eq!(v, Value::Decimal("0.25".parse().unwrap()));
}

#[test]
fn procedure_with_nested_control_flow() {
    let src = r#"
        # count values above a threshold, stopping at the first negative
        let above = 0;
        for v in values {
            if v < 0 {
                return -1;
            } else if v > limit {
                above = above + 1;
            }
        }
        return above;
    "#;
    let mut host = NoPrimitives;
    let inputs = env(&[
        ("values", Value::from(vec![1_i64, 5, 9, 12])),
        ("limit", Value::Int(4)),
    ]);
    assert_eq!(run_str(src, &inputs, &mut host).unwrap(), Value::Int(3));

    let inputs = env(&[
        ("values", Value::from(vec![1_i64, -5, 9])),
        ("limit", Value::Int(4)),
    ]);
    assert_eq!(run_str(src, &inputs, &mut host).unwrap(), Value::Int(-1));
}

#[test]
fn block_scoped_lets_do_not_leak() {
    let src = "if true { let hidden = 1; } return hidden;";
    let err = run_str(src, &BTreeMap::new(), &mut NoPrimitives).unwrap_err();
    assert_eq!(err, LogicError::UnknownName("hidden".into()));
}

#[test]
fn syntax_errors_carry_positions() {
    let err = parse_expression("1 +").unwrap_err();
    assert!(err.is_syntax());
    assert!(parse_procedure("let = 3;").unwrap_err().is_syntax());
}

#[test]
fn deep_recursion_in_data_is_bounded() {
    let procedure = parse_procedure(
        "let xs = []; let i = 0; while i < 1000 { xs = append(xs, i); i = i + 1; } return len(xs);",
    )
    .unwrap();
    let limits = Limits {
        max_collection_len: 100,
        ..Limits::default()
    };
    let err = run_procedure(&procedure, &BTreeMap::new(), limits, &mut NoPrimitives, None)
        .unwrap_err();
    assert!(matches!(err, LogicError::LimitExceeded(_)));
}

proptest! {
    #[test]
    fn integer_arithmetic_matches_native(a in -10_000_i64..10_000, b in -10_000_i64..10_000) {
        let inputs = env(&[("a", Value::Int(a)), ("b", Value::Int(b))]);
        prop_assert_eq!(eval_str("a + b", &inputs).unwrap(), Value::Int(a + b));
        prop_assert_eq!(eval_str("a * b - a", &inputs).unwrap(), Value::Int(a * b - a));
        prop_assert_eq!(eval_str("a < b", &inputs).unwrap(), Value::Bool(a < b));
    }

    #[test]
    fn parser_never_panics(source in "[a-z0-9 +*/().\\[\\]{}\"=<>!,:;-]{0,40}") {
        let _ = parse_expression(&source);
        let _ = parse_procedure(&source);
    }

    #[test]
    fn step_budget_always_bounds_loops(budget in 10_u64..2_000) {
        let procedure = parse_procedure("let i = 0; while true { i = i + 1; } return i;").unwrap();
        let limits = Limits { max_steps: budget, ..Limits::default() };
        let err = run_procedure(&procedure, &BTreeMap::new(), limits, &mut NoPrimitives, None)
            .unwrap_err();
        prop_assert_eq!(err, LogicError::StepBudgetExhausted(budget));
    }
}
