//! Pure functions callable from any fact logic

use chrono::NaiveDate;
use fte_context::Value;
use rust_decimal::RoundingStrategy;
use std::cmp::Ordering;

use crate::ast::BinaryOp;
use crate::error::LogicError;
use crate::interp::Limits;
use crate::ops;

/// Names of every builtin, in lexical order
pub const BUILTINS: &[&str] = &[
    "abs", "append", "avg", "contains", "count", "date", "get", "keys", "len", "max", "min",
    "pluck", "range", "round", "sorted", "sum", "text", "values",
];

/// Whether `name` is a builtin
#[must_use]
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.binary_search(&name).is_ok()
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), LogicError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{min}..={max}")
        };
        return Err(LogicError::type_error(format!(
            "{name}() takes {expected} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

fn seq<'v>(name: &str, value: &'v Value) -> Result<&'v [Value], LogicError> {
    match value {
        Value::Seq(items) => Ok(items),
        other => Err(LogicError::type_error(format!(
            "{name}() expects a sequence, got {}",
            other.kind_name()
        ))),
    }
}

/// `min(seq)` and `max(seq)` take one sequence; `min(a, b, ..)` takes
/// the arguments themselves
fn operands<'v>(name: &str, args: &'v [Value]) -> Result<&'v [Value], LogicError> {
    match args {
        [] => Err(LogicError::type_error(format!("{name}() needs arguments"))),
        [single] => seq(name, single),
        many => Ok(many),
    }
}

fn extreme(name: &str, args: &[Value], want: Ordering) -> Result<Value, LogicError> {
    let mut best: Option<&Value> = None;
    for item in operands(name, args)?.iter().filter(|v| !matches!(v, Value::Null)) {
        best = match best {
            Some(current) if ops::compare(item, current)? != want => Some(current),
            _ => Some(item),
        };
    }
    Ok(best.cloned().unwrap_or(Value::Null))
}

fn sum(items: &[Value]) -> Result<Value, LogicError> {
    items
        .iter()
        .filter(|v| !matches!(v, Value::Null))
        .try_fold(Value::Int(0), |acc, item| ops::binary(BinaryOp::Add, &acc, item))
}

fn round(value: &Value, digits: i64) -> Result<Value, LogicError> {
    let dp = u32::try_from(digits)
        .map_err(|_| LogicError::type_error("round() digits must be non-negative"))?;
    match value {
        Value::Int(_) => Ok(value.clone()),
        Value::Decimal(d) => Ok(Value::Decimal(
            d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero),
        )),
        Value::Float(f) => {
            let scale = 10_f64.powi(i32::try_from(dp).map_err(|_| LogicError::Overflow)?);
            if !scale.is_finite() {
                return Err(LogicError::Overflow);
            }
            ops::finite((f * scale).round() / scale)
        }
        other => Err(LogicError::type_error(format!("cannot round {}", other.kind_name()))),
    }
}

fn sorted(items: &[Value]) -> Result<Value, LogicError> {
    let mut out = items.to_vec();
    let mut failure = None;
    out.sort_by(|a, b| match ops::compare(a, b) {
        Ok(order) => order,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(Value::Seq(out)),
    }
}

fn int_arg(name: &str, value: &Value) -> Result<i64, LogicError> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(LogicError::type_error(format!(
            "{name}() expects an integer, got {}",
            other.kind_name()
        ))),
    }
}

fn range(args: &[Value], limits: &Limits) -> Result<Value, LogicError> {
    let (start, end) = match args {
        [end] => (0, int_arg("range", end)?),
        [start, end] => (int_arg("range", start)?, int_arg("range", end)?),
        _ => unreachable!("arity checked"),
    };
    let len = usize::try_from(end.saturating_sub(start)).unwrap_or(0);
    if len > limits.max_collection_len {
        return Err(LogicError::LimitExceeded(format!(
            "range of {len} elements exceeds {}",
            limits.max_collection_len
        )));
    }
    Ok(Value::Seq((start..end).map(Value::Int).collect()))
}

/// Invoke builtin `name`, or `None` when no such builtin exists
///
/// # Errors
/// Arity and type errors, plus those of the underlying operations.
pub fn call(name: &str, args: &[Value], limits: &Limits) -> Option<Result<Value, LogicError>> {
    let result = match name {
        "len" | "count" => arity(name, args, 1, 1).and_then(|()| match &args[0] {
            Value::Seq(items) => Ok(Value::Int(items.len() as i64)),
            Value::Map(map) => Ok(Value::Int(map.len() as i64)),
            Value::Text(s) => Ok(Value::Int(s.chars().count() as i64)),
            other => Err(LogicError::type_error(format!("{name}() of {}", other.kind_name()))),
        }),
        "sum" => arity(name, args, 1, 1).and_then(|()| sum(seq(name, &args[0])?)),
        "avg" => arity(name, args, 1, 1).and_then(|()| {
            let items = seq(name, &args[0])?;
            let present = items.iter().filter(|v| !matches!(v, Value::Null)).count();
            if present == 0 {
                return Ok(Value::Null);
            }
            ops::binary(BinaryOp::Div, &sum(items)?, &Value::Int(present as i64))
        }),
        "min" => extreme(name, args, Ordering::Less),
        "max" => extreme(name, args, Ordering::Greater),
        "abs" => arity(name, args, 1, 1).and_then(|()| match &args[0] {
            Value::Int(i) => i.checked_abs().map(Value::Int).ok_or(LogicError::Overflow),
            Value::Decimal(d) => Ok(Value::Decimal(d.abs())),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            other => Err(LogicError::type_error(format!("abs() of {}", other.kind_name()))),
        }),
        "round" => arity(name, args, 1, 2).and_then(|()| {
            let digits = args.get(1).map_or(Ok(0), |d| int_arg(name, d))?;
            round(&args[0], digits)
        }),
        "pluck" => arity(name, args, 2, 2).and_then(|()| {
            let field = args[1]
                .as_str()
                .ok_or_else(|| LogicError::type_error("pluck() field must be text"))?;
            seq(name, &args[0])?
                .iter()
                .map(|item| match item {
                    Value::Map(map) => Ok(map.get(field).cloned().unwrap_or(Value::Null)),
                    other => Err(LogicError::type_error(format!(
                        "pluck() over {} element",
                        other.kind_name()
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Seq)
        }),
        "keys" | "values" => arity(name, args, 1, 1).and_then(|()| match &args[0] {
            Value::Map(map) if name == "keys" => {
                Ok(Value::Seq(map.keys().cloned().map(Value::Text).collect()))
            }
            Value::Map(map) => Ok(Value::Seq(map.values().cloned().collect())),
            other => Err(LogicError::type_error(format!("{name}() of {}", other.kind_name()))),
        }),
        "get" => arity(name, args, 2, 3).and_then(|()| {
            let fallback = args.get(2).cloned().unwrap_or(Value::Null);
            Ok(match (&args[0], &args[1]) {
                (Value::Map(map), Value::Text(key)) => map.get(key).cloned().unwrap_or(fallback),
                (target, index) => ops::index(target, index).unwrap_or(fallback),
            })
        }),
        "contains" => arity(name, args, 2, 2).and_then(|()| match (&args[0], &args[1]) {
            (Value::Seq(items), needle) => {
                Ok(Value::Bool(items.iter().any(|item| ops::equals(item, needle))))
            }
            (Value::Map(map), Value::Text(key)) => Ok(Value::Bool(map.contains_key(key))),
            (Value::Text(hay), Value::Text(needle)) => Ok(Value::Bool(hay.contains(needle.as_str()))),
            (target, _) => Err(LogicError::type_error(format!(
                "contains() on {}",
                target.kind_name()
            ))),
        }),
        "sorted" => arity(name, args, 1, 1).and_then(|()| sorted(seq(name, &args[0])?)),
        "date" => arity(name, args, 1, 1).and_then(|()| match &args[0] {
            Value::Date(_) => Ok(args[0].clone()),
            Value::Timestamp(t) => Ok(Value::Date(t.date_naive())),
            Value::Text(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|e| LogicError::type_error(format!("date('{s}'): {e}"))),
            other => Err(LogicError::type_error(format!("date() of {}", other.kind_name()))),
        }),
        "text" => arity(name, args, 1, 1).map(|()| match &args[0] {
            Value::Text(s) => Value::Text(s.clone()),
            Value::Date(d) => Value::Text(d.format("%Y-%m-%d").to_string()),
            Value::Decimal(d) => Value::Text(d.normalize().to_string()),
            other => Value::Text(other.to_string()),
        }),
        "append" => arity(name, args, 2, 2).and_then(|()| {
            let mut items = seq(name, &args[0])?.to_vec();
            items.push(args[1].clone());
            Ok(Value::Seq(items))
        }),
        "range" => arity(name, args, 1, 2).and_then(|()| range(args, limits)),
        _ => return None,
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fte_context::Decimal;
    use std::collections::BTreeMap;

    fn run(name: &str, args: Vec<Value>) -> Result<Value, LogicError> {
        call(name, &args, &Limits::default()).expect("builtin exists")
    }

    fn txn(amount: &str) -> Value {
        let mut map = BTreeMap::new();
        map.insert("amount".to_string(), Value::Decimal(amount.parse().unwrap()));
        Value::Map(map)
    }

    #[test]
    fn builtin_table_is_sorted() {
        let mut copy = BUILTINS.to_vec();
        copy.sort_unstable();
        assert_eq!(copy, BUILTINS);
        assert!(is_builtin("pluck"));
        assert!(!is_builtin("eval"));
    }

    #[test]
    fn sum_of_plucked_amounts() {
        let txns = Value::Seq(vec![txn("10.50"), txn("4.25"), txn("0.25")]);
        let amounts = run("pluck", vec![txns, Value::from("amount")]).unwrap();
        let total = run("sum", vec![amounts]).unwrap();
        assert_eq!(total.as_decimal(), Some("15".parse::<Decimal>().unwrap()));
    }

    #[test]
    fn empty_sum_is_zero_and_empty_avg_is_null() {
        assert_eq!(run("sum", vec![Value::Seq(vec![])]).unwrap(), Value::Int(0));
        assert_eq!(run("avg", vec![Value::Seq(vec![])]).unwrap(), Value::Null);
    }

    #[test]
    fn min_max_accept_sequence_or_varargs() {
        let seq = Value::from(vec![3_i64, 1, 2]);
        assert_eq!(run("min", vec![seq.clone()]).unwrap(), Value::Int(1));
        assert_eq!(run("max", vec![seq]).unwrap(), Value::Int(3));
        assert_eq!(
            run("max", vec![Value::Int(1), Value::Float(2.5)]).unwrap(),
            Value::Float(2.5)
        );
    }

    #[test]
    fn round_is_half_away_from_zero() {
        let v = run("round", vec![Value::Decimal("2.345".parse().unwrap()), Value::Int(2)]).unwrap();
        assert_eq!(v, Value::Decimal("2.35".parse().unwrap()));
    }

    #[test]
    fn float_round_past_f64_range_overflows() {
        assert_eq!(
            run("round", vec![Value::Float(1.5), Value::Int(400)]),
            Err(LogicError::Overflow)
        );
        assert_eq!(
            run("round", vec![Value::Float(1.25), Value::Int(1)]).unwrap(),
            Value::Float(1.3)
        );
    }

    #[test]
    fn sorted_rejects_mixed_kinds() {
        assert!(run("sorted", vec![Value::Seq(vec![Value::Int(1), Value::from("a")])]).is_err());
    }

    #[test]
    fn range_respects_collection_limit() {
        let limits = Limits {
            max_collection_len: 10,
            ..Limits::default()
        };
        let res = call("range", &[Value::Int(100)], &limits).unwrap();
        assert!(matches!(res, Err(LogicError::LimitExceeded(_))));
    }

    #[test]
    fn unknown_builtin_is_none() {
        assert!(call("open", &[], &Limits::default()).is_none());
    }

    #[test]
    fn arity_is_checked() {
        assert!(matches!(run("len", vec![]), Err(LogicError::Type(_))));
    }
}
