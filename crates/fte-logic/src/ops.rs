//! Arithmetic, comparison and indexing over [`Value`]s
//!
//! Numeric promotion: integer with integer stays integer (checked), any
//! decimal promotes to decimal, any float promotes to float. Integer division
//! that is not exact yields a decimal.

use chrono::NaiveDate;
use fte_context::{Decimal, Value};
use std::cmp::Ordering;

use crate::ast::BinaryOp;
use crate::error::LogicError;

#[derive(Debug, Clone, Copy)]
enum Num {
    I(i64),
    D(Decimal),
    F(f64),
}

fn num(value: &Value) -> Option<Num> {
    match value {
        Value::Int(i) => Some(Num::I(*i)),
        Value::Decimal(d) => Some(Num::D(*d)),
        Value::Float(f) => Some(Num::F(*f)),
        _ => None,
    }
}

fn to_f64(n: Num) -> f64 {
    match n {
        Num::I(i) => i as f64,
        Num::D(d) => Value::Decimal(d).as_f64().unwrap_or(f64::NAN),
        Num::F(f) => f,
    }
}

fn to_dec(n: Num) -> Decimal {
    match n {
        Num::I(i) => Decimal::from(i),
        Num::D(d) => d,
        Num::F(_) => unreachable!("floats are promoted before decimals"),
    }
}

enum Pair {
    Ints(i64, i64),
    Decs(Decimal, Decimal),
    Floats(f64, f64),
}

fn promote(a: Num, b: Num) -> Pair {
    match (a, b) {
        (Num::I(x), Num::I(y)) => Pair::Ints(x, y),
        (Num::F(_), _) | (_, Num::F(_)) => Pair::Floats(to_f64(a), to_f64(b)),
        _ => Pair::Decs(to_dec(a), to_dec(b)),
    }
}

pub(crate) fn finite(f: f64) -> Result<Value, LogicError> {
    if f.is_finite() {
        Ok(Value::Float(f))
    } else {
        Err(LogicError::Overflow)
    }
}

/// Apply a binary operator
///
/// # Errors
/// Type mismatches, division by zero and overflow.
pub fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, LogicError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(equals(lhs, rhs))),
        BinaryOp::NotEq => Ok(Value::Bool(!equals(lhs, rhs))),
        BinaryOp::Lt => Ok(Value::Bool(compare(lhs, rhs)? == Ordering::Less)),
        BinaryOp::Le => Ok(Value::Bool(compare(lhs, rhs)? != Ordering::Greater)),
        BinaryOp::Gt => Ok(Value::Bool(compare(lhs, rhs)? == Ordering::Greater)),
        BinaryOp::Ge => Ok(Value::Bool(compare(lhs, rhs)? != Ordering::Less)),
        BinaryOp::Add => match (lhs, rhs) {
            (Value::Text(a), Value::Text(b)) => Ok(Value::Text(format!("{a}{b}"))),
            (Value::Seq(a), Value::Seq(b)) => Ok(Value::Seq(a.iter().chain(b).cloned().collect())),
            _ => arithmetic(op, lhs, rhs),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, lhs, rhs),
    }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, LogicError> {
    let (Some(a), Some(b)) = (num(lhs), num(rhs)) else {
        return Err(LogicError::type_error(format!(
            "cannot apply {op:?} to {} and {}",
            lhs.kind_name(),
            rhs.kind_name()
        )));
    };
    match promote(a, b) {
        Pair::Ints(x, y) => match op {
            BinaryOp::Add => x.checked_add(y).map(Value::Int).ok_or(LogicError::Overflow),
            BinaryOp::Sub => x.checked_sub(y).map(Value::Int).ok_or(LogicError::Overflow),
            BinaryOp::Mul => x.checked_mul(y).map(Value::Int).ok_or(LogicError::Overflow),
            BinaryOp::Div => {
                if y == 0 {
                    return Err(LogicError::DivisionByZero);
                }
                if x.checked_rem(y) == Some(0) {
                    x.checked_div(y).map(Value::Int).ok_or(LogicError::Overflow)
                } else {
                    Decimal::from(x)
                        .checked_div(Decimal::from(y))
                        .map(Value::Decimal)
                        .ok_or(LogicError::Overflow)
                }
            }
            BinaryOp::Rem => {
                if y == 0 {
                    return Err(LogicError::DivisionByZero);
                }
                x.checked_rem(y).map(Value::Int).ok_or(LogicError::Overflow)
            }
            _ => unreachable!("non-arithmetic operator"),
        },
        Pair::Decs(x, y) => {
            if matches!(op, BinaryOp::Div | BinaryOp::Rem) && y.is_zero() {
                return Err(LogicError::DivisionByZero);
            }
            let out = match op {
                BinaryOp::Add => x.checked_add(y),
                BinaryOp::Sub => x.checked_sub(y),
                BinaryOp::Mul => x.checked_mul(y),
                BinaryOp::Div => x.checked_div(y),
                BinaryOp::Rem => x.checked_rem(y),
                _ => unreachable!("non-arithmetic operator"),
            };
            out.map(Value::Decimal).ok_or(LogicError::Overflow)
        }
        Pair::Floats(x, y) => {
            if matches!(op, BinaryOp::Div | BinaryOp::Rem) && y == 0.0 {
                return Err(LogicError::DivisionByZero);
            }
            finite(match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                BinaryOp::Rem => x % y,
                _ => unreachable!("non-arithmetic operator"),
            })
        }
    }
}

/// Arithmetic negation
///
/// # Errors
/// Non-numeric operand or overflow.
pub fn negate(value: &Value) -> Result<Value, LogicError> {
    match value {
        Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(LogicError::Overflow),
        Value::Decimal(d) => Ok(Value::Decimal(-*d)),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(LogicError::type_error(format!("cannot negate {}", other.kind_name()))),
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

/// Total order between comparable values
///
/// Text compares with dates when it holds an ISO date.
///
/// # Errors
/// Returns a type error for incomparable kinds.
pub fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, LogicError> {
    let incomparable = || {
        LogicError::type_error(format!(
            "cannot compare {} with {}",
            lhs.kind_name(),
            rhs.kind_name()
        ))
    };
    if let (Some(a), Some(b)) = (num(lhs), num(rhs)) {
        return match promote(a, b) {
            Pair::Ints(x, y) => Ok(x.cmp(&y)),
            Pair::Decs(x, y) => Ok(x.cmp(&y)),
            Pair::Floats(x, y) => x.partial_cmp(&y).ok_or_else(incomparable),
        };
    }
    match (lhs, rhs) {
        (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Ok(a.cmp(b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => Ok(a.cmp(b)),
        (Value::Date(a), Value::Text(b)) => parse_date(b).map(|b| a.cmp(&b)).ok_or_else(incomparable),
        (Value::Text(a), Value::Date(b)) => parse_date(a).map(|a| a.cmp(b)).ok_or_else(incomparable),
        _ => Err(incomparable()),
    }
}

/// Semantic equality: numbers by value, dates against ISO text, collections
/// element-wise
#[must_use]
pub fn equals(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Seq(a), Value::Seq(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| equals(x, y))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|((ka, va), (kb, vb))| ka == kb && equals(va, vb))
        }
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        _ if lhs.is_number() && rhs.is_number() => compare(lhs, rhs) == Ok(Ordering::Equal),
        (Value::Date(_), Value::Text(_)) | (Value::Text(_), Value::Date(_)) => {
            compare(lhs, rhs) == Ok(Ordering::Equal)
        }
        _ => lhs == rhs,
    }
}

/// `target[index]`
///
/// Sequences accept negative indices counted from the end.
///
/// # Errors
/// Out-of-range indices, missing keys and non-indexable targets.
pub fn index(target: &Value, index: &Value) -> Result<Value, LogicError> {
    match (target, index) {
        (Value::Seq(items), Value::Int(i)) => {
            let len = items.len() as i64;
            let at = if *i < 0 { len + i } else { *i };
            usize::try_from(at)
                .ok()
                .and_then(|at| items.get(at))
                .cloned()
                .ok_or_else(|| LogicError::Index(format!("index {i} out of range for length {len}")))
        }
        (Value::Map(map), Value::Text(key)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| LogicError::Index(format!("missing key '{key}'"))),
        (Value::Text(s), Value::Int(i)) => usize::try_from(*i)
            .ok()
            .and_then(|at| s.chars().nth(at))
            .map(|c| Value::Text(c.to_string()))
            .ok_or_else(|| LogicError::Index(format!("index {i} out of range"))),
        _ => Err(LogicError::type_error(format!(
            "cannot index {} with {}",
            target.kind_name(),
            index.kind_name()
        ))),
    }
}
