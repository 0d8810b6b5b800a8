//! `where` condition evaluation.
//!
//! Conditions come straight from clients, so evaluation is a fixed
//! dispatch over [`CompareOp`]; nothing a client sends is ever executed.

use std::cmp::Ordering;

use chansync_types::{CompareOp, Condition, Record};
use serde_json::Value;

/// Order two values of the same kind.
///
/// Numbers compare numerically and strings lexicographically. Booleans and
/// nulls are only ever equal or unequal. Mismatched kinds are unordered.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) if a == b => Some(Ordering::Equal),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Whether `record` satisfies a single condition. Missing fields read as null.
pub fn matches(condition: &Condition, record: &Record) -> bool {
    let left = record.get(&condition.field).unwrap_or(&Value::Null);
    let ord = compare(left, &condition.value);
    match condition.op {
        CompareOp::Eq => ord == Some(Ordering::Equal),
        CompareOp::Ne => ord != Some(Ordering::Equal),
        CompareOp::Lt => ord == Some(Ordering::Less),
        CompareOp::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => ord == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
    }
}

/// Whether `record` satisfies every condition (an empty list matches).
pub fn matches_all(conditions: &[Condition], record: &Record) -> bool {
    conditions.iter().all(|c| matches(c, record))
}
