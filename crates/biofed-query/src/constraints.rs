//! Attribute constraint evaluation.
//!
//! A record side satisfies a node's constraints when *every* constraint
//! holds. A missing attribute fails closed. Array-valued attributes match
//! when any element matches.

use std::cmp::Ordering;

use serde_json::Value;

use crate::record::RecordNode;
use crate::spec::{AttributeConstraint, ConstraintOperator};

pub fn meets_all(constraints: &[AttributeConstraint], side: &RecordNode) -> bool {
    constraints.iter().all(|c| meets(c, side))
}

pub fn meets(constraint: &AttributeConstraint, side: &RecordNode) -> bool {
    let Some(actual) = side.attributes.get(&constraint.id) else {
        return false;
    };
    match actual {
        Value::Array(items) => items
            .iter()
            .any(|item| compare(constraint.operator, item, &constraint.value)),
        other => compare(constraint.operator, other, &constraint.value),
    }
}

fn compare(op: ConstraintOperator, actual: &Value, expected: &Value) -> bool {
    match op {
        ConstraintOperator::Eq => equals(actual, expected),
        ConstraintOperator::Gt => ordering(actual, expected) == Some(Ordering::Greater),
        ConstraintOperator::Ge => matches!(
            ordering(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        ConstraintOperator::Lt => ordering(actual, expected) == Some(Ordering::Less),
        ConstraintOperator::Le => matches!(
            ordering(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        ConstraintOperator::Unsupported => false,
    }
}

fn equals(actual: &Value, expected: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a == b;
    }
    match (as_text(actual), as_text(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => actual == expected,
    }
}

fn ordering(actual: &Value, expected: &Value) -> Option<Ordering> {
    let a = as_number(actual)?;
    let b = as_number(expected)?;
    a.partial_cmp(&b)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
