//! Structural equality over JSON-shaped values.
//!
//! Used to decide whether a re-submitted answer actually changed. Unlike
//! `Value`'s own `PartialEq`, numbers compare by numeric value, so `1` and
//! `1.0` are the same answer.

use serde_json::{Number, Value};

/// Deep equality: objects compare key-by-key regardless of key order,
/// arrays element-by-element, numbers by value.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| deep_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(key, l)| y.get(key).is_some_and(|r| deep_equal(l, r)))
        }
        _ => a == b,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    if let (Some(l), Some(r)) = (x.as_i64(), y.as_i64()) {
        return l == r;
    }
    if let (Some(l), Some(r)) = (x.as_u64(), y.as_u64()) {
        return l == r;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

/// Whether `submitted` differs from what is stored (nothing stored counts
/// as different).
pub fn answer_changed(stored: Option<&Value>, submitted: &Value) -> bool {
    stored.map_or(true, |stored| !deep_equal(stored, submitted))
}
