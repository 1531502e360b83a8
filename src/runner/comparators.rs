//! Generic comparators used by `expect` and by the DOM matchers.
//!
//! Subjects are `Option<&Value>`, `None` standing for "undefined" (a path
//! that resolved to nothing), which is distinct from JSON `null`.

use regex::Regex;
use serde_json::Value;

use super::error::StepError;

/// Outcome of one comparison, before negation is applied
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub pass: bool,
    pub message: String,
}

/// Split `not.toBe` into `(true, "toBe")`
pub fn parse_comparator(name: &str) -> (bool, &str) {
    match name.strip_prefix("not.") {
        Some(rest) => (true, rest),
        None => (false, name),
    }
}

pub fn compare(
    name: &str,
    received: Option<&Value>,
    expected: Option<&Value>,
    negated: bool,
) -> Result<MatchResult, StepError> {
    let pass = match name {
        "toBe" => both(received, expected, strict_eq),
        "toEqual" | "toStrictEqual" => both(received, expected, deep_eq),
        "toBeTruthy" => received.map_or(false, truthy),
        "toBeFalsy" => !received.map_or(false, truthy),
        "toBeNull" => matches!(received, Some(Value::Null)),
        "toBeUndefined" => received.is_none(),
        "toBeDefined" => received.is_some(),
        "toContain" => both(received, expected, contains),
        "toContainEqual" => match (received, expected) {
            (Some(Value::Array(items)), Some(e)) => items.iter().any(|i| deep_eq(i, e)),
            _ => false,
        },
        "toMatch" => to_match(received, expected)?,
        "toHaveLength" => match (received.and_then(length), expected.and_then(Value::as_f64)) {
            (Some(len), Some(want)) => len as f64 == want,
            _ => false,
        },
        "toHaveProperty" => has_property(received, expected),
        "toBeGreaterThan" => numeric(received, expected, |r, e| r > e),
        "toBeGreaterThanOrEqual" => numeric(received, expected, |r, e| r >= e),
        "toBeLessThan" => numeric(received, expected, |r, e| r < e),
        "toBeLessThanOrEqual" => numeric(received, expected, |r, e| r <= e),
        "toBeCloseTo" => close_to(received, expected),
        other => {
            return Err(StepError::Assertion(format!("Unknown matcher '{}'", other)));
        }
    };

    Ok(MatchResult {
        pass,
        message: describe(name, received, expected, negated),
    })
}

fn describe(name: &str, received: Option<&Value>, expected: Option<&Value>, negated: bool) -> String {
    let not = if negated { "not." } else { "" };
    let mut message = format!("expect(received).{}{}(expected)\n\n", not, name);
    if let Some(expected) = expected {
        message.push_str(&format!(
            "Expected: {}{}\n",
            if negated { "not " } else { "" },
            display(Some(expected))
        ));
    }
    message.push_str(&format!("Received: {}", display(received)));
    message
}

pub fn display(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(v) => v.to_string(),
    }
}

fn both(received: Option<&Value>, expected: Option<&Value>, f: fn(&Value, &Value) -> bool) -> bool {
    match (received, expected) {
        (Some(r), Some(e)) => f(r, e),
        (None, None) => true,
        _ => false,
    }
}

/// Equality of primitives, numbers compared by value so `200` equals `200.0`
pub fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

pub fn deep_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(i, j)| deep_eq(i, j))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).map_or(false, |w| deep_eq(v, w)))
        }
        _ => strict_eq(a, b),
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn contains(received: &Value, expected: &Value) -> bool {
    match (received, expected) {
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
        (Value::String(haystack), other) => haystack.contains(&other.to_string()),
        (Value::Array(items), item) => items.iter().any(|i| strict_eq(i, item)),
        _ => false,
    }
}

fn to_match(received: Option<&Value>, expected: Option<&Value>) -> Result<bool, StepError> {
    let (Some(Value::String(text)), Some(Value::String(pattern))) = (received, expected) else {
        return Ok(false);
    };
    let re = Regex::new(pattern)
        .map_err(|e| StepError::Assertion(format!("Invalid pattern '{}': {}", pattern, e)))?;
    Ok(re.is_match(text))
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

/// `expected` is a path, or `[path, value]` to also check the value
fn has_property(received: Option<&Value>, expected: Option<&Value>) -> bool {
    let Some(received) = received else {
        return false;
    };
    match expected {
        Some(Value::String(path)) => lookup(received, path).is_some(),
        Some(Value::Array(pair)) => match (pair.first().and_then(Value::as_str), pair.get(1)) {
            (Some(path), Some(value)) => lookup(received, path).map_or(false, |v| deep_eq(&v, value)),
            (Some(path), None) => lookup(received, path).is_some(),
            _ => false,
        },
        _ => false,
    }
}

fn numeric(received: Option<&Value>, expected: Option<&Value>, op: fn(f64, f64) -> bool) -> bool {
    match (received.and_then(Value::as_f64), expected.and_then(Value::as_f64)) {
        (Some(r), Some(e)) => op(r, e),
        _ => false,
    }
}

const MAX_CLOSE_DIGITS: i64 = 20;

/// `expected` is a number, or `[number, digits]`; digits default to 2
fn close_to(received: Option<&Value>, expected: Option<&Value>) -> bool {
    let (target, digits) = match expected {
        Some(Value::Array(pair)) => (
            pair.first().and_then(Value::as_f64),
            pair.get(1).and_then(Value::as_i64).unwrap_or(2),
        ),
        Some(v) => (v.as_f64(), 2),
        None => (None, 2),
    };
    match (received.and_then(Value::as_f64), target) {
        (Some(r), Some(t)) => {
            // Beyond f64 precision either way
            let digits = digits.clamp(-MAX_CLOSE_DIGITS, MAX_CLOSE_DIGITS) as i32;
            (r - t).abs() < 10f64.powi(-digits) / 2.0
        }
        _ => false,
    }
}

/// Resolve a dotted path (`data.items.0.id`, `data.items[0].id`).
///
/// `length` resolves on arrays and strings. An empty path is the root.
pub fn lookup(root: &Value, path: &str) -> Option<Value> {
    let normalized = path.replace('[', ".").replace(']', "");
    let mut current = root.clone();

    for segment in normalized.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(mut map) => map.remove(segment)?,
            Value::Array(mut items) => {
                if segment == "length" {
                    Value::from(items.len())
                } else {
                    let index: usize = segment.parse().ok()?;
                    if index >= items.len() {
                        return None;
                    }
                    items.swap_remove(index)
                }
            }
            Value::String(s) if segment == "length" => Value::from(s.chars().count()),
            _ => return None,
        };
    }
    Some(current)
}
