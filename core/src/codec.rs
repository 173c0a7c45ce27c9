//! Value codec between structured values and backend strings.
//!
//! Backends only hold strings, so the type of a stored value is inferred
//! from its text on the way back out. That inference is lossy on purpose:
//! a string that reads `"42"`, `"true"` or `"null"` comes back as the number,
//! boolean or null it looks like.

use serde_json::{Number, Value};

use crate::error::{StoreError, StoreResult};


/// Alias for logical values; `serde_json::Value` covers every supported shape.
pub type StoreValue = Value;


/// Encode a logical value into the string a backend stores.
///
/// Objects and arrays become compact JSON with key and element order kept.
/// Strings pass through untouched; numbers, booleans and null use their
/// JSON spelling.
pub fn encode(value: &StoreValue) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => value.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(true) => "true".to_string(),
        Value::Bool(false) => "false".to_string(),
        Value::Null => "null".to_string(),
    }
}


/// Decode a stored string back into a logical value.
///
/// Inference order, applied to the trimmed text:
/// 1. contains `{` or `[`: parsed as JSON; failure is `MalformedStoredValue`
/// 2. fully numeric: a number
/// 3. exactly `true` / `false` / `null`
/// 4. anything else: the trimmed string itself
pub fn decode(stored: &str) -> StoreResult<StoreValue> {
    let trimmed = stored.trim();

    if trimmed.contains('{') || trimmed.contains('[') {
        return serde_json::from_str(trimmed).map_err(|e| StoreError::malformed(stored, e));
    }

    if let Some(n) = parse_number(trimmed) {
        return Ok(Value::Number(n));
    }

    Ok(match trimmed {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        other => Value::String(other.to_string()),
    })
}


/// Decode a value that may already be native.
///
/// Strings go through [`decode`]; every other shape is returned unchanged.
pub fn decode_value(value: StoreValue) -> StoreResult<StoreValue> {
    match value {
        Value::String(s) => decode(&s),
        other => Ok(other),
    }
}


fn parse_number(text: &str) -> Option<Number> {
    if text.is_empty() {
        return None;
    }
    if let Ok(i) = text.parse::<i64>() {
        return Some(Number::from(i));
    }
    if let Ok(u) = text.parse::<u64>() {
        return Some(Number::from(u));
    }
    // f64 parsing also accepts "inf" and "NaN"; from_f64 rejects both.
    text.parse::<f64>().ok().and_then(Number::from_f64)
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
