//! Header configuration parsing.
//!
//! Hosting systems hand headers over either as a ready key-value mapping or
//! as a JSON-encoded string. Both decode to a flat `String -> String` map;
//! absent or empty input means no custom headers. Parsed once at chain
//! build time, never mutated afterward.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{ApiChainError, Result};

/// Decode a headers value (JSON object or JSON-encoded string) into a map.
pub fn parse_headers(value: &Value) -> Result<HashMap<String, String>> {
    match value {
        Value::Null => Ok(HashMap::new()),
        Value::Object(map) => {
            let mut headers = HashMap::with_capacity(map.len());
            for (key, val) in map {
                headers.insert(key.clone(), header_value_to_string(val));
            }
            Ok(headers)
        }
        Value::String(s) => parse_headers_str(s),
        other => Err(ApiChainError::InvalidConfig(format!(
            "headers must be an object or JSON string, got {}",
            other
        ))),
    }
}

/// Decode a JSON-encoded headers string. Empty/blank input means no headers.
pub fn parse_headers_str(s: &str) -> Result<HashMap<String, String>> {
    if s.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let value: Value = serde_json::from_str(s)?;
    match value {
        Value::Object(_) => parse_headers(&value),
        other => Err(ApiChainError::InvalidConfig(format!(
            "headers string must decode to a JSON object, got {}",
            other
        ))),
    }
}

fn header_value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
