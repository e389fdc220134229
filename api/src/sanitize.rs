//! Masking of credential-like fields before request payloads reach the logs.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

const REDACTED: &str = "[REDACTED]";
const SECRET_KEYS: &[&str] = &["password", "token", "secret", "key"];

static EMAIL_LOCAL_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.{2}).*@").expect("email mask pattern is valid"));

/// Return a copy of `value` with secrets redacted and contact details masked.
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(sanitize_object(map)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        other => other.clone(),
    }
}

fn sanitize_object(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| {
            let lowered = key.to_ascii_lowercase();
            let masked = if SECRET_KEYS.iter().any(|s| lowered.contains(s)) {
                Value::String(REDACTED.to_string())
            } else if lowered.contains("email") {
                mask_string(value, mask_email)
            } else if lowered.contains("phone") {
                mask_string(value, mask_phone)
            } else {
                sanitize(value)
            };
            (key.clone(), masked)
        })
        .collect()
}

fn mask_string(value: &Value, mask: fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(mask(s)),
        other => sanitize(other),
    }
}

fn mask_email(email: &str) -> String {
    EMAIL_LOCAL_PART.replace(email, "$1***@").into_owned()
}

/// Keep only the last two characters.
fn mask_phone(phone: &str) -> String {
    let count = phone.chars().count();
    phone
        .chars()
        .enumerate()
        .map(|(i, c)| if i + 2 < count { '*' } else { c })
        .collect()
}
