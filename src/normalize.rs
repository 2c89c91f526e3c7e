use serde_json::Value;

/// Canonical comparison form for student identifiers: trimmed, lowercased.
pub fn normalize_identifier(raw: Option<&str>) -> String {
    match raw {
        Some(s) => s.trim().to_lowercase(),
        None => String::new(),
    }
}

/// Same as [`normalize_identifier`] for values arriving as JSON, where Canvas
/// may send ids as numbers.
pub fn normalize_json(raw: &Value) -> String {
    match raw {
        Value::String(s) => normalize_identifier(Some(s)),
        Value::Number(n) => normalize_identifier(Some(&n.to_string())),
        _ => String::new(),
    }
}

pub fn non_empty_trimmed(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}
