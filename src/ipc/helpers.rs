use crate::ipc::error::err;
use serde_json::{json, Value};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(HandlerErr::new(
            "bad_params",
            format!("{} must be string or null", key),
        )),
    }
}

/// Explicit request flag, else the configured default.
pub fn get_bool_or(params: &Value, key: &str, default: bool) -> Result<bool, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(HandlerErr::new(
            "bad_params",
            format!("{} must be boolean", key),
        )),
    }
}

/// Inline text from `textKey`, or the contents of the file named by `pathKey`.
pub fn read_text_input(
    params: &Value,
    text_key: &str,
    path_key: &str,
) -> Result<(String, Option<String>), HandlerErr> {
    if let Some(text) = params.get(text_key).and_then(|v| v.as_str()) {
        return Ok((text.to_string(), None));
    }
    let path = get_required_str(params, path_key).map_err(|_| {
        HandlerErr::new(
            "bad_params",
            format!("missing {} or {}", text_key, path_key),
        )
    })?;
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok((text, Some(path))),
        Err(e) => Err(HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": path }))),
    }
}
