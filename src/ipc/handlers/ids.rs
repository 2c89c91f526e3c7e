use crate::ipc::error::ok;
use crate::ipc::handlers::setup::{effective_section, section_usize, SetupSection};
use crate::ipc::helpers::{get_bool_or, get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::normalize::normalize_json;
use crate::session::{ResolutionState, DEFAULT_CACHE_CAPACITY, DEFAULT_WORKER_THREADS};
use serde_json::{json, Map, Value};

fn parse_values(params: &Value) -> Result<Option<Vec<String>>, HandlerErr> {
    let Some(raw) = params.get("values") else {
        return Ok(None);
    };
    let Some(arr) = raw.as_array() else {
        return Err(HandlerErr::new("bad_params", "values must be an array"));
    };
    let mut out = Vec::with_capacity(arr.len());
    for v in arr {
        match v {
            Value::String(s) => out.push(s.clone()),
            Value::Number(n) => out.push(n.to_string()),
            Value::Null => {}
            _ => {
                return Err(HandlerErr::new(
                    "bad_params",
                    "values must hold strings or numbers",
                ))
            }
        }
    }
    Ok(Some(out))
}

fn state_json(state: &ResolutionState) -> Value {
    let mapping: Map<String, Value> = state
        .mapping
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    json!({
        "generation": state.generation,
        "pending": state.pending,
        "encryptedDetected": state.encrypted_detected,
        "passphraseRequired": state.passphrase_required,
        "promptIssued": state.prompt_issued,
        "failed": state.failed,
        "mapping": mapping
    })
}

fn handle_ids_resolve(state: &mut AppState, req: &Request) -> Value {
    let values = match parse_values(&req.params) {
        Ok(Some(v)) => v,
        Ok(None) => match state.session.batch.as_ref() {
            Some(batch) => batch.student_ids(),
            None => {
                return HandlerErr::new("no_batch", "parse a grade csv or pass values")
                    .response(&req.id)
            }
        },
        Err(e) => return e.response(&req.id),
    };
    let passphrase = match get_optional_str(&req.params, "passphrase") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let wait = match get_bool_or(&req.params, "wait", true) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let decryption = effective_section(state, SetupSection::Decryption);
    state.session.configure(
        section_usize(&decryption, "cacheCapacity", DEFAULT_CACHE_CAPACITY),
        section_usize(&decryption, "workerThreads", DEFAULT_WORKER_THREADS),
    );

    let generation = state.session.start_resolution(values, passphrase, wait);
    let mut result = state_json(&state.session.resolution());
    result["generation"] = json!(generation);
    ok(&req.id, result)
}

fn handle_ids_status(state: &mut AppState, req: &Request) -> Value {
    let mut result = state_json(&state.session.resolution());
    result["currentGeneration"] = json!(state.session.current_generation());
    ok(&req.id, result)
}

fn handle_ids_encrypt(state: &mut AppState, req: &Request) -> Value {
    let values = match parse_values(&req.params) {
        Ok(Some(v)) => v,
        Ok(None) => return HandlerErr::new("bad_params", "missing values").response(&req.id),
        Err(e) => return e.response(&req.id),
    };
    let passphrase = match get_required_str(&req.params, "passphrase") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match state.session.cipher().encrypt_batch(&values, &passphrase) {
        Ok(pairs) => {
            let mapping: Map<String, Value> = pairs
                .into_iter()
                .map(|(plain, token)| (plain, Value::String(token)))
                .collect();
            ok(&req.id, json!({ "mapping": mapping }))
        }
        Err(e) => HandlerErr::new("crypto_failed", e.to_string()).response(&req.id),
    }
}

fn handle_ids_normalize(_state: &mut AppState, req: &Request) -> Value {
    let Some(identifier) = req.params.get("identifier") else {
        return HandlerErr::new("bad_params", "missing identifier").response(&req.id);
    };
    ok(&req.id, json!({ "normalized": normalize_json(identifier) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "ids.resolve" => Some(handle_ids_resolve(state, req)),
        "ids.status" => Some(handle_ids_status(state, req)),
        "ids.encrypt" => Some(handle_ids_encrypt(state, req)),
        "ids.normalize" => Some(handle_ids_normalize(state, req)),
        _ => None,
    }
}
