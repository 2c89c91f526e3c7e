use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::session::{DEFAULT_CACHE_CAPACITY, DEFAULT_WORKER_THREADS};
use serde_json::{json, Map, Value};
use tracing::warn;

#[derive(Clone, Copy)]
pub enum SetupSection {
    Grading,
    Decryption,
    Export,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "decryption" => Some(Self::Decryption),
            "export" => Some(Self::Export),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Decryption => "setup.decryption",
            Self::Export => "setup.export",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "preferRounded": true,
            "includeComments": false
        }),
        SetupSection::Decryption => json!({
            "cacheCapacity": DEFAULT_CACHE_CAPACITY,
            "workerThreads": DEFAULT_WORKER_THREADS
        }),
        SetupSection::Export => json!({
            "defaultScope": "mapped",
            "includeHeader": true
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

pub fn parse_scope(v: &Value, key: &str) -> Result<String, String> {
    let s = v
        .as_str()
        .ok_or_else(|| format!("{} must be string", key))?
        .trim()
        .to_ascii_lowercase();
    if s != "mapped" && s != "all" {
        return Err(format!("{} must be one of: mapped, all", key));
    }
    Ok(s)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "preferRounded" | "includeComments" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Decryption => match k.as_str() {
                "cacheCapacity" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 16, 100_000)?));
                }
                "workerThreads" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 32)?));
                }
                _ => return Err(format!("unknown decryption field: {}", k)),
            },
            SetupSection::Export => match k.as_str() {
                "defaultScope" => {
                    obj.insert(k.clone(), Value::String(parse_scope(v, k)?));
                }
                "includeHeader" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown export field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values fall back to defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

/// Saved section when a workspace is open, defaults otherwise.
pub fn effective_section(state: &AppState, section: SetupSection) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return default_section(section);
    };
    match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => {
            warn!(section = section.key(), error = %e, "setup section unreadable; using defaults");
            default_section(section)
        }
    }
}

pub fn section_bool(section: &Value, key: &str, default: bool) -> bool {
    section.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub fn section_usize(section: &Value, key: &str, default: usize) -> usize {
    section
        .get(key)
        .and_then(|v| v.as_u64())
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(default)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let grading = match load_section(conn, SetupSection::Grading) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let decryption = match load_section(conn, SetupSection::Decryption) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let export = match load_section(conn, SetupSection::Export) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "grading": grading,
            "decryption": decryption,
            "export": export
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true, "section": section_raw, "values": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_validates_ranges_and_unknown_fields() {
        let mut current = default_section(SetupSection::Decryption);
        let patch = json!({ "cacheCapacity": 64 });
        merge_section_patch(
            SetupSection::Decryption,
            &mut current,
            patch.as_object().expect("object"),
        )
        .expect("valid patch");
        assert_eq!(current["cacheCapacity"], json!(64));

        let too_small = json!({ "cacheCapacity": 1 });
        assert!(merge_section_patch(
            SetupSection::Decryption,
            &mut current,
            too_small.as_object().expect("object"),
        )
        .is_err());

        let unknown = json!({ "colour": "red" });
        assert!(merge_section_patch(
            SetupSection::Grading,
            &mut current,
            unknown.as_object().expect("object"),
        )
        .is_err());
    }

    #[test]
    fn export_scope_is_normalized() {
        let mut current = default_section(SetupSection::Export);
        let patch = json!({ "defaultScope": " ALL " });
        merge_section_patch(
            SetupSection::Export,
            &mut current,
            patch.as_object().expect("object"),
        )
        .expect("valid patch");
        assert_eq!(current["defaultScope"], json!("all"));
        assert!(parse_scope(&json!("some"), "scope").is_err());
    }
}
