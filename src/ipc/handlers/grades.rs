use crate::grades::parse_grade_csv_with_stats;
use crate::ipc::error::ok;
use crate::ipc::handlers::setup::{
    effective_section, parse_scope, section_bool, SetupSection,
};
use crate::ipc::helpers::{get_bool_or, get_required_str, read_text_input, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::prepare::{prepare_rows, write_prepared_csv, PrepareOptions, PreparedRows};
use crate::session::GradeBatch;
use serde_json::{json, Value};
use std::fs::File;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

fn handle_grades_parse(state: &mut AppState, req: &Request) -> Value {
    let (text, source) = match read_text_input(&req.params, "csvText", "inPath") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let parsed = parse_grade_csv_with_stats(&text);
    let encrypted_detected = parsed
        .rows
        .iter()
        .any(|r| state.session.is_encrypted(&r.student_id));

    let batch = GradeBatch {
        id: Uuid::new_v4().to_string(),
        parsed_at: chrono::Utc::now(),
        source,
        rows: parsed.rows,
    };
    info!(
        batch = %batch.id,
        rows_total = parsed.rows_total,
        rows_parsed = batch.rows.len(),
        rows_dropped = parsed.rows_dropped,
        "grade csv parsed"
    );
    let result = json!({
        "batchId": batch.id,
        "parsedAt": batch.parsed_at.to_rfc3339(),
        "path": batch.source,
        "rowsTotal": parsed.rows_total,
        "rowsParsed": batch.rows.len(),
        "rowsDropped": parsed.rows_dropped,
        "encryptedDetected": encrypted_detected,
        "rows": batch.rows
    });
    state.session.batch = Some(batch);
    ok(&req.id, result)
}

fn prepare_options(state: &AppState, params: &Value) -> Result<PrepareOptions, HandlerErr> {
    let grading = effective_section(state, SetupSection::Grading);
    Ok(PrepareOptions {
        prefer_rounded: get_bool_or(
            params,
            "preferRounded",
            section_bool(&grading, "preferRounded", true),
        )?,
        include_comments: get_bool_or(
            params,
            "includeComments",
            section_bool(&grading, "includeComments", false),
        )?,
    })
}

fn prepare_current(state: &AppState, options: PrepareOptions) -> Result<PreparedRows, HandlerErr> {
    let Some(batch) = state.session.batch.as_ref() else {
        return Err(HandlerErr::new("no_batch", "parse a grade csv first"));
    };
    let Some(roster) = state.session.roster.as_ref() else {
        return Err(HandlerErr::new("no_roster", "load a roster first"));
    };
    let resolution = state.session.resolution();
    Ok(prepare_rows(&batch.rows, &resolution.mapping, roster, options))
}

fn handle_grades_prepare(state: &mut AppState, req: &Request) -> Value {
    let options = match prepare_options(state, &req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let prepared = match prepare_current(state, options) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let resolution = state.session.resolution();
    ok(
        &req.id,
        json!({
            "preferRounded": options.prefer_rounded,
            "includeComments": options.include_comments,
            "resolutionPending": resolution.pending,
            "passphraseRequired": resolution.passphrase_required,
            "counts": {
                "all": prepared.all.len(),
                "mapped": prepared.mapped.len(),
                "unmapped": prepared.unmapped.len()
            },
            "all": prepared.all,
            "mapped": prepared.mapped,
            "unmapped": prepared.unmapped
        }),
    )
}

fn write_export(path: &str, prepared: &PreparedRows, all: bool, header: bool) -> anyhow::Result<usize> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let rows = if all { &prepared.all } else { &prepared.mapped };
    let file = File::create(path)?;
    write_prepared_csv(rows, header, file)
}

fn handle_grades_export_csv(state: &mut AppState, req: &Request) -> Value {
    let out_path = match get_required_str(&req.params, "outPath") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let export = effective_section(state, SetupSection::Export);
    let scope = match req.params.get("scope") {
        None | Some(Value::Null) => export
            .get("defaultScope")
            .and_then(|v| v.as_str())
            .unwrap_or("mapped")
            .to_string(),
        Some(v) => match parse_scope(v, "scope") {
            Ok(s) => s,
            Err(msg) => return HandlerErr::new("bad_params", msg).response(&req.id),
        },
    };
    let include_header = match get_bool_or(
        &req.params,
        "includeHeader",
        section_bool(&export, "includeHeader", true),
    ) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let options = match prepare_options(state, &req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let prepared = match prepare_current(state, options) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match write_export(&out_path, &prepared, scope == "all", include_header) {
        Ok(written) => {
            info!(path = %out_path, rows = written, scope = %scope, "prepared grades exported");
            ok(
                &req.id,
                json!({
                    "path": out_path,
                    "scope": scope,
                    "rowsWritten": written,
                    "unmappedSkipped": if scope == "all" { 0 } else { prepared.unmapped.len() }
                }),
            )
        }
        Err(e) => HandlerErr::new("io_failed", format!("{e:#}"))
            .with_details(json!({ "path": out_path }))
            .response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "grades.parse" => Some(handle_grades_parse(state, req)),
        "grades.prepare" => Some(handle_grades_prepare(state, req)),
        "grades.exportCsv" => Some(handle_grades_export_csv(state, req)),
        _ => None,
    }
}
