use crate::grades::GradeRow;
use crate::roster::RosterSnapshot;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareOptions {
    pub prefer_rounded: bool,
    pub include_comments: bool,
}

/// A grade row joined to at most one roster member.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedRow {
    pub csv_student_id: String,
    pub decrypted_student_id: String,
    pub canvas_id: Option<String>,
    pub display_name: Option<String>,
    pub selected_points: Option<f64>,
    pub selected_max_points: Option<f64>,
    pub selected_percent: Option<f64>,
    pub total_points: Option<f64>,
    pub rounded_total_points: Option<f64>,
    pub total_max_points: Option<f64>,
    pub rounded_total_max_points: Option<f64>,
    pub total_percent: Option<f64>,
    pub rounded_total_percent: Option<f64>,
    pub comments: Option<String>,
}

impl PreparedRow {
    pub fn is_mapped(&self) -> bool {
        self.canvas_id.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreparedRows {
    pub all: Vec<PreparedRow>,
    pub mapped: Vec<PreparedRow>,
    pub unmapped: Vec<PreparedRow>,
}

/// Preferred value, falling back to the other variant when absent.
pub fn pick_value(prefer_rounded: bool, raw: Option<f64>, rounded: Option<f64>) -> Option<f64> {
    if prefer_rounded {
        rounded.or(raw)
    } else {
        raw.or(rounded)
    }
}

pub fn prepare_row(
    row: &GradeRow,
    decrypted_ids: &HashMap<String, String>,
    roster: &RosterSnapshot,
    options: PrepareOptions,
) -> PreparedRow {
    let decrypted = decrypted_ids
        .get(&row.student_id)
        .cloned()
        .unwrap_or_else(|| row.student_id.clone());
    let canvas_id = roster.index().lookup(&decrypted).map(str::to_string);
    let display_name = canvas_id
        .as_deref()
        .and_then(|id| roster.member(id))
        .and_then(|m| m.display_name());
    let pick = |raw, rounded| pick_value(options.prefer_rounded, raw, rounded);

    PreparedRow {
        csv_student_id: row.student_id.clone(),
        decrypted_student_id: decrypted,
        canvas_id,
        display_name,
        selected_points: pick(row.total_points, row.rounded_total_points),
        selected_max_points: pick(row.total_max_points, row.rounded_total_max_points),
        selected_percent: pick(row.total_percent, row.rounded_total_percent),
        total_points: row.total_points,
        rounded_total_points: row.rounded_total_points,
        total_max_points: row.total_max_points,
        rounded_total_max_points: row.rounded_total_max_points,
        total_percent: row.total_percent,
        rounded_total_percent: row.rounded_total_percent,
        comments: if options.include_comments {
            row.remarks.clone()
        } else {
            None
        },
    }
}

pub fn prepare_rows(
    rows: &[GradeRow],
    decrypted_ids: &HashMap<String, String>,
    roster: &RosterSnapshot,
    options: PrepareOptions,
) -> PreparedRows {
    let all: Vec<PreparedRow> = rows
        .iter()
        .map(|row| prepare_row(row, decrypted_ids, roster, options))
        .collect();
    let (mapped, unmapped): (Vec<_>, Vec<_>) = all.iter().cloned().partition(PreparedRow::is_mapped);
    PreparedRows {
        all,
        mapped,
        unmapped,
    }
}

fn fmt_number(v: Option<f64>) -> String {
    v.map(|n| n.to_string()).unwrap_or_default()
}

/// Writes rows for the downstream LMS push. Returns the number of data rows.
pub fn write_prepared_csv<W: Write>(
    rows: &[PreparedRow],
    include_header: bool,
    out: W,
) -> anyhow::Result<usize> {
    let mut writer = csv::Writer::from_writer(out);
    if include_header {
        writer.write_record([
            "canvas_id",
            "student_id",
            "display_name",
            "points",
            "max_points",
            "percent",
            "comments",
        ])?;
    }
    for row in rows {
        writer.write_record([
            row.canvas_id.clone().unwrap_or_default(),
            row.decrypted_student_id.clone(),
            row.display_name.clone().unwrap_or_default(),
            fmt_number(row.selected_points),
            fmt_number(row.selected_max_points),
            fmt_number(row.selected_percent),
            row.comments.clone().unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(rows.len())
}
