use crate::normalize::non_empty_trimmed;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use tracing::debug;

/// One decoded row of an uploaded grade sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRow {
    pub student_id: String,
    pub total_points: Option<f64>,
    pub total_max_points: Option<f64>,
    pub rounded_total_points: Option<f64>,
    pub rounded_total_max_points: Option<f64>,
    pub total_percent: Option<f64>,
    pub rounded_total_percent: Option<f64>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedGrades {
    pub rows: Vec<GradeRow>,
    /// Data records seen after the header, including dropped ones.
    pub rows_total: usize,
    pub rows_dropped: usize,
}

struct Columns {
    student_id: Option<usize>,
    student_id_alt: Option<usize>,
    total_points: Option<usize>,
    total_max_points: Option<usize>,
    rounded_total_points: Option<usize>,
    rounded_total_max_points: Option<usize>,
    total_percent: Option<usize>,
    rounded_total_percent: Option<usize>,
    remarks: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Self {
        let find = |name: &str| headers.iter().position(|h| h == name);
        Self {
            student_id: find("student_id"),
            student_id_alt: find("studentId"),
            total_points: find("total_points"),
            total_max_points: find("total_max_points"),
            rounded_total_points: find("rounded_total_points"),
            rounded_total_max_points: find("rounded_total_max_points"),
            total_percent: find("total_percent"),
            rounded_total_percent: find("rounded_total_percent"),
            remarks: find("remarks"),
        }
    }
}

fn field<'r>(record: &'r StringRecord, col: Option<usize>) -> Option<&'r str> {
    col.and_then(|i| record.get(i))
}

/// Trimmed finite number, or absent. Empty text is absent, not zero.
pub fn parse_number(raw: Option<&str>) -> Option<f64> {
    let t = raw?.trim();
    if t.is_empty() {
        return None;
    }
    t.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_grade_csv_with_stats(text: &str) -> ParsedGrades {
    let mut parsed = ParsedGrades::default();
    if text.trim().is_empty() {
        return parsed;
    }

    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());
    let columns = match reader.headers() {
        Ok(h) => Columns::from_headers(h),
        Err(e) => {
            debug!(error = %e, "grade csv header unreadable");
            return parsed;
        }
    };

    for (i, record) in reader.records().enumerate() {
        parsed.rows_total += 1;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                debug!(record = i + 1, error = %e, "skipping undecodable grade record");
                parsed.rows_dropped += 1;
                continue;
            }
        };

        let student_id = [columns.student_id, columns.student_id_alt]
            .into_iter()
            .find_map(|col| field(&record, col).and_then(non_empty_trimmed));
        let Some(student_id) = student_id else {
            parsed.rows_dropped += 1;
            continue;
        };

        parsed.rows.push(GradeRow {
            student_id,
            total_points: parse_number(field(&record, columns.total_points)),
            total_max_points: parse_number(field(&record, columns.total_max_points)),
            rounded_total_points: parse_number(field(&record, columns.rounded_total_points)),
            rounded_total_max_points: parse_number(field(
                &record,
                columns.rounded_total_max_points,
            )),
            total_percent: parse_number(field(&record, columns.total_percent)),
            rounded_total_percent: parse_number(field(&record, columns.rounded_total_percent)),
            remarks: field(&record, columns.remarks).and_then(non_empty_trimmed),
        });
    }

    parsed
}
