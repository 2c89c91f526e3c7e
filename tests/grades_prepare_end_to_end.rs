mod test_support;

use serde_json::json;
use test_support::{fixture_path, request_ok, spawn_sidecar};

fn find_row<'a>(rows: &'a serde_json::Value, csv_id: &str) -> &'a serde_json::Value {
    rows.as_array()
        .expect("rows array")
        .iter()
        .find(|r| r["csvStudentId"] == json!(csv_id))
        .unwrap_or_else(|| panic!("row for {}", csv_id))
}

#[test]
fn fixture_grades_join_against_fixture_roster() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let loaded = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "roster.load",
        json!({ "inPath": fixture_path("fixtures/roster.json").to_string_lossy() }),
    );
    // The member without an id is skipped.
    assert_eq!(loaded["members"], json!(3));

    let parsed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.parse",
        json!({ "inPath": fixture_path("fixtures/grades.csv").to_string_lossy() }),
    );
    assert_eq!(parsed["rowsTotal"], json!(5));
    assert_eq!(parsed["rowsParsed"], json!(4));
    assert_eq!(parsed["rowsDropped"], json!(1));
    assert_eq!(parsed["encryptedDetected"], json!(false));
    assert_eq!(parsed["rows"][1]["studentId"], json!("GHOPPER"));

    let resolved = request_ok(&mut stdin, &mut reader, "3", "ids.resolve", json!({}));
    assert_eq!(resolved["pending"], json!(false));
    assert_eq!(resolved["encryptedDetected"], json!(false));
    assert_eq!(resolved["mapping"]["S-001"], json!("S-001"));

    let prepared = request_ok(&mut stdin, &mut reader, "4", "grades.prepare", json!({}));
    assert_eq!(prepared["preferRounded"], json!(true));
    assert_eq!(prepared["counts"]["all"], json!(4));
    assert_eq!(prepared["counts"]["mapped"], json!(3));
    assert_eq!(prepared["counts"]["unmapped"], json!(1));

    let all = &prepared["all"];
    let ada = find_row(all, "S-001");
    assert_eq!(ada["canvasId"], json!("42"));
    assert_eq!(ada["displayName"], json!("Ada Lovelace"));
    assert_eq!(ada["selectedPoints"].as_f64(), Some(88.0));
    assert_eq!(ada["totalPoints"].as_f64(), Some(87.5));
    assert!(ada["comments"].is_null());

    let grace = find_row(all, "GHOPPER");
    assert_eq!(grace["canvasId"], json!("43"));
    // Empty name falls through to short_name.
    assert_eq!(grace["displayName"], json!("Grace"));

    let alan = find_row(all, "aturing");
    assert_eq!(alan["canvasId"], json!("44"));
    assert_eq!(alan["displayName"], json!("Turing, Alan"));
    assert!(alan["selectedPoints"].is_null());
    assert!(alan["selectedPercent"].is_null());

    let unmapped = &prepared["unmapped"];
    assert_eq!(unmapped.as_array().map(|a| a.len()), Some(1));
    assert_eq!(unmapped[0]["csvStudentId"], json!("X-999"));
    assert!(unmapped[0]["canvasId"].is_null());
}

#[test]
fn prepare_flags_override_defaults_per_request() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "roster.load",
        json!({ "members": [{ "id": 42, "sis_user_id": "S-001", "name": "Ada Lovelace" }] }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.parse",
        json!({ "csvText": "student_id,total_points,rounded_total_points,remarks\nS-001,75,,check\nS-001,87.5,88,\n" }),
    );

    let raw = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.prepare",
        json!({ "preferRounded": false, "includeComments": true }),
    );
    assert_eq!(raw["all"][0]["selectedPoints"].as_f64(), Some(75.0));
    assert_eq!(raw["all"][0]["comments"], json!("check"));
    assert_eq!(raw["all"][1]["selectedPoints"].as_f64(), Some(87.5));

    let rounded = request_ok(&mut stdin, &mut reader, "4", "grades.prepare", json!({}));
    // Rounded preferred, raw used when rounded is absent.
    assert_eq!(rounded["all"][0]["selectedPoints"].as_f64(), Some(75.0));
    assert_eq!(rounded["all"][1]["selectedPoints"].as_f64(), Some(88.0));
    assert!(rounded["all"][0]["comments"].is_null());
    // Duplicate CSV rows for one student both map.
    assert_eq!(rounded["counts"]["mapped"], json!(2));
}

#[test]
fn roster_lookup_and_normalize_agree() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "roster.load",
        json!({ "members": [
            { "id": "7", "login_id": "Shared", "name": "First" },
            { "id": "8", "sis_user_id": "shared", "name": "Second" }
        ] }),
    );
    let hit = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.lookup",
        json!({ "identifier": "  SHARED " }),
    );
    // Later members win alias collisions.
    assert_eq!(hit["canvasId"], json!("8"));
    assert_eq!(hit["displayName"], json!("Second"));

    let miss = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "roster.lookup",
        json!({ "identifier": "nobody" }),
    );
    assert!(miss["canvasId"].is_null());

    let normalized = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "ids.normalize",
        json!({ "identifier": 12345 }),
    );
    assert_eq!(normalized["normalized"], json!("12345"));
}
