use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rollcalld");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollcalld");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "request {} failed: {}",
        id,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Class {
    subject_id: String,
    student_id: String,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Class {
    let dept = request_ok(
        stdin,
        reader,
        "s1",
        "departments.create",
        json!({ "name": "Physics", "code": "PH" }),
    );
    let dept_id = dept["departmentId"].as_str().expect("departmentId").to_string();
    let student = request_ok(
        stdin,
        reader,
        "s2",
        "students.create",
        json!({
            "registerNo": "PH2401",
            "name": "T. Meena",
            "departmentId": dept_id,
            "currentYear": 3,
            "batch": "II Batch"
        }),
    );
    let subject = request_ok(
        stdin,
        reader,
        "s3",
        "subjects.create",
        json!({
            "name": "Optics",
            "code": "PH305",
            "departmentId": dept_id,
            "year": 3,
            "batch": "II Batch"
        }),
    );
    Class {
        subject_id: subject["subjectId"].as_str().expect("subjectId").to_string(),
        student_id: student["studentId"].as_str().expect("studentId").to_string(),
    }
}

#[test]
fn repeated_corrections_leave_exactly_one_row_with_latest_status() {
    let workspace = temp_dir("rollcall-correct-upsert");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "w",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = seed(&mut stdin, &mut reader);

    // No prior marking: the correction inserts the missing record.
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "attendance.correct",
        json!({
            "principal": { "role": "admin" },
            "subjectId": class.subject_id,
            "date": "2026-05-11",
            "statuses": { class.student_id.clone(): "Absent" }
        }),
    );
    assert_eq!(first["upserted"].as_u64(), Some(1));

    // Same key again: overwrite, not duplicate, no already-marked gate.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "c2",
        "attendance.correct",
        json!({
            "principal": { "role": "admin" },
            "subjectId": class.subject_id,
            "date": "2026-05-11",
            "statuses": { class.student_id.clone(): "Present" }
        }),
    );
    assert_eq!(second["upserted"].as_u64(), Some(1));

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "h",
        "attendance.history",
        json!({ "studentId": class.student_id }),
    );
    let rows = history["history"].as_array().expect("history");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"].as_str(), Some("Present"));

    let pct = request_ok(
        &mut stdin,
        &mut reader,
        "p",
        "percentage.student",
        json!({ "studentId": class.student_id }),
    );
    assert_eq!(pct["calculated"].as_f64(), Some(100.0));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn correction_requires_the_admin_role() {
    let workspace = temp_dir("rollcall-correct-admin-only");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "w",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = seed(&mut stdin, &mut reader);

    let denied = request(
        &mut stdin,
        &mut reader,
        "c1",
        "attendance.correct",
        json!({
            "principal": { "role": "staff", "staffId": "whoever" },
            "subjectId": class.subject_id,
            "date": "2026-05-11",
            "statuses": { class.student_id.clone(): "Present" }
        }),
    );
    assert_eq!(denied["ok"].as_bool(), Some(false));
    assert_eq!(
        denied["error"]["code"].as_str(),
        Some("denied"),
        "staff must not reach the correction path: {}",
        denied
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn correction_for_missing_subject_is_not_found() {
    let workspace = temp_dir("rollcall-correct-missing");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "w",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = seed(&mut stdin, &mut reader);

    let missing = request(
        &mut stdin,
        &mut reader,
        "c1",
        "attendance.correct",
        json!({
            "principal": { "role": "admin" },
            "subjectId": "no-such-subject",
            "date": "2026-05-11",
            "statuses": { class.student_id.clone(): "Present" }
        }),
    );
    assert_eq!(missing["error"]["code"].as_str(), Some("not_found"));

    drop(stdin);
    let _ = child.wait();
}
