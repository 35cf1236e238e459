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

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

struct Class {
    staff_id: String,
    subject_id: String,
    student_a: String,
    student_b: String,
}

/// One class with two students so the default-to-Absent rule is observable.
fn seed_two_student_class(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Class {
    let dept = request_ok(
        stdin,
        reader,
        "s1",
        "departments.create",
        json!({ "name": "Civil Engineering", "code": "CE" }),
    );
    let dept_id = dept["departmentId"].as_str().expect("departmentId").to_string();
    let staff = request_ok(
        stdin,
        reader,
        "s2",
        "staff.create",
        json!({ "name": "M. Devi", "departmentId": dept_id }),
    );
    let staff_id = staff["staffId"].as_str().expect("staffId").to_string();

    let a = request_ok(
        stdin,
        reader,
        "s3",
        "students.create",
        json!({
            "registerNo": "CE2401",
            "name": "First Student",
            "departmentId": dept_id,
            "currentYear": 1,
            "batch": "I Batch"
        }),
    );
    let b = request_ok(
        stdin,
        reader,
        "s4",
        "students.create",
        json!({
            "registerNo": "CE2402",
            "name": "Second Student",
            "departmentId": dept_id,
            "currentYear": 1,
            "batch": "I Batch"
        }),
    );

    let subject = request_ok(
        stdin,
        reader,
        "s5",
        "subjects.create",
        json!({
            "name": "Surveying",
            "code": "CE104",
            "departmentId": dept_id,
            "year": 1,
            "batch": "I Batch",
            "staffId": staff_id
        }),
    );

    Class {
        staff_id,
        subject_id: subject["subjectId"].as_str().expect("subjectId").to_string(),
        student_a: a["studentId"].as_str().expect("studentId").to_string(),
        student_b: b["studentId"].as_str().expect("studentId").to_string(),
    }
}

fn history_len(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student_id: &str,
) -> usize {
    let result = request_ok(
        stdin,
        reader,
        id,
        "attendance.history",
        json!({ "studentId": student_id }),
    );
    result["history"].as_array().expect("history").len()
}

#[test]
fn second_mark_for_same_subject_and_date_is_rejected() {
    let workspace = temp_dir("rollcall-mark-oneshot");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "w",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = seed_two_student_class(&mut stdin, &mut reader);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "attendance.mark",
        json!({
            "principal": { "role": "staff", "staffId": class.staff_id },
            "subjectId": class.subject_id,
            "date": "2026-04-06",
            "statuses": {
                class.student_a.clone(): "Present",
                class.student_b.clone(): "Absent"
            }
        }),
    );
    assert_eq!(first["inserted"].as_u64(), Some(2));

    let second = request(
        &mut stdin,
        &mut reader,
        "m2",
        "attendance.mark",
        json!({
            "principal": { "role": "staff", "staffId": class.staff_id },
            "subjectId": class.subject_id,
            "date": "2026-04-06",
            "statuses": {
                class.student_a.clone(): "Absent",
                class.student_b.clone(): "Present"
            }
        }),
    );
    assert_eq!(second["ok"].as_bool(), Some(false));
    assert_eq!(error_code(&second), "already_marked");

    // Only the first batch landed; the second inserted zero rows.
    assert_eq!(history_len(&mut stdin, &mut reader, "h1", &class.student_a), 1);
    assert_eq!(history_len(&mut stdin, &mut reader, "h2", &class.student_b), 1);
    let history = request_ok(
        &mut stdin,
        &mut reader,
        "h3",
        "attendance.history",
        json!({ "studentId": class.student_a }),
    );
    assert_eq!(history["history"][0]["status"].as_str(), Some("Present"));

    // A different date for the same subject is a fresh session.
    let next_day = request_ok(
        &mut stdin,
        &mut reader,
        "m3",
        "attendance.mark",
        json!({
            "principal": { "role": "staff", "staffId": class.staff_id },
            "subjectId": class.subject_id,
            "date": "2026-04-07",
            "statuses": {
                class.student_a.clone(): "Present",
                class.student_b.clone(): "Present"
            }
        }),
    );
    assert_eq!(next_day["inserted"].as_u64(), Some(2));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn unspecified_roster_students_are_recorded_absent() {
    let workspace = temp_dir("rollcall-mark-default-absent");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "w",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = seed_two_student_class(&mut stdin, &mut reader);

    // Only student A appears in the form; B must land as Absent.
    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "attendance.mark",
        json!({
            "principal": { "role": "staff", "staffId": class.staff_id },
            "subjectId": class.subject_id,
            "date": "2026-04-06",
            "statuses": { class.student_a.clone(): "Present" }
        }),
    );
    assert_eq!(marked["inserted"].as_u64(), Some(2));

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "h",
        "attendance.history",
        json!({ "studentId": class.student_b }),
    );
    assert_eq!(history["history"].as_array().expect("history").len(), 1);
    assert_eq!(history["history"][0]["status"].as_str(), Some("Absent"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn malformed_input_rejects_the_whole_batch() {
    let workspace = temp_dir("rollcall-mark-bad-input");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "w",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = seed_two_student_class(&mut stdin, &mut reader);

    let bad_status = request(
        &mut stdin,
        &mut reader,
        "m1",
        "attendance.mark",
        json!({
            "principal": { "role": "staff", "staffId": class.staff_id },
            "subjectId": class.subject_id,
            "date": "2026-04-06",
            "statuses": { class.student_a.clone(): "Late" }
        }),
    );
    assert_eq!(error_code(&bad_status), "bad_params");

    let bad_date = request(
        &mut stdin,
        &mut reader,
        "m2",
        "attendance.mark",
        json!({
            "principal": { "role": "staff", "staffId": class.staff_id },
            "subjectId": class.subject_id,
            "date": "06-04-2026",
            "statuses": { class.student_a.clone(): "Present" }
        }),
    );
    assert_eq!(error_code(&bad_date), "bad_params");

    // Nothing landed.
    assert_eq!(history_len(&mut stdin, &mut reader, "h1", &class.student_a), 0);
    assert_eq!(history_len(&mut stdin, &mut reader, "h2", &class.student_b), 0);

    drop(stdin);
    let _ = child.wait();
}
