use crate::calc::{self, AttendanceStatus};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::scope::{self, Principal, ScopeError};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

impl From<ScopeError> for HandlerErr {
    fn from(e: ScopeError) -> Self {
        match e {
            ScopeError::NotFound => HandlerErr {
                code: "not_found",
                message: "subject not found".to_string(),
                details: None,
            },
            ScopeError::Denied(reason) => HandlerErr {
                code: "denied",
                message: format!("access denied: {}", reason),
                details: None,
            },
            ScopeError::Db(e) => db_err(e),
        }
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn parse_principal(params: &serde_json::Value) -> Result<Principal, HandlerErr> {
    Principal::from_params(params).map_err(|message| HandlerErr {
        code: "bad_params",
        message,
        details: None,
    })
}

fn parse_date(raw: &str) -> Result<String, HandlerErr> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| HandlerErr {
        code: "bad_params",
        message: "date must be YYYY-MM-DD".to_string(),
        details: None,
    })?;
    Ok(date.format("%Y-%m-%d").to_string())
}

/// Explicit per-student statuses from `params.statuses`. A key that is
/// present but not a recognized status string rejects the whole request.
fn parse_statuses(
    params: &serde_json::Value,
) -> Result<HashMap<String, AttendanceStatus>, HandlerErr> {
    let Some(obj) = params.get("statuses").and_then(|v| v.as_object()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing statuses".to_string(),
            details: None,
        });
    };
    let mut out = HashMap::new();
    for (student_id, value) in obj {
        let Some(s) = value.as_str() else {
            return Err(HandlerErr {
                code: "bad_params",
                message: format!("status for {} must be a string", student_id),
                details: None,
            });
        };
        let Some(status) = AttendanceStatus::parse(s) else {
            return Err(HandlerErr {
                code: "bad_params",
                message: format!("unknown status {:?} for {}", s, student_id),
                details: None,
            });
        };
        out.insert(student_id.clone(), status);
    }
    Ok(out)
}

fn any_marked(conn: &Connection, subject_id: &str, date: &str) -> Result<bool, HandlerErr> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM attendance WHERE subject_id = ? AND date = ?",
            (subject_id, date),
            |r| r.get(0),
        )
        .map_err(db_err)?;
    Ok(count > 0)
}

/// One-shot marking: a (subject, date) session is immutable once any record
/// lands. Corrections go through attendance.correct only.
fn attendance_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let principal = parse_principal(params)?;
    let subject_id = get_required_str(params, "subjectId")?;
    let date = parse_date(&get_required_str(params, "date")?)?;
    let statuses = parse_statuses(params)?;

    let subject = scope::authorize(conn, &principal, &subject_id)?;
    let roster = scope::roster(conn, &subject)?;

    if any_marked(conn, &subject.id, &date)? {
        return Err(HandlerErr {
            code: "already_marked",
            message: format!(
                "attendance already marked for this subject on {}; modification not allowed",
                date
            ),
            details: None,
        });
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let mut inserted = 0usize;
    for student in &roster {
        // A roster student missing from the form is recorded as Absent.
        let status = statuses
            .get(&student.id)
            .copied()
            .unwrap_or(AttendanceStatus::Absent);
        tx.execute(
            "INSERT INTO attendance(id, student_id, subject_id, date, status)
             VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &student.id,
                &subject.id,
                &date,
                status.as_str(),
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance" })),
        })?;
        inserted += 1;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "inserted": inserted, "date": date }))
}

/// Admin correction: idempotent per (student, subject, date). Existing rows
/// are overwritten, missing ones inserted; only supplied students change.
fn attendance_correct(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let principal = parse_principal(params)?;
    if principal != Principal::Admin {
        return Err(HandlerErr {
            code: "denied",
            message: "access denied: attendance correction requires the admin role".to_string(),
            details: None,
        });
    }
    let subject_id = get_required_str(params, "subjectId")?;
    let date = parse_date(&get_required_str(params, "date")?)?;
    let statuses = parse_statuses(params)?;

    // No ownership check: admin is global. The subject must still exist.
    let subject = scope::load_subject(conn, &subject_id)?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let mut upserted = 0usize;
    for (student_id, status) in &statuses {
        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
                r.get(0)
            })
            .optional()
            .map_err(db_err)?;
        if exists.is_none() {
            return Err(HandlerErr {
                code: "not_found",
                message: format!("student {} not found", student_id),
                details: None,
            });
        }
        tx.execute(
            "INSERT INTO attendance(id, student_id, subject_id, date, status)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(student_id, subject_id, date) DO UPDATE SET
               status = excluded.status",
            (
                Uuid::new_v4().to_string(),
                student_id,
                &subject.id,
                &date,
                status.as_str(),
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance" })),
        })?;
        upserted += 1;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "upserted": upserted, "date": date }))
}

fn roster_json(roster: &[scope::RosterStudent]) -> Vec<serde_json::Value> {
    roster
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "registerNo": s.register_no,
                "name": s.name
            })
        })
        .collect()
}

fn subject_json(subject: &scope::SubjectScope) -> serde_json::Value {
    json!({
        "id": subject.id,
        "name": subject.name,
        "code": subject.code,
        "departmentId": subject.department_id,
        "year": subject.year,
        "batch": subject.batch,
        "staffId": subject.staff_id
    })
}

fn attendance_roster(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let principal = parse_principal(params)?;
    let subject_id = get_required_str(params, "subjectId")?;

    let subject = scope::authorize(conn, &principal, &subject_id)?;
    let roster = scope::roster(conn, &subject)?;

    let marked = match params.get("date").and_then(|v| v.as_str()) {
        Some(raw) => {
            let date = parse_date(raw)?;
            Some(any_marked(conn, &subject.id, &date)?)
        }
        None => None,
    };

    Ok(json!({
        "subject": subject_json(&subject),
        "students": roster_json(&roster),
        "alreadyMarked": marked
    }))
}

fn attendance_stats(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let principal = parse_principal(params)?;
    let subject_id = get_required_str(params, "subjectId")?;

    let subject = scope::authorize(conn, &principal, &subject_id)?;
    let roster = scope::roster(conn, &subject)?;

    let mut rows = Vec::with_capacity(roster.len());
    for student in &roster {
        let pct = calc::effective_percentage(conn, &student.id).map_err(db_err)?;
        rows.push(json!({
            "studentId": student.id,
            "registerNo": student.register_no,
            "name": student.name,
            "percentage": calc::round1(pct)
        }));
    }

    Ok(json!({
        "subject": subject_json(&subject),
        "stats": rows
    }))
}

fn attendance_history(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    let mut stmt = conn
        .prepare(
            "SELECT a.date, a.status, s.name, s.code
             FROM attendance a
             JOIN subjects s ON s.id = a.subject_id
             WHERE a.student_id = ?
             ORDER BY a.date DESC, s.code",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([&student_id], |r| {
            let date: String = r.get(0)?;
            let status: String = r.get(1)?;
            let subject_name: String = r.get(2)?;
            let subject_code: String = r.get(3)?;
            Ok(json!({
                "date": date,
                "status": status,
                "subjectName": subject_name,
                "subjectCode": subject_code
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "history": rows }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(with_conn(state, req, attendance_mark)),
        "attendance.correct" => Some(with_conn(state, req, attendance_correct)),
        "attendance.roster" => Some(with_conn(state, req, attendance_roster)),
        "attendance.stats" => Some(with_conn(state, req, attendance_stats)),
        "attendance.history" => Some(with_conn(state, req, attendance_history)),
        _ => None,
    }
}
