use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
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

fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn department_exists(conn: &Connection, dept_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM departments WHERE id = ?", [dept_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

fn register_no_taken(
    conn: &Connection,
    register_no: &str,
    exclude_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE register_no = ?",
            [register_no],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    Ok(match existing {
        Some(id) => exclude_id != Some(id.as_str()),
        None => false,
    })
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut sql = String::from(
        "SELECT s.id, s.register_no, s.name, s.department_id, d.name,
                s.current_year, s.batch, s.admin_override_percentage
         FROM students s
         LEFT JOIN departments d ON d.id = s.department_id",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(dept_id) = params.get("departmentId").and_then(|v| v.as_str()) {
        clauses.push("s.department_id = ?");
        binds.push(dept_id.to_string().into());
    }
    if let Some(year) = params.get("year").and_then(|v| v.as_i64()) {
        clauses.push("s.current_year = ?");
        binds.push(year.into());
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY s.register_no");

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let register_no: String = r.get(1)?;
            let name: String = r.get(2)?;
            let department_id: String = r.get(3)?;
            let department_name: Option<String> = r.get(4)?;
            let current_year: i64 = r.get(5)?;
            let batch: String = r.get(6)?;
            let override_pct: Option<f64> = r.get(7)?;
            Ok(json!({
                "id": id,
                "registerNo": register_no,
                "name": name,
                "departmentId": department_id,
                "departmentName": department_name,
                "currentYear": current_year,
                "batch": batch,
                "overridePercentage": override_pct
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "students": rows }))
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let register_no = get_required_str(params, "registerNo")?;
    let name = get_required_str(params, "name")?;
    let department_id = get_required_str(params, "departmentId")?;
    let current_year = get_required_i64(params, "currentYear")?;
    let batch = get_required_str(params, "batch")?;

    if register_no.trim().is_empty() || name.trim().is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "registerNo and name must not be empty".to_string(),
            details: None,
        });
    }
    if !department_exists(conn, &department_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "department not found".to_string(),
            details: None,
        });
    }
    if register_no_taken(conn, register_no.trim(), None)? {
        return Err(HandlerErr {
            code: "conflict",
            message: "register number already in use".to_string(),
            details: None,
        });
    }

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, register_no, name, department_id, current_year, batch)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            register_no.trim(),
            name.trim(),
            &department_id,
            current_year,
            batch.trim(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    Ok(json!({ "studentId": student_id, "registerNo": register_no.trim() }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let register_no = get_required_str(params, "registerNo")?;
    let name = get_required_str(params, "name")?;
    let department_id = get_required_str(params, "departmentId")?;
    let current_year = get_required_i64(params, "currentYear")?;
    let batch = get_required_str(params, "batch")?;

    if !department_exists(conn, &department_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "department not found".to_string(),
            details: None,
        });
    }
    if register_no_taken(conn, register_no.trim(), Some(student_id.as_str()))? {
        return Err(HandlerErr {
            code: "conflict",
            message: "register number already in use".to_string(),
            details: None,
        });
    }

    let changed = conn
        .execute(
            "UPDATE students
             SET register_no = ?, name = ?, department_id = ?, current_year = ?, batch = ?
             WHERE id = ?",
            (
                register_no.trim(),
                name.trim(),
                &department_id,
                current_year,
                batch.trim(),
                &student_id,
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "students" })),
        })?;
    if changed == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    Ok(json!({ "ok": true }))
}

fn students_delete(
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

    // Plain CRUD refuses while ledger rows exist; the maintenance action
    // delete_student_full is the cascading path.
    let attendance_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM attendance WHERE student_id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .map_err(db_err)?;
    if attendance_count > 0 {
        return Err(HandlerErr {
            code: "conflict",
            message: "cannot delete: this student has attendance records".to_string(),
            details: None,
        });
    }

    conn.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "students" })),
        })?;

    Ok(json!({ "ok": true }))
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
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        _ => None,
    }
}
