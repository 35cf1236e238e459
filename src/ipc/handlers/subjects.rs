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

fn row_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(db_err)
}

fn subjects_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut sql = String::from(
        "SELECT sub.id, sub.name, sub.code, sub.department_id, d.name,
                sub.year, sub.batch, sub.staff_id, st.name
         FROM subjects sub
         LEFT JOIN departments d ON d.id = sub.department_id
         LEFT JOIN staff st ON st.id = sub.staff_id",
    );
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(dept_id) = params.get("departmentId").and_then(|v| v.as_str()) {
        sql.push_str(" WHERE sub.department_id = ?");
        binds.push(dept_id.to_string().into());
    }
    sql.push_str(" ORDER BY sub.code");

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let code: String = r.get(2)?;
            let department_id: String = r.get(3)?;
            let department_name: Option<String> = r.get(4)?;
            let year: i64 = r.get(5)?;
            let batch: String = r.get(6)?;
            let staff_id: Option<String> = r.get(7)?;
            let staff_name: Option<String> = r.get(8)?;
            Ok(json!({
                "id": id,
                "name": name,
                "code": code,
                "departmentId": department_id,
                "departmentName": department_name,
                "year": year,
                "batch": batch,
                "staffId": staff_id,
                "staffName": staff_name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "subjects": rows }))
}

fn subjects_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let code = get_required_str(params, "code")?;
    let department_id = get_required_str(params, "departmentId")?;
    let year = get_required_i64(params, "year")?;
    let batch = get_required_str(params, "batch")?;
    let staff_id = params
        .get("staffId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if !row_exists(conn, "SELECT 1 FROM departments WHERE id = ?", &department_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "department not found".to_string(),
            details: None,
        });
    }
    if let Some(sid) = staff_id.as_deref() {
        if !row_exists(conn, "SELECT 1 FROM staff WHERE id = ?", sid)? {
            return Err(HandlerErr {
                code: "not_found",
                message: "staff member not found".to_string(),
                details: None,
            });
        }
    }

    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, code, department_id, year, batch, staff_id)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &subject_id,
            name.trim(),
            code.trim(),
            &department_id,
            year,
            batch.trim(),
            &staff_id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "subjects" })),
    })?;

    Ok(json!({ "subjectId": subject_id, "code": code.trim() }))
}

fn subjects_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let name = get_required_str(params, "name")?;
    let code = get_required_str(params, "code")?;
    let department_id = get_required_str(params, "departmentId")?;
    let year = get_required_i64(params, "year")?;
    let batch = get_required_str(params, "batch")?;
    let staff_id = params
        .get("staffId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if !row_exists(conn, "SELECT 1 FROM departments WHERE id = ?", &department_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "department not found".to_string(),
            details: None,
        });
    }
    if let Some(sid) = staff_id.as_deref() {
        if !row_exists(conn, "SELECT 1 FROM staff WHERE id = ?", sid)? {
            return Err(HandlerErr {
                code: "not_found",
                message: "staff member not found".to_string(),
                details: None,
            });
        }
    }

    let changed = conn
        .execute(
            "UPDATE subjects
             SET name = ?, code = ?, department_id = ?, year = ?, batch = ?, staff_id = ?
             WHERE id = ?",
            (
                name.trim(),
                code.trim(),
                &department_id,
                year,
                batch.trim(),
                &staff_id,
                &subject_id,
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "subjects" })),
        })?;
    if changed == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "subject not found".to_string(),
            details: None,
        });
    }

    Ok(json!({ "ok": true }))
}

fn subjects_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;

    if !row_exists(conn, "SELECT 1 FROM subjects WHERE id = ?", &subject_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "subject not found".to_string(),
            details: None,
        });
    }

    let attendance_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM attendance WHERE subject_id = ?",
            [&subject_id],
            |r| r.get(0),
        )
        .map_err(db_err)?;
    if attendance_count > 0 {
        return Err(HandlerErr {
            code: "conflict",
            message: "cannot delete: attendance records exist for this subject".to_string(),
            details: None,
        });
    }

    conn.execute("DELETE FROM subjects WHERE id = ?", [&subject_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "subjects" })),
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
        "subjects.list" => Some(with_conn(state, req, subjects_list)),
        "subjects.create" => Some(with_conn(state, req, subjects_create)),
        "subjects.update" => Some(with_conn(state, req, subjects_update)),
        "subjects.delete" => Some(with_conn(state, req, subjects_delete)),
        _ => None,
    }
}
