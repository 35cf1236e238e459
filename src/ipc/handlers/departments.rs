use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn count_referencing(conn: &Connection, sql: &str, dept_id: &str) -> Result<i64, rusqlite::Error> {
    conn.query_row(sql, [dept_id], |r| r.get(0))
}

fn handle_departments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "departments": [] }));
    };

    // Include counts so the admin dashboard can render without extra calls.
    let mut stmt = match conn.prepare(
        "SELECT
           d.id,
           d.name,
           d.code,
           (SELECT COUNT(*) FROM students s WHERE s.department_id = d.id) AS student_count,
           (SELECT COUNT(*) FROM subjects sub WHERE sub.department_id = d.id) AS subject_count
         FROM departments d
         ORDER BY d.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let code: String = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            let subject_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "code": code,
                "studentCount": student_count,
                "subjectCount": subject_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(departments) => ok(&req.id, json!({ "departments": departments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_departments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    let code = match req.params.get("code").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing code", None),
    };
    if name.is_empty() || code.is_empty() {
        return err(&req.id, "bad_params", "name and code must not be empty", None);
    }

    let dept_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO departments(id, name, code) VALUES(?, ?, ?)",
        (&dept_id, &name, &code),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "departments" })),
        );
    }

    ok(&req.id, json!({ "departmentId": dept_id, "name": name, "code": code }))
}

fn handle_departments_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let dept_id = match req.params.get("departmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing departmentId", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    let code = match req.params.get("code").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing code", None),
    };

    let changed = match conn.execute(
        "UPDATE departments SET name = ?, code = ? WHERE id = ?",
        (&name, &code, &dept_id),
    ) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "departments" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "department not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_departments_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let dept_id = match req.params.get("departmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing departmentId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM departments WHERE id = ?", [&dept_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "department not found", None);
    }

    // A department cannot be removed through plain CRUD while anything still
    // references it; the maintenance dispatcher owns the cascading variant.
    let guards: [(&str, &str); 3] = [
        (
            "SELECT COUNT(*) FROM students WHERE department_id = ?",
            "students are assigned to this department",
        ),
        (
            "SELECT COUNT(*) FROM staff WHERE department_id = ?",
            "staff are assigned to this department",
        ),
        (
            "SELECT COUNT(*) FROM subjects WHERE department_id = ?",
            "subjects are assigned to this department",
        ),
    ];
    for (sql, reason) in guards {
        match count_referencing(conn, sql, &dept_id) {
            Ok(n) if n > 0 => {
                return err(&req.id, "conflict", format!("cannot delete: {}", reason), None)
            }
            Ok(_) => {}
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    if let Err(e) = conn.execute("DELETE FROM departments WHERE id = ?", [&dept_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "departments" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "departments.list" => Some(handle_departments_list(state, req)),
        "departments.create" => Some(handle_departments_create(state, req)),
        "departments.update" => Some(handle_departments_update(state, req)),
        "departments.delete" => Some(handle_departments_delete(state, req)),
        _ => None,
    }
}
