use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_class_logins_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classLogins": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT cl.id, cl.username, cl.department_id, d.name, cl.year, cl.batch
         FROM class_logins cl
         JOIN departments d ON d.id = cl.department_id
         ORDER BY d.name, cl.year, cl.batch",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let username: String = row.get(1)?;
            let department_id: String = row.get(2)?;
            let department_name: String = row.get(3)?;
            let year: i64 = row.get(4)?;
            let batch: String = row.get(5)?;
            Ok(json!({
                "id": id,
                "username": username,
                "departmentId": department_id,
                "departmentName": department_name,
                "year": year,
                "batch": batch
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(class_logins) => ok(&req.id, json!({ "classLogins": class_logins })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_class_logins_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let username = match req.params.get("username").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing username", None),
    };
    let department_id = match req.params.get("departmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing departmentId", None),
    };
    let Some(year) = req.params.get("year").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing year", None);
    };
    let batch = match req.params.get("batch").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing batch", None),
    };
    if username.is_empty() || batch.is_empty() {
        return err(&req.id, "bad_params", "username and batch must not be empty", None);
    }

    let dept_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM departments WHERE id = ?",
            [&department_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if dept_exists.is_none() {
        return err(&req.id, "not_found", "department not found", None);
    }

    // One class login per (department, year, batch).
    let taken: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM class_logins WHERE department_id = ? AND year = ? AND batch = ?",
            (&department_id, year, &batch),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken.is_some() {
        return err(
            &req.id,
            "conflict",
            "a class login already exists for this department, year and batch",
            None,
        );
    }

    let class_login_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO class_logins(id, username, department_id, year, batch)
         VALUES(?, ?, ?, ?, ?)",
        (&class_login_id, &username, &department_id, year, &batch),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "class_logins" })),
        );
    }

    ok(&req.id, json!({ "classLoginId": class_login_id, "username": username }))
}

fn handle_class_logins_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_login_id = match req.params.get("classLoginId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classLoginId", None),
    };

    let changed = match conn.execute("DELETE FROM class_logins WHERE id = ?", [&class_login_id]) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "class_logins" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "class login not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classLogins.list" => Some(handle_class_logins_list(state, req)),
        "classLogins.create" => Some(handle_class_logins_create(state, req)),
        "classLogins.delete" => Some(handle_class_logins_delete(state, req)),
        _ => None,
    }
}
