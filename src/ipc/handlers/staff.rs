use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_staff_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "staff": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT st.id, st.name, st.department_id, d.name
         FROM staff st
         LEFT JOIN departments d ON d.id = st.department_id
         ORDER BY st.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let department_id: Option<String> = row.get(2)?;
            let department_name: Option<String> = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "departmentId": department_id,
                "departmentName": department_name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(staff) => ok(&req.id, json!({ "staff": staff })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_staff_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    // A staff row may exist without a department (pure academic allocation).
    let department_id = req
        .params
        .get("departmentId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if let Some(dept_id) = department_id.as_deref() {
        let exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM departments WHERE id = ?", [dept_id], |r| {
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
    }

    let staff_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO staff(id, name, department_id) VALUES(?, ?, ?)",
        (&staff_id, &name, &department_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "staff" })),
        );
    }

    ok(&req.id, json!({ "staffId": staff_id, "name": name }))
}

fn handle_staff_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let staff_id = match req.params.get("staffId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing staffId", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    let department_id = req
        .params
        .get("departmentId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let changed = match conn.execute(
        "UPDATE staff SET name = ?, department_id = ? WHERE id = ?",
        (&name, &department_id, &staff_id),
    ) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "staff" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "staff member not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_staff_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let staff_id = match req.params.get("staffId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing staffId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM staff WHERE id = ?", [&staff_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "staff member not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Their subjects survive unassigned.
    if let Err(e) = tx.execute(
        "UPDATE subjects SET staff_id = NULL WHERE staff_id = ?",
        [&staff_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM staff WHERE id = ?", [&staff_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "staff" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "staff.list" => Some(handle_staff_list(state, req)),
        "staff.create" => Some(handle_staff_create(state, req)),
        "staff.update" => Some(handle_staff_update(state, req)),
        "staff.delete" => Some(handle_staff_delete(state, req)),
        _ => None,
    }
}
