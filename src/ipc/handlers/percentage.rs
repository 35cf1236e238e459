use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

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

fn percentage_student(
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

    let effective = calc::effective_percentage(conn, &student_id).map_err(db_err)?;
    let calculated = calc::raw_percentage(conn, &student_id).map_err(db_err)?;
    let override_pct = calc::override_percentage(conn, &student_id).map_err(db_err)?;

    Ok(json!({
        "studentId": student_id,
        "effective": calc::round1(effective),
        "calculated": calc::round1(calculated),
        "override": override_pct
    }))
}

/// Department/year roster with system-calculated percentage next to any
/// override, for the admin override screen and the attendance overview.
fn percentage_overview(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let department_id = get_required_str(params, "departmentId")?;
    let year = params.get("year").and_then(|v| v.as_i64());

    let mut sql = String::from(
        "SELECT id, register_no, name, admin_override_percentage
         FROM students
         WHERE department_id = ?",
    );
    let mut binds: Vec<rusqlite::types::Value> = vec![department_id.clone().into()];
    if let Some(y) = year {
        sql.push_str(" AND current_year = ?");
        binds.push(y.into());
    }
    sql.push_str(" ORDER BY register_no");

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let students = stmt
        .query_map(rusqlite::params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let register_no: String = r.get(1)?;
            let name: String = r.get(2)?;
            let override_pct: Option<f64> = r.get(3)?;
            Ok((id, register_no, name, override_pct))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut rows = Vec::with_capacity(students.len());
    for (id, register_no, name, override_pct) in students {
        let calculated = calc::raw_percentage(conn, &id).map_err(db_err)?;
        rows.push(json!({
            "studentId": id,
            "registerNo": register_no,
            "name": name,
            "calculated": calc::round1(calculated),
            "override": override_pct
        }));
    }

    Ok(json!({ "students": rows }))
}

/// Batch override editor. Numeric values are clamped into [0, 100]; JSON
/// null clears the override and restores the computed percentage. Anything
/// else is rejected rather than silently ignored.
fn percentage_set_overrides(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(overrides) = params.get("overrides").and_then(|v| v.as_object()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing overrides".to_string(),
            details: None,
        });
    };

    let mut parsed: Vec<(String, Option<f64>)> = Vec::with_capacity(overrides.len());
    for (student_id, value) in overrides {
        let v = if value.is_null() {
            None
        } else if let Some(n) = value.as_f64() {
            Some(n.clamp(0.0, 100.0))
        } else {
            return Err(HandlerErr {
                code: "bad_params",
                message: format!("override for {} must be a number or null", student_id),
                details: None,
            });
        };
        parsed.push((student_id.clone(), v));
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let mut updated = 0usize;
    for (student_id, value) in &parsed {
        let changed = tx
            .execute(
                "UPDATE students SET admin_override_percentage = ? WHERE id = ?",
                (value, student_id),
            )
            .map_err(|e| HandlerErr {
                code: "db_update_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "students" })),
            })?;
        if changed == 0 {
            return Err(HandlerErr {
                code: "not_found",
                message: format!("student {} not found", student_id),
                details: None,
            });
        }
        updated += 1;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "updated": updated }))
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
        "percentage.student" => Some(with_conn(state, req, percentage_student)),
        "percentage.overview" => Some(with_conn(state, req, percentage_overview)),
        "percentage.setOverrides" => Some(with_conn(state, req, percentage_set_overrides)),
        _ => None,
    }
}
