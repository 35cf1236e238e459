use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Transaction};
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

fn delete_err(e: rusqlite::Error, table: &str) -> HandlerErr {
    HandlerErr {
        code: "db_delete_failed",
        message: e.to_string(),
        details: Some(json!({ "table": table })),
    }
}

/// The fixed menu of destructive actions, each variant carrying only the
/// parameter it needs. Unknown tags never reach a transaction.
#[derive(Debug, Clone, PartialEq)]
enum ResetAction {
    ClearAll,
    ClearStudent { student_id: String },
    DeleteDepartmentAttendance { department_id: String },
    DeleteSubjectAttendance { subject_id: String },
    DeleteStaffAttendance { staff_id: String },
    DeleteStudentFull { student_id: String },
    DeleteDepartmentFull { department_id: String },
    DeleteStaff { staff_id: String },
    DeleteSubject { subject_id: String },
}

impl ResetAction {
    fn from_params(params: &serde_json::Value) -> Result<Self, HandlerErr> {
        let Some(action) = params.get("action").and_then(|v| v.as_str()) else {
            return Err(HandlerErr {
                code: "bad_params",
                message: "missing action".to_string(),
                details: None,
            });
        };
        let id_param = |key: &str| -> Result<String, HandlerErr> {
            params
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| HandlerErr {
                    code: "bad_params",
                    message: format!("missing {}", key),
                    details: None,
                })
        };
        match action {
            "clear_all" => Ok(Self::ClearAll),
            "clear_student" => Ok(Self::ClearStudent {
                student_id: id_param("studentId")?,
            }),
            "delete_department_attendance" => Ok(Self::DeleteDepartmentAttendance {
                department_id: id_param("departmentId")?,
            }),
            "delete_subject_attendance" => Ok(Self::DeleteSubjectAttendance {
                subject_id: id_param("subjectId")?,
            }),
            "delete_staff_attendance" => Ok(Self::DeleteStaffAttendance {
                staff_id: id_param("staffId")?,
            }),
            "delete_student_full" => Ok(Self::DeleteStudentFull {
                student_id: id_param("studentId")?,
            }),
            "delete_department_full" => Ok(Self::DeleteDepartmentFull {
                department_id: id_param("departmentId")?,
            }),
            "delete_staff" => Ok(Self::DeleteStaff {
                staff_id: id_param("staffId")?,
            }),
            "delete_subject" => Ok(Self::DeleteSubject {
                subject_id: id_param("subjectId")?,
            }),
            other => Err(HandlerErr {
                code: "invalid_action",
                message: format!("unknown action: {}", other),
                details: None,
            }),
        }
    }
}

fn require_row(conn: &Connection, sql: &str, id: &str, what: &str) -> Result<(), HandlerErr> {
    let exists: Option<i64> = conn
        .query_row(sql, [id], |r| r.get(0))
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: format!("{} not found", what),
            details: None,
        });
    }
    Ok(())
}

fn tx_delete(tx: &Transaction, sql: &str, id: &str, table: &str) -> Result<usize, HandlerErr> {
    tx.execute(sql, [id]).map_err(|e| delete_err(e, table))
}

fn run_action(conn: &Connection, action: ResetAction) -> Result<serde_json::Value, HandlerErr> {
    match action {
        ResetAction::ClearAll => {
            let deleted = conn
                .execute("DELETE FROM attendance", [])
                .map_err(|e| delete_err(e, "attendance"))?;
            Ok(json!({
                "action": "clear_all",
                "attendanceDeleted": deleted
            }))
        }

        ResetAction::ClearStudent { student_id } => {
            require_row(conn, "SELECT 1 FROM students WHERE id = ?", &student_id, "student")?;
            let deleted = conn
                .execute("DELETE FROM attendance WHERE student_id = ?", [&student_id])
                .map_err(|e| delete_err(e, "attendance"))?;
            Ok(json!({
                "action": "clear_student",
                "attendanceDeleted": deleted
            }))
        }

        ResetAction::DeleteDepartmentAttendance { department_id } => {
            require_row(
                conn,
                "SELECT 1 FROM departments WHERE id = ?",
                &department_id,
                "department",
            )?;
            let deleted = conn
                .execute(
                    "DELETE FROM attendance WHERE student_id IN (
                       SELECT id FROM students WHERE department_id = ?
                     )",
                    [&department_id],
                )
                .map_err(|e| delete_err(e, "attendance"))?;
            Ok(json!({
                "action": "delete_department_attendance",
                "attendanceDeleted": deleted
            }))
        }

        ResetAction::DeleteSubjectAttendance { subject_id } => {
            require_row(conn, "SELECT 1 FROM subjects WHERE id = ?", &subject_id, "subject")?;
            let deleted = conn
                .execute("DELETE FROM attendance WHERE subject_id = ?", [&subject_id])
                .map_err(|e| delete_err(e, "attendance"))?;
            Ok(json!({
                "action": "delete_subject_attendance",
                "attendanceDeleted": deleted
            }))
        }

        ResetAction::DeleteStaffAttendance { staff_id } => {
            require_row(conn, "SELECT 1 FROM staff WHERE id = ?", &staff_id, "staff member")?;
            // Resolve the subject set first, then delete only those rows.
            let deleted = conn
                .execute(
                    "DELETE FROM attendance WHERE subject_id IN (
                       SELECT id FROM subjects WHERE staff_id = ?
                     )",
                    [&staff_id],
                )
                .map_err(|e| delete_err(e, "attendance"))?;
            Ok(json!({
                "action": "delete_staff_attendance",
                "attendanceDeleted": deleted
            }))
        }

        ResetAction::DeleteStudentFull { student_id } => {
            require_row(conn, "SELECT 1 FROM students WHERE id = ?", &student_id, "student")?;
            let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
                code: "db_tx_failed",
                message: e.to_string(),
                details: None,
            })?;
            let attendance_deleted = tx_delete(
                &tx,
                "DELETE FROM attendance WHERE student_id = ?",
                &student_id,
                "attendance",
            )?;
            tx_delete(&tx, "DELETE FROM students WHERE id = ?", &student_id, "students")?;
            tx.commit().map_err(|e| HandlerErr {
                code: "db_commit_failed",
                message: e.to_string(),
                details: None,
            })?;
            Ok(json!({
                "action": "delete_student_full",
                "attendanceDeleted": attendance_deleted,
                "studentsDeleted": 1
            }))
        }

        ResetAction::DeleteDepartmentFull { department_id } => {
            require_row(
                conn,
                "SELECT 1 FROM departments WHERE id = ?",
                &department_id,
                "department",
            )?;
            let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
                code: "db_tx_failed",
                message: e.to_string(),
                details: None,
            })?;
            // Dependency order: attendance of the department's students,
            // then students, then subjects, then detach staff, then the
            // department row itself.
            let attendance_deleted = tx_delete(
                &tx,
                "DELETE FROM attendance WHERE student_id IN (
                   SELECT id FROM students WHERE department_id = ?
                 )",
                &department_id,
                "attendance",
            )?;
            let students_deleted = tx_delete(
                &tx,
                "DELETE FROM students WHERE department_id = ?",
                &department_id,
                "students",
            )?;
            let subjects_deleted = tx_delete(
                &tx,
                "DELETE FROM subjects WHERE department_id = ?",
                &department_id,
                "subjects",
            )?;
            let staff_detached = tx
                .execute(
                    "UPDATE staff SET department_id = NULL WHERE department_id = ?",
                    [&department_id],
                )
                .map_err(|e| HandlerErr {
                    code: "db_update_failed",
                    message: e.to_string(),
                    details: Some(json!({ "table": "staff" })),
                })?;
            tx_delete(
                &tx,
                "DELETE FROM class_logins WHERE department_id = ?",
                &department_id,
                "class_logins",
            )?;
            tx_delete(
                &tx,
                "DELETE FROM departments WHERE id = ?",
                &department_id,
                "departments",
            )?;
            tx.commit().map_err(|e| HandlerErr {
                code: "db_commit_failed",
                message: e.to_string(),
                details: None,
            })?;
            Ok(json!({
                "action": "delete_department_full",
                "attendanceDeleted": attendance_deleted,
                "studentsDeleted": students_deleted,
                "subjectsDeleted": subjects_deleted,
                "staffDetached": staff_detached,
                "departmentsDeleted": 1
            }))
        }

        ResetAction::DeleteStaff { staff_id } => {
            require_row(conn, "SELECT 1 FROM staff WHERE id = ?", &staff_id, "staff member")?;
            let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
                code: "db_tx_failed",
                message: e.to_string(),
                details: None,
            })?;
            let subjects_detached = tx
                .execute(
                    "UPDATE subjects SET staff_id = NULL WHERE staff_id = ?",
                    [&staff_id],
                )
                .map_err(|e| HandlerErr {
                    code: "db_update_failed",
                    message: e.to_string(),
                    details: Some(json!({ "table": "subjects" })),
                })?;
            tx_delete(&tx, "DELETE FROM staff WHERE id = ?", &staff_id, "staff")?;
            tx.commit().map_err(|e| HandlerErr {
                code: "db_commit_failed",
                message: e.to_string(),
                details: None,
            })?;
            Ok(json!({
                "action": "delete_staff",
                "subjectsDetached": subjects_detached,
                "staffDeleted": 1
            }))
        }

        ResetAction::DeleteSubject { subject_id } => {
            require_row(conn, "SELECT 1 FROM subjects WHERE id = ?", &subject_id, "subject")?;
            // Subject deletion does not cascade into the ledger; use
            // delete_subject_attendance first.
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
                    message: "cannot delete: attendance records exist for this subject"
                        .to_string(),
                    details: None,
                });
            }
            conn.execute("DELETE FROM subjects WHERE id = ?", [&subject_id])
                .map_err(|e| delete_err(e, "subjects"))?;
            Ok(json!({
                "action": "delete_subject",
                "subjectsDeleted": 1
            }))
        }
    }
}

fn handle_maintenance_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let action = match ResetAction::from_params(&req.params) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    match run_action(conn, action) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "maintenance.reset" => Some(handle_maintenance_reset(state, req)),
        _ => None,
    }
}
