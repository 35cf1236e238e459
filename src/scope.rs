use rusqlite::{Connection, OptionalExtension};

/// The acting identity for a request, resolved by the caller at login time
/// and passed in explicitly. A class login carries its (department, year,
/// batch) triple fixed at authentication; it is never re-read per request.
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    Admin,
    Staff {
        staff_id: String,
    },
    ClassLogin {
        department_id: String,
        year: i64,
        batch: String,
    },
}

impl Principal {
    pub fn from_params(params: &serde_json::Value) -> Result<Self, String> {
        let Some(p) = params.get("principal") else {
            return Err("missing principal".to_string());
        };
        let role = p.get("role").and_then(|v| v.as_str()).unwrap_or("");
        match role {
            "admin" => Ok(Principal::Admin),
            "staff" => {
                let staff_id = p
                    .get("staffId")
                    .and_then(|v| v.as_str())
                    .ok_or("missing principal.staffId")?;
                Ok(Principal::Staff {
                    staff_id: staff_id.to_string(),
                })
            }
            "classLogin" => {
                let department_id = p
                    .get("departmentId")
                    .and_then(|v| v.as_str())
                    .ok_or("missing principal.departmentId")?;
                let year = p
                    .get("year")
                    .and_then(|v| v.as_i64())
                    .ok_or("missing principal.year")?;
                let batch = p
                    .get("batch")
                    .and_then(|v| v.as_str())
                    .ok_or("missing principal.batch")?;
                Ok(Principal::ClassLogin {
                    department_id: department_id.to_string(),
                    year,
                    batch: batch.to_string(),
                })
            }
            other => Err(format!("unknown principal role: {:?}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubjectScope {
    pub id: String,
    pub name: String,
    pub code: String,
    pub department_id: String,
    pub year: i64,
    pub batch: String,
    pub staff_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RosterStudent {
    pub id: String,
    pub register_no: String,
    pub name: String,
}

#[derive(Debug)]
pub enum ScopeError {
    NotFound,
    Denied(&'static str),
    Db(rusqlite::Error),
}

impl From<rusqlite::Error> for ScopeError {
    fn from(e: rusqlite::Error) -> Self {
        ScopeError::Db(e)
    }
}

pub fn load_subject(conn: &Connection, subject_id: &str) -> Result<SubjectScope, ScopeError> {
    conn.query_row(
        "SELECT id, name, code, department_id, year, batch, staff_id
         FROM subjects WHERE id = ?",
        [subject_id],
        |r| {
            Ok(SubjectScope {
                id: r.get(0)?,
                name: r.get(1)?,
                code: r.get(2)?,
                department_id: r.get(3)?,
                year: r.get(4)?,
                batch: r.get(5)?,
                staff_id: r.get(6)?,
            })
        },
    )
    .optional()?
    .ok_or(ScopeError::NotFound)
}

/// Resolves the subject and checks the principal against it. A denial is
/// terminal for the request; callers get no roster for a denied subject.
pub fn authorize(
    conn: &Connection,
    principal: &Principal,
    subject_id: &str,
) -> Result<SubjectScope, ScopeError> {
    let subject = load_subject(conn, subject_id)?;
    match principal {
        Principal::Admin => Ok(subject),
        Principal::Staff { staff_id } => {
            if subject.staff_id.as_deref() == Some(staff_id.as_str()) {
                Ok(subject)
            } else {
                Err(ScopeError::Denied("you are not assigned to this subject"))
            }
        }
        Principal::ClassLogin {
            department_id,
            year,
            batch,
        } => {
            if subject.department_id == *department_id
                && subject.year == *year
                && subject.batch == *batch
            {
                Ok(subject)
            } else {
                Err(ScopeError::Denied(
                    "subject does not belong to this class login",
                ))
            }
        }
    }
}

/// All students in the subject's (department, year, batch) class, ordered by
/// register number. The ordering is a determinism contract: marking forms
/// and exported reports must align row-for-row across renders.
pub fn roster(conn: &Connection, subject: &SubjectScope) -> Result<Vec<RosterStudent>, ScopeError> {
    let mut stmt = conn.prepare(
        "SELECT id, register_no, name
         FROM students
         WHERE department_id = ? AND current_year = ? AND batch = ?
         ORDER BY register_no",
    )?;
    let students = stmt
        .query_map(
            (&subject.department_id, subject.year, &subject.batch),
            |r| {
                Ok(RosterStudent {
                    id: r.get(0)?,
                    register_no: r.get(1)?,
                    name: r.get(2)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}
