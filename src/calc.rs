use rusqlite::{Connection, OptionalExtension};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    OnDuty,
}

impl AttendanceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Present" => Some(Self::Present),
            "Absent" => Some(Self::Absent),
            "On Duty" => Some(Self::OnDuty),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Absent => "Absent",
            Self::OnDuty => "On Duty",
        }
    }

    /// A period counts toward attendance for Present and On Duty.
    pub fn attended(&self) -> bool {
        matches!(self, Self::Present | Self::OnDuty)
    }
}

/// Two-decimal rounding used for the stored/intermediate percentage.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// One-decimal rounding used for display values.
pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Period-wise attendance tally. Every (subject, date) record is one period,
/// weighted equally regardless of how many subjects met that day.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeriodTally {
    pub attended: usize,
    pub total: usize,
}

impl PeriodTally {
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = AttendanceStatus>,
    {
        let mut tally = PeriodTally::default();
        for s in statuses {
            tally.total += 1;
            if s.attended() {
                tally.attended += 1;
            }
        }
        tally
    }

    /// No records means 0%, not "undefined".
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let pct = (self.attended as f64 / self.total as f64) * 100.0;
        round2(pct).clamp(0.0, 100.0)
    }
}

fn tally_for_student(conn: &Connection, student_id: &str) -> rusqlite::Result<PeriodTally> {
    let mut stmt = conn.prepare("SELECT status FROM attendance WHERE student_id = ?")?;
    let statuses = stmt
        .query_map([student_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    // Rows with an unrecognized status still occupy a period; they just never
    // count as attended.
    Ok(PeriodTally::from_statuses(
        statuses
            .iter()
            .map(|s| AttendanceStatus::parse(s).unwrap_or(AttendanceStatus::Absent)),
    ))
}

pub fn override_percentage(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<f64>> {
    Ok(conn
        .query_row(
            "SELECT admin_override_percentage FROM students WHERE id = ?",
            [student_id],
            |r| r.get::<_, Option<f64>>(0),
        )
        .optional()?
        .flatten())
}

/// Percentage computed from the ledger alone, ignoring any admin override.
pub fn raw_percentage(conn: &Connection, student_id: &str) -> rusqlite::Result<f64> {
    Ok(tally_for_student(conn, student_id)?.percentage())
}

/// The displayed percentage: an admin override, when set, is the single
/// source of truth and short-circuits the ledger entirely.
pub fn effective_percentage(conn: &Connection, student_id: &str) -> rusqlite::Result<f64> {
    if let Some(v) = override_percentage(conn, student_id)? {
        return Ok(v);
    }
    raw_percentage(conn, student_id)
}
