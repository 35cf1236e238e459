use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("rollcall.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            department_id TEXT,
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_staff_department ON staff(department_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            register_no TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            department_id TEXT NOT NULL,
            current_year INTEGER NOT NULL,
            batch TEXT NOT NULL,
            admin_override_percentage REAL,
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    // Older workspaces predate the override column. Add if needed.
    ensure_students_override_column(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_department ON students(department_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(department_id, current_year, batch)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            department_id TEXT NOT NULL,
            year INTEGER NOT NULL,
            batch TEXT NOT NULL,
            staff_id TEXT,
            FOREIGN KEY(department_id) REFERENCES departments(id),
            FOREIGN KEY(staff_id) REFERENCES staff(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_department ON subjects(department_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_staff ON subjects(staff_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_class ON subjects(department_id, year, batch)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_logins(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            department_id TEXT NOT NULL,
            year INTEGER NOT NULL,
            batch TEXT NOT NULL,
            FOREIGN KEY(department_id) REFERENCES departments(id),
            UNIQUE(department_id, year, batch)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_logins_department ON class_logins(department_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(student_id, subject_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_subject_date ON attendance(subject_id, date)",
        [],
    )?;

    // Workspaces imported from the pre-batch era used single-letter section
    // labels. Fold them into the first batch.
    migrate_legacy_batch_labels(&conn)?;

    Ok(conn)
}

fn ensure_students_override_column(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "admin_override_percentage")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE students ADD COLUMN admin_override_percentage REAL",
        [],
    )?;
    Ok(())
}

fn migrate_legacy_batch_labels(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE students SET batch = 'I Batch' WHERE batch IN ('A', 'B', 'C', '')",
        [],
    )?;
    conn.execute(
        "UPDATE subjects SET batch = 'I Batch' WHERE batch IN ('A', 'B', 'C', '')",
        [],
    )?;
    conn.execute(
        "UPDATE class_logins SET batch = 'I Batch' WHERE batch IN ('A', 'B', 'C', '')",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
