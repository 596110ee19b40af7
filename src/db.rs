use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "turma.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            inep TEXT,
            name TEXT NOT NULL,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            year_grade TEXT NOT NULL,
            label TEXT NOT NULL,
            shift TEXT NOT NULL,
            dt_user_id TEXT,
            created_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classrooms_school ON classrooms(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            enrollment_code TEXT,
            name TEXT NOT NULL,
            birthdate TEXT,
            responsible_name TEXT,
            responsible_phone TEXT,
            status TEXT NOT NULL DEFAULT 'Ativo',
            is_leader INTEGER NOT NULL DEFAULT 0,
            is_vice_leader INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_classroom ON students(classroom_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_id)",
        [],
    )?;

    // Workspaces created before the leadership feature miss these columns.
    ensure_students_leader_flags(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles(
            user_id TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            school_id TEXT,
            classroom_id TEXT,
            full_name TEXT NOT NULL,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS access_locks(
            classroom_id TEXT PRIMARY KEY,
            bio_form_locked INTEGER NOT NULL DEFAULT 1,
            locked_at TEXT,
            locked_by TEXT,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_photos(
            student_id TEXT PRIMARY KEY,
            storage_path TEXT NOT NULL,
            updated_at TEXT,
            updated_by TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS seat_maps(
            classroom_id TEXT PRIMARY KEY,
            layout_json TEXT NOT NULL,
            updated_at TEXT,
            updated_by TEXT,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bio_forms(
            student_id TEXT PRIMARY KEY,
            sections_json TEXT NOT NULL DEFAULT '{}',
            completed INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_log(
            id TEXT PRIMARY KEY,
            action TEXT NOT NULL,
            entity TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            actor_user_id TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_log_entity ON audit_log(entity, entity_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_leader_flags(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "students", "is_leader")? {
        conn.execute(
            "ALTER TABLE students ADD COLUMN is_leader INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    if !table_has_column(conn, "students", "is_vice_leader")? {
        conn.execute(
            "ALTER TABLE students ADD COLUMN is_vice_leader INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
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
