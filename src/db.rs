use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "learneractivity.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id INTEGER PRIMARY KEY,
            fullname TEXT NOT NULL,
            shortname TEXT NOT NULL DEFAULT '',
            category INTEGER NOT NULL DEFAULT 0,
            visible INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    // Context ancestry is materialised in `path`, e.g. "/1/3/15" for
    // system -> category -> course.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS contexts(
            id INTEGER PRIMARY KEY,
            context_level INTEGER NOT NULL,
            instance_id INTEGER NOT NULL,
            path TEXT NOT NULL,
            UNIQUE(context_level, instance_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id INTEGER PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            id_number TEXT NOT NULL DEFAULT '',
            institution TEXT NOT NULL DEFAULT '',
            department TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL DEFAULT '',
            last_access INTEGER
        )",
        [],
    )?;
    ensure_users_suspended(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS role_assignments(
            id INTEGER PRIMARY KEY,
            role_id INTEGER NOT NULL,
            context_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            FOREIGN KEY(context_id) REFERENCES contexts(id),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_role_assignments_context ON role_assignments(context_id, role_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_role_assignments_user ON role_assignments(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_enrolments(
            id INTEGER PRIMARY KEY,
            course_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            status INTEGER NOT NULL DEFAULT 0,
            time_start INTEGER NOT NULL DEFAULT 0,
            time_end INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_user_enrolments_course_user ON user_enrolments(course_id, user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_info_field(
            id INTEGER PRIMARY KEY,
            short_name TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            default_data TEXT NOT NULL DEFAULT '',
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_info_data(
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            field_id INTEGER NOT NULL,
            data TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(field_id) REFERENCES user_info_field(id),
            UNIQUE(user_id, field_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_groups(
            id INTEGER PRIMARY KEY,
            course_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_group_members(
            id INTEGER PRIMARY KEY,
            group_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            FOREIGN KEY(group_id) REFERENCES course_groups(id),
            FOREIGN KEY(user_id) REFERENCES users(id),
            UNIQUE(group_id, user_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_groups_course ON course_groups(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_group_members_user ON course_group_members(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_sections(
            id INTEGER PRIMARY KEY,
            course_id INTEGER NOT NULL,
            section INTEGER NOT NULL,
            name TEXT,
            sequence TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(course_id, section)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_modules(
            id INTEGER PRIMARY KEY,
            course_id INTEGER NOT NULL,
            module_name TEXT NOT NULL,
            instance INTEGER NOT NULL,
            section_id INTEGER,
            visible INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(section_id) REFERENCES course_sections(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_modules_instance ON course_modules(module_name, instance)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_items(
            id INTEGER PRIMARY KEY,
            course_id INTEGER NOT NULL,
            item_name TEXT,
            item_type TEXT NOT NULL,
            item_module TEXT,
            item_instance INTEGER,
            hidden INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_items_course ON grade_items(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quiz_attempts(
            id INTEGER PRIMARY KEY,
            quiz INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            attempt INTEGER NOT NULL DEFAULT 1,
            state TEXT NOT NULL DEFAULT 'inprogress',
            sum_grades REAL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_attempts_quiz_user ON quiz_attempts(quiz, user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assign_submission(
            id INTEGER PRIMARY KEY,
            assignment INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            attempt_number INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    ensure_assign_submission_latest(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assign_submission_assignment_user ON assign_submission(assignment, user_id, latest)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assign_grades(
            id INTEGER PRIMARY KEY,
            assignment INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            attempt_number INTEGER NOT NULL DEFAULT 0,
            grade REAL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assign_grades_assignment_user ON assign_grades(assignment, user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS workspace_settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_users_suspended(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "users", "suspended")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE users ADD COLUMN suspended INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_assign_submission_latest(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "assign_submission", "latest")? {
        return Ok(());
    }

    conn.execute(
        "ALTER TABLE assign_submission ADD COLUMN latest INTEGER NOT NULL DEFAULT 0",
        [],
    )?;

    // Older files kept one row per attempt without the flag: the highest
    // attempt per (assignment, user) is the latest revision.
    conn.execute(
        "UPDATE assign_submission
         SET latest = 1
         WHERE id IN (
           SELECT s.id
           FROM assign_submission s
           WHERE s.attempt_number = (
             SELECT MAX(s2.attempt_number)
             FROM assign_submission s2
             WHERE s2.assignment = s.assignment AND s2.user_id = s.user_id
           )
         )",
        [],
    )?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM workspace_settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let raw = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO workspace_settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, raw),
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
