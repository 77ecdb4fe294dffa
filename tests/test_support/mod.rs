#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_learneractivityd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn learneractivityd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn read_line_json(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_line_json(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_default()
}

/// Returns the `error` object of a failed reply.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

pub fn error_code(error: &serde_json::Value) -> &str {
    error.get("code").and_then(|v| v.as_str()).unwrap_or("")
}

pub fn open_workspace_db(workspace: &Path) -> rusqlite::Connection {
    let conn = rusqlite::Connection::open(workspace.join("learneractivity.sqlite3"))
        .expect("open workspace db");
    conn.execute("PRAGMA foreign_keys = ON", []).expect("foreign keys");
    conn
}

/// Course 10 "Biology 101": learners Ada (1), Bob (2, suspended enrolment)
/// and Cy (3, suspended account, enrolled through the category context),
/// teacher Tess (4); Eve (5) only studies course 11. Activities shown:
/// forum 303, assignment 302, quiz 301; quiz 304 and assignment 305 are hidden.
pub fn seed_biology(workspace: &Path) {
    let conn = open_workspace_db(workspace);
    conn.execute_batch(
        "INSERT INTO courses(id, fullname, shortname) VALUES
           (10, 'Biology 101', 'BIO101'),
           (11, 'Chemistry', 'CHEM');
         INSERT INTO contexts(id, context_level, instance_id, path) VALUES
           (1, 10, 0, '/1'),
           (3, 40, 3, '/1/3'),
           (15, 50, 10, '/1/3/15'),
           (16, 50, 11, '/1/3/16');
         INSERT INTO users(id, first_name, last_name, id_number, institution, department, email, last_access, suspended) VALUES
           (1, 'Ada', 'Lovelace', 'S1', 'North', 'Math', 'ada@example.org', 1700000000, 0),
           (2, 'Bob', 'Brown', 'S2', 'South', 'Bio', 'bob@example.org', NULL, 0),
           (3, 'Cy', 'Clark', 'S3', 'North', 'Bio', 'cy@example.org', 1700000500, 1),
           (4, 'Tess', 'Teacher', 'T1', 'North', 'Staff', 'tess@example.org', NULL, 0),
           (5, 'Eve', 'Elsewhere', 'S5', 'North', 'Chem', 'eve@example.org', NULL, 0);
         INSERT INTO role_assignments(role_id, context_id, user_id) VALUES
           (5, 15, 1), (5, 15, 2), (5, 3, 3), (3, 15, 4), (5, 16, 5);
         INSERT INTO user_enrolments(course_id, user_id, status) VALUES
           (10, 1, 0), (10, 2, 1), (10, 3, 0), (10, 4, 0), (11, 5, 0);
         INSERT INTO course_groups(id, course_id, name) VALUES
           (100, 10, 'Red'), (101, 10, 'Blue');
         INSERT INTO course_group_members(group_id, user_id) VALUES
           (100, 1), (101, 1), (101, 2);
         INSERT INTO user_info_field(id, short_name, name, default_data, sort_order) VALUES
           (1, 'team', 'Team', '', 0),
           (2, 'shift', 'Shift', 'day', 1);
         INSERT INTO user_info_data(user_id, field_id, data) VALUES
           (1, 1, 'Falcons'), (2, 1, 'Hawks'), (2, 2, 'night');
         INSERT INTO course_sections(id, course_id, section, name, sequence) VALUES
           (200, 10, 0, NULL, '303'),
           (201, 10, 1, 'Week 1', '302,301,304,305');
         INSERT INTO course_modules(id, course_id, module_name, instance, section_id, visible) VALUES
           (301, 10, 'quiz', 7, 201, 1),
           (302, 10, 'assign', 8, 201, 1),
           (303, 10, 'forum', 9, 200, 1),
           (304, 10, 'quiz', 12, 201, 1),
           (305, 10, 'assign', 13, 201, 0);
         INSERT INTO grade_items(id, course_id, item_name, item_type, item_module, item_instance, hidden) VALUES
           (1, 10, NULL, 'course', NULL, NULL, 0),
           (2, 10, 'Quiz one', 'mod', 'quiz', 7, 0),
           (3, 10, 'Essay', 'mod', 'assign', 8, 0),
           (4, 10, 'Discussion', 'mod', 'forum', 9, 0),
           (5, 10, 'Hidden quiz', 'mod', 'quiz', 12, 1),
           (6, 10, 'Stealth essay', 'mod', 'assign', 13, 0),
           (7, 10, 'Participation', 'manual', NULL, NULL, 0);
         INSERT INTO quiz_attempts(id, quiz, user_id, attempt, sum_grades) VALUES
           (1, 7, 1, 1, NULL),
           (2, 7, 1, 2, 85.0),
           (3, 7, 2, 1, 40.0);
         INSERT INTO assign_submission(id, assignment, user_id, attempt_number, status, latest) VALUES
           (1, 8, 2, 0, 'submitted', 1),
           (2, 8, 3, 0, 'new', 1);",
    )
    .expect("seed biology");
}

pub fn select_seeded_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
) -> PathBuf {
    let workspace = temp_dir(prefix);
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_biology(&workspace);
    workspace
}

pub fn row_ids(result: &serde_json::Value) -> Vec<i64> {
    result
        .get("rows")
        .and_then(|v| v.as_array())
        .map(|rows| {
            rows.iter()
                .filter_map(|r| r.get("id").and_then(|v| v.as_i64()))
                .collect()
        })
        .unwrap_or_default()
}
