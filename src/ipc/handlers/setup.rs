use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use crate::report::ReportSettings;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Report,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "report" => Some(Self::Report),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Report => "setup.report",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Report => json!({
            "studentRole": null,
            "gradebookRoles": [5],
            "teamCustomField": null,
            "defaultPerPage": 25
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_role_id(v: &Value, key: &str) -> Result<i64, String> {
    parse_i64_range(v, key, 1, i64::MAX)
}

fn parse_role_list(v: &Value, key: &str, max_len: usize) -> Result<Vec<i64>, String> {
    let items = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array", key))?;
    if items.len() > max_len {
        return Err(format!("{} must have at most {} entries", key, max_len));
    }
    let mut roles: Vec<i64> = Vec::with_capacity(items.len());
    for item in items {
        let role = parse_role_id(item, key)?;
        if !roles.contains(&role) {
            roles.push(role);
        }
    }
    Ok(roles)
}

fn merge_field(
    section: SetupSection,
    obj: &mut Map<String, Value>,
    k: &str,
    v: &Value,
) -> Result<(), String> {
    match section {
        SetupSection::Report => match k {
            "studentRole" => {
                let role = if v.is_null() {
                    Value::Null
                } else {
                    Value::from(parse_role_id(v, k)?)
                };
                obj.insert(k.to_string(), role);
            }
            "gradebookRoles" => {
                obj.insert(k.to_string(), Value::from(parse_role_list(v, k, 32)?));
            }
            "teamCustomField" => {
                let field = if v.is_null() {
                    Value::Null
                } else {
                    let s = parse_string_max(v, k, 100)?;
                    if s.is_empty() {
                        Value::Null
                    } else {
                        Value::String(s)
                    }
                };
                obj.insert(k.to_string(), field);
            }
            "defaultPerPage" => {
                obj.insert(k.to_string(), Value::from(parse_i64_range(v, k, 1, 5000)?));
            }
            _ => return Err(format!("unknown report field: {}", k)),
        },
    }
    Ok(())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let mut next = current.clone();
    let obj = as_object_mut(&mut next)?;
    for (k, v) in patch {
        merge_field(section, obj, k, v)?;
    }
    *current = next;
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let (Some(saved_obj), Ok(obj)) = (saved.as_object(), as_object_mut(&mut current)) {
            for (k, v) in saved_obj {
                // A malformed stored field keeps its default.
                if let Err(msg) = merge_field(section, obj, k, v) {
                    tracing::warn!(key = section.key(), field = %k, %msg, "ignoring stored setting");
                }
            }
        }
    }
    Ok(current)
}

/// Effective report configuration for the open workspace.
pub fn load_report_settings(conn: &rusqlite::Connection) -> anyhow::Result<ReportSettings> {
    let value = load_section(conn, SetupSection::Report)?;
    Ok(serde_json::from_value(value)?)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let report = match load_section(conn, SetupSection::Report) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "report": report }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        tracing::warn!(key = section.key(), error = %e, "settings write failed");
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> rusqlite::Connection {
        let conn = rusqlite::Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn defaults_when_nothing_stored() {
        let conn = conn();
        assert_eq!(load_report_settings(&conn).expect("settings"), ReportSettings::default());
    }

    #[test]
    fn patch_validates_every_field() {
        let mut current = default_section(SetupSection::Report);
        let too_many: Vec<i64> = (1..=33).collect();
        let bad = [
            json!({ "studentRole": 0 }),
            json!({ "gradebookRoles": [5, -1] }),
            json!({ "gradebookRoles": too_many }),
            json!({ "teamCustomField": "x".repeat(101) }),
            json!({ "defaultPerPage": 0 }),
            json!({ "defaultPerPage": 5001 }),
            json!({ "colour": "blue" }),
        ];
        for patch in bad {
            let obj = patch.as_object().expect("object").clone();
            assert!(merge_section_patch(SetupSection::Report, &mut current, &obj).is_err());
        }
        assert_eq!(current, default_section(SetupSection::Report));

        let obj = json!({ "teamCustomField": "  ", "gradebookRoles": [5, 9, 5], "defaultPerPage": 50 });
        merge_section_patch(SetupSection::Report, &mut current, obj.as_object().expect("object"))
            .expect("valid patch");
        assert_eq!(current["teamCustomField"], Value::Null);
        assert_eq!(current["gradebookRoles"], json!([5, 9]));
        assert_eq!(current["defaultPerPage"], json!(50));
    }

    #[test]
    fn malformed_stored_fields_fall_back_individually() {
        let conn = conn();
        db::settings_set_json(
            &conn,
            "setup.report",
            &json!({ "studentRole": "teacher", "defaultPerPage": 40, "teamCustomField": "team" }),
        )
        .expect("store");
        let settings = load_report_settings(&conn).expect("settings");
        assert_eq!(settings.student_role, None);
        assert_eq!(settings.default_per_page, 40);
        assert_eq!(settings.team_custom_field.as_deref(), Some("team"));
        assert_eq!(settings.gradebook_roles, vec![5]);
    }
}
