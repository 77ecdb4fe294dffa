use rusqlite::{params_from_iter, types::Value, Connection};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{db_err, placeholders, ReportError, LEARNER_CHUNK};

/// Group cell value for a learner with no group memberships.
pub const NO_GROUPS: &str = "none";

pub fn group_display(names: &[String]) -> String {
    if names.is_empty() {
        return NO_GROUPS.to_string();
    }
    let mut sorted = names.to_vec();
    sorted.sort();
    sorted.join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseGroup {
    pub id: i64,
    pub name: String,
}

pub fn course_groups(conn: &Connection, course_id: i64) -> Result<Vec<CourseGroup>, ReportError> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM course_groups WHERE course_id = ? ORDER BY name, id")
        .map_err(db_err)?;
    let groups = stmt
        .query_map([course_id], |r| {
            Ok(CourseGroup {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(groups)
}

fn integer_binds(head: &[i64], ids: &[i64]) -> Vec<Value> {
    head.iter()
        .chain(ids.iter())
        .map(|v| Value::Integer(*v))
        .collect()
}

/// Names of the course groups each learner belongs to.
pub fn group_names(
    conn: &Connection,
    course_id: i64,
    learner_ids: &[i64],
) -> Result<HashMap<i64, Vec<String>>, ReportError> {
    let mut out: HashMap<i64, Vec<String>> = HashMap::new();
    if learner_ids.is_empty() {
        return Ok(out);
    }
    for chunk in learner_ids.chunks(LEARNER_CHUNK) {
        let sql = format!(
            "SELECT gm.user_id, g.name
             FROM course_group_members gm
             JOIN course_groups g ON g.id = gm.group_id
             WHERE g.course_id = ? AND gm.user_id IN ({})
             ORDER BY g.name",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(integer_binds(&[course_id], chunk)), |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?))
            })
            .map_err(db_err)?;
        for row in rows {
            let (user_id, name) = row.map_err(db_err)?;
            out.entry(user_id).or_default().push(name);
        }
    }
    Ok(out)
}

/// Every defined profile field per learner: stored data, or the field
/// default when the learner has none.
pub fn custom_fields(
    conn: &Connection,
    learner_ids: &[i64],
) -> Result<HashMap<i64, BTreeMap<String, String>>, ReportError> {
    let mut out: HashMap<i64, BTreeMap<String, String>> = HashMap::new();
    if learner_ids.is_empty() {
        return Ok(out);
    }

    let mut field_stmt = conn
        .prepare("SELECT id, short_name, default_data FROM user_info_field ORDER BY sort_order, id")
        .map_err(db_err)?;
    let fields: Vec<(i64, String, String)> = field_stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    if fields.is_empty() {
        return Ok(out);
    }

    let mut stored: HashMap<(i64, i64), String> = HashMap::new();
    for chunk in learner_ids.chunks(LEARNER_CHUNK) {
        let sql = format!(
            "SELECT user_id, field_id, data FROM user_info_data WHERE user_id IN ({})",
            placeholders(chunk.len())
        );
        let mut data_stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = data_stmt
            .query_map(params_from_iter(integer_binds(&[], chunk)), |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?, r.get::<_, String>(2)?))
            })
            .map_err(db_err)?;
        for row in rows {
            let (user_id, field_id, data) = row.map_err(db_err)?;
            stored.insert((user_id, field_id), data);
        }
    }

    for learner_id in learner_ids {
        let values = fields
            .iter()
            .map(|(field_id, short_name, default_data)| {
                let value = stored
                    .get(&(*learner_id, *field_id))
                    .cloned()
                    .unwrap_or_else(|| default_data.clone());
                (short_name.clone(), value)
            })
            .collect();
        out.insert(*learner_id, values);
    }
    Ok(out)
}

/// Learners holding an enrolment in the course that is active at `now`.
pub fn active_enrolments(
    conn: &Connection,
    course_id: i64,
    learner_ids: &[i64],
    now: i64,
) -> Result<HashSet<i64>, ReportError> {
    if learner_ids.is_empty() {
        return Ok(HashSet::new());
    }
    let mut active = HashSet::new();
    for chunk in learner_ids.chunks(LEARNER_CHUNK) {
        let sql = format!(
            "SELECT DISTINCT user_id
             FROM user_enrolments
             WHERE course_id = ? AND status = 0
               AND (time_start = 0 OR time_start <= ?)
               AND (time_end = 0 OR time_end > ?)
               AND user_id IN ({})",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let ids = stmt
            .query_map(
                params_from_iter(integer_binds(&[course_id, now, now], chunk)),
                |r| r.get::<_, i64>(0),
            )
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?;
        active.extend(ids);
    }
    Ok(active)
}
