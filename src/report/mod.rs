//! Learner activity report engine.
//!
//! Leaves first: [`enrolment`] resolves the learner population of a course,
//! [`catalog`] lists the gradable activities shown as columns, [`completion`]
//! classifies each (learner, activity) pair and [`assemble`] stitches the
//! three into table rows.

pub mod assemble;
pub mod catalog;
pub mod completion;
pub mod enrolment;
pub mod profile;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine error surfaced to the IPC layer as `{code, message, details}`.
#[derive(Debug, Clone, Serialize)]
pub struct ReportError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ReportError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ReportError {}

pub(crate) fn db_err(e: rusqlite::Error) -> ReportError {
    tracing::warn!(error = %e, "report store query failed");
    ReportError::new("db_query_failed", e.to_string())
}

/// Report configuration, read from the workspace settings store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportSettings {
    pub student_role: Option<i64>,
    pub gradebook_roles: Vec<i64>,
    pub team_custom_field: Option<String>,
    pub default_per_page: i64,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            student_role: None,
            gradebook_roles: vec![5],
            team_custom_field: None,
            default_per_page: 25,
        }
    }
}

impl ReportSettings {
    /// A configured student role narrows the set to that single role.
    pub fn role_ids(&self) -> Vec<i64> {
        match self.student_role {
            Some(role) => vec![role],
            None => self.gradebook_roles.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReportContext<'a> {
    pub conn: &'a Connection,
    pub settings: &'a ReportSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: i64,
    pub fullname: String,
    pub shortname: String,
}

pub fn load_course(conn: &Connection, course_id: i64) -> Result<Course, ReportError> {
    conn.query_row(
        "SELECT id, fullname, shortname FROM courses WHERE id = ?",
        [course_id],
        |r| {
            Ok(Course {
                id: r.get(0)?,
                fullname: r.get(1)?,
                shortname: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| {
        ReportError::not_found("course not found")
            .with_details(serde_json::json!({ "course": course_id }))
    })
}

/// Courses offered by the filter form, ordered by name.
pub fn visible_courses(conn: &Connection) -> Result<Vec<Course>, ReportError> {
    let mut stmt = conn
        .prepare("SELECT id, fullname, shortname FROM courses WHERE visible = 1 ORDER BY fullname, id")
        .map_err(db_err)?;
    let courses = stmt
        .query_map([], |r| {
            Ok(Course {
                id: r.get(0)?,
                fullname: r.get(1)?,
                shortname: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(courses)
}

/// Narrows the enrolled population. Both parts apply together when set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    /// 0 means all groups.
    pub group_id: i64,
    pub institution: Option<String>,
}

impl Filter {
    pub fn new(group_id: Option<i64>, institution: Option<&str>) -> Self {
        Self {
            group_id: group_id.filter(|g| *g > 0).unwrap_or(0),
            institution: institution
                .map(str::trim)
                .filter(|s| !s.is_empty() && *s != "0")
                .map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    Firstname,
    Lastname,
    Idnumber,
    Institution,
    Department,
    Email,
    Lastaccess,
}

impl SortField {
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "firstname" => Some(Self::Firstname),
            "lastname" => Some(Self::Lastname),
            "idnumber" => Some(Self::Idnumber),
            "institution" => Some(Self::Institution),
            "department" => Some(Self::Department),
            "email" => Some(Self::Email),
            "lastaccess" => Some(Self::Lastaccess),
            _ => None,
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::Firstname => "u.first_name",
            Self::Lastname => "u.last_name",
            Self::Idnumber => "u.id_number",
            Self::Institution => "u.institution",
            Self::Department => "u.department",
            Self::Email => "u.email",
            Self::Lastaccess => "u.last_access",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            field: SortField::Lastname,
            direction: SortDirection::Asc,
        }
    }
}

impl SortSpec {
    pub fn parse(raw: Option<&serde_json::Value>) -> Result<Self, ReportError> {
        let Some(raw) = raw.filter(|v| !v.is_null()) else {
            return Ok(Self::default());
        };
        let Some(obj) = raw.as_object() else {
            return Err(ReportError::validation("sort must be an object"));
        };

        let field = match obj.get("field").and_then(|v| v.as_str()) {
            None => SortField::Lastname,
            Some(key) => SortField::parse(key).ok_or_else(|| {
                ReportError::validation("sort.field is not a sortable column")
                    .with_details(serde_json::json!({ "field": key }))
            })?,
        };
        let direction = match obj
            .get("direction")
            .and_then(|v| v.as_str())
            .map(|s| s.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("asc") => SortDirection::Asc,
            Some("desc") => SortDirection::Desc,
            Some(other) => {
                return Err(ReportError::validation("sort.direction must be asc or desc")
                    .with_details(serde_json::json!({ "direction": other })))
            }
        };
        Ok(Self { field, direction })
    }

    pub(crate) fn order_by(&self) -> String {
        let dir = match self.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        format!("{} {}, u.id ASC", self.field.column(), dir)
    }
}

/// Row window for the enrolment fetch; `All` is the full-export sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Rows(usize),
    All,
}

impl Limit {
    /// A row count beyond `i64::MAX` is as good as unbounded.
    pub(crate) fn as_sql(self) -> i64 {
        match self {
            Limit::Rows(n) => i64::try_from(n).unwrap_or(i64::MAX),
            Limit::All => -1,
        }
    }
}

/// Bound on learner ids per `IN (...)` list so exports stay under SQLite's
/// host parameter limit.
pub(crate) const LEARNER_CHUNK: usize = 500;

pub(crate) fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_normalises_all_groups_and_blank_institution() {
        let f = Filter::new(Some(0), Some("  "));
        assert_eq!(f, Filter::default());
        let f = Filter::new(Some(-3), Some("0"));
        assert_eq!(f.group_id, 0);
        assert_eq!(f.institution, None);
        let f = Filter::new(Some(7), Some(" North "));
        assert_eq!(f.group_id, 7);
        assert_eq!(f.institution.as_deref(), Some("North"));
    }

    #[test]
    fn sort_defaults_to_lastname_ascending() {
        assert_eq!(SortSpec::parse(None).expect("sort"), SortSpec::default());
        assert_eq!(
            SortSpec::parse(Some(&json!(null))).expect("sort"),
            SortSpec::default()
        );
        let s = SortSpec::parse(Some(&json!({ "field": "email", "direction": "DESC" })))
            .expect("sort");
        assert_eq!(s.field, SortField::Email);
        assert_eq!(s.direction, SortDirection::Desc);
    }

    #[test]
    fn sort_rejects_unsortable_columns() {
        let e = SortSpec::parse(Some(&json!({ "field": "group" }))).expect_err("group");
        assert_eq!(e.code, "bad_params");
        let e = SortSpec::parse(Some(&json!({ "field": "lastname", "direction": "up" })))
            .expect_err("direction");
        assert_eq!(e.code, "bad_params");
    }

    #[test]
    fn student_role_overrides_gradebook_roles() {
        let mut s = ReportSettings::default();
        assert_eq!(s.role_ids(), vec![5]);
        s.student_role = Some(9);
        assert_eq!(s.role_ids(), vec![9]);
    }

    #[test]
    fn hidden_courses_are_not_offered() {
        let conn = fixtures::seeded();
        conn.execute("UPDATE courses SET visible = 0 WHERE id = 11", [])
            .expect("hide");
        let ids: Vec<i64> = visible_courses(&conn).expect("courses").iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![10]);
    }

    #[test]
    fn oversized_row_limit_saturates() {
        assert_eq!(Limit::Rows(25).as_sql(), 25);
        assert_eq!(Limit::Rows(usize::MAX).as_sql(), i64::MAX);
        assert_eq!(Limit::All.as_sql(), -1);
    }

    #[test]
    fn missing_course_is_not_found() {
        let conn = fixtures::seeded();
        assert_eq!(load_course(&conn, 10).expect("course").fullname, "Biology 101");
        let e = load_course(&conn, 999).expect_err("missing");
        assert_eq!(e.code, "not_found");
    }
}
