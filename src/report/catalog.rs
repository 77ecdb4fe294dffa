use rusqlite::Connection;
use serde::{Serialize, Serializer};
use std::collections::HashSet;

use super::{db_err, Course, ReportError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModuleType {
    Quiz,
    Assignment,
    Other(String),
}

impl ModuleType {
    pub fn parse(name: &str) -> Self {
        match name {
            "quiz" => Self::Quiz,
            "assign" | "assignment" => Self::Assignment,
            other => Self::Other(other.to_string()),
        }
    }

    /// Store-side module name, also the completion resolver registry key.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Quiz => "quiz",
            Self::Assignment => "assign",
            Self::Other(name) => name,
        }
    }
}

impl Serialize for ModuleType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One gradable, module-backed activity of a course.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Course module id; keys completion results and column names.
    pub id: i64,
    pub module_type: ModuleType,
    pub instance_id: i64,
    pub grade_item_id: i64,
    pub name: String,
    pub section: Option<i64>,
    pub section_label: String,
    pub hidden: bool,
}

impl Activity {
    pub fn column_key(&self) -> String {
        format!("activity_{}", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub key: String,
    pub label: String,
    pub sortable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_type: Option<ModuleType>,
}

const FIXED_COLUMNS: [(&str, &str, bool); 10] = [
    ("firstname", "First name", true),
    ("lastname", "Last name", true),
    ("idnumber", "ID number", true),
    ("institution", "Institution", true),
    ("department", "Department", true),
    ("team", "Team", false),
    ("group", "Group", false),
    ("email", "Email address", true),
    ("suspended", "Suspended", false),
    ("lastaccess", "Last access", true),
];

pub fn section_label(section: Option<i64>, name: Option<&str>) -> String {
    match (section, name.map(str::trim).filter(|n| !n.is_empty())) {
        (_, Some(name)) => name.to_string(),
        (Some(0), None) => "General".to_string(),
        (Some(n), None) => format!("Section {}", n),
        (None, None) => String::new(),
    }
}

struct CatalogRow {
    activity: Activity,
    position: Option<usize>,
}

/// Gradable activities of the course, section ascending then position in the
/// section's module sequence. Hidden grade items and hidden modules are
/// dropped; a module with several grade items yields one entry.
pub fn list_gradable_activities(conn: &Connection, course: &Course) -> Result<Vec<Activity>, ReportError> {
    let mut stmt = conn
        .prepare(
            "SELECT cm.id, cm.module_name, cm.instance, gi.id, COALESCE(gi.item_name, ''),
                    cs.section, cs.name, COALESCE(cs.sequence, ''), gi.hidden, cm.visible
             FROM grade_items gi
             JOIN course_modules cm
               ON cm.module_name = gi.item_module
              AND cm.instance = gi.item_instance
              AND cm.course_id = gi.course_id
             LEFT JOIN course_sections cs ON cs.id = cm.section_id
             WHERE gi.course_id = ? AND gi.item_type = 'mod'
             ORDER BY gi.id",
        )
        .map_err(db_err)?;

    let rows = stmt
        .query_map([course.id], |r| {
            let cm_id: i64 = r.get(0)?;
            let module_name: String = r.get(1)?;
            let section: Option<i64> = r.get(5)?;
            let section_name: Option<String> = r.get(6)?;
            let sequence: String = r.get(7)?;
            let gi_hidden: i64 = r.get(8)?;
            let cm_visible: i64 = r.get(9)?;
            let position = sequence
                .split(',')
                .filter_map(|s| s.trim().parse::<i64>().ok())
                .position(|id| id == cm_id);
            Ok(CatalogRow {
                activity: Activity {
                    id: cm_id,
                    module_type: ModuleType::parse(&module_name),
                    instance_id: r.get(2)?,
                    grade_item_id: r.get(3)?,
                    name: r.get(4)?,
                    section,
                    section_label: section_label(section, section_name.as_deref()),
                    hidden: gi_hidden != 0 || cm_visible == 0,
                },
                position,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut seen: HashSet<i64> = HashSet::new();
    let mut visible: Vec<CatalogRow> = rows
        .into_iter()
        .filter(|row| !row.activity.hidden)
        .filter(|row| seen.insert(row.activity.id))
        .collect();
    visible.sort_by_key(|row| {
        (
            row.activity.section.unwrap_or(i64::MAX),
            row.position.unwrap_or(usize::MAX),
            row.activity.id,
        )
    });

    Ok(visible.into_iter().map(|row| row.activity).collect())
}

/// Fixed learner columns followed by one column per activity.
pub fn columns(activities: &[Activity]) -> Vec<Column> {
    let mut out: Vec<Column> = FIXED_COLUMNS
        .iter()
        .map(|(key, label, sortable)| Column {
            key: key.to_string(),
            label: label.to_string(),
            sortable: *sortable,
            activity_id: None,
            module_type: None,
        })
        .collect();
    for a in activities {
        out.push(Column {
            key: a.column_key(),
            label: if a.section_label.is_empty() {
                a.name.clone()
            } else {
                format!("{}: {}", a.section_label, a.name)
            },
            sortable: false,
            activity_id: Some(a.id),
            module_type: Some(a.module_type.clone()),
        });
    }
    out
}
