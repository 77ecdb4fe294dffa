use serde_json::{json, Value};

use crate::ipc::error::{ok, report_err};
use crate::ipc::handlers::setup::load_report_settings;
use crate::ipc::helpers::{db_conn, param_i64};
use crate::ipc::types::{AppState, Request};
use crate::report::enrolment::EnrolmentResolver;
use crate::report::{load_course, profile, visible_courses, ReportContext, ReportError};

/// Course list plus, for a chosen course, the institutions and groups the
/// report can be narrowed by.
fn filter_options(conn: &rusqlite::Connection, course_id: Option<i64>) -> Result<Value, ReportError> {
    let courses: Vec<Value> = visible_courses(conn)?
        .into_iter()
        .map(|c| json!({ "id": c.id, "fullname": c.fullname }))
        .collect();

    let Some(course_id) = course_id.filter(|id| *id > 0) else {
        return Ok(json!({ "courses": courses }));
    };
    let course = load_course(conn, course_id)?;
    let settings = load_report_settings(conn)
        .map_err(|e| ReportError::new("db_query_failed", e.to_string()))?;
    let ctx = ReportContext {
        conn,
        settings: &settings,
    };
    let institutions = EnrolmentResolver::new(&ctx).institutions(&course)?;
    let groups = profile::course_groups(conn, course.id)?;

    Ok(json!({
        "courses": courses,
        "course": course,
        "institutions": institutions,
        "groups": groups,
    }))
}

fn handle_filters_options(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match param_i64(&req.params, "course") {
        Ok(v) => v,
        Err(e) => return report_err(&req.id, e),
    };
    match filter_options(conn, course_id) {
        Ok(v) => ok(&req.id, v),
        Err(e) => report_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "filters.options" => Some(handle_filters_options(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures;

    #[test]
    fn options_without_course_list_only_courses() {
        let conn = fixtures::seeded();
        let v = filter_options(&conn, None).expect("options");
        assert_eq!(v["courses"][0]["fullname"], "Biology 101");
        assert_eq!(v["courses"][1]["fullname"], "Chemistry");
        assert!(v.get("groups").is_none());
    }

    #[test]
    fn options_for_course_carry_institutions_and_groups() {
        let conn = fixtures::seeded();
        let v = filter_options(&conn, Some(10)).expect("options");
        assert_eq!(v["institutions"], json!(["North", "South"]));
        assert_eq!(v["groups"][0]["name"], "Blue");
        assert_eq!(v["groups"][1]["id"], 100);

        let e = filter_options(&conn, Some(404)).expect_err("unknown");
        assert_eq!(e.code, "not_found");
    }
}
