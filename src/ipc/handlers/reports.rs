use chrono::{DateTime, Local, TimeZone};
use rusqlite::Connection;
use serde_json::{json, Value};

use crate::ipc::error::{err, ok, report_err};
use crate::ipc::handlers::setup::load_report_settings;
use crate::ipc::helpers::{db_conn, param_i64, param_str, param_usize, required_course, required_i64};
use crate::ipc::types::{AppState, Request};
use crate::report::assemble::{self, PageMode};
use crate::report::catalog;
use crate::report::enrolment::EnrolmentResolver;
use crate::report::{load_course, Filter, ReportContext, ReportError, ReportSettings, SortSpec};

const EXPORT_TITLE: &str = "Learner Activity Report";

fn report_settings(conn: &Connection, req: &Request) -> Result<ReportSettings, Value> {
    load_report_settings(conn).map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn parse_filter(params: &Value) -> Result<Filter, ReportError> {
    let group = param_i64(params, "group")?;
    Ok(Filter::new(group, param_str(params, "institution")))
}

/// `"<course> - Learner Activity Report - 5-Mar-2024 2-07 pm"`
pub fn export_filename<Tz: TimeZone>(course_fullname: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{} - {} - {}",
        course_fullname.trim(),
        EXPORT_TITLE,
        at.format("%-d-%b-%Y %-I-%M %P")
    )
}

pub fn summary_line(total_count: i64) -> String {
    format!("{} users loaded.", total_count)
}

fn handle_report_activities(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_course(&req.params) {
        Ok(v) => v,
        Err(e) => return report_err(&req.id, e),
    };
    let course = match load_course(conn, course_id) {
        Ok(v) => v,
        Err(e) => return report_err(&req.id, e),
    };
    match catalog::list_gradable_activities(conn, &course) {
        Ok(activities) => {
            let columns = catalog::columns(&activities);
            ok(
                &req.id,
                json!({ "course": course, "activities": activities, "columns": columns }),
            )
        }
        Err(e) => report_err(&req.id, e),
    }
}

fn handle_report_count(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let settings = match report_settings(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_course(&req.params) {
        Ok(v) => v,
        Err(e) => return report_err(&req.id, e),
    };
    let filter = match parse_filter(&req.params) {
        Ok(v) => v,
        Err(e) => return report_err(&req.id, e),
    };
    let ctx = ReportContext {
        conn,
        settings: &settings,
    };
    let counted = load_course(conn, course_id)
        .and_then(|course| EnrolmentResolver::new(&ctx).count(&course, &filter));
    match counted {
        Ok(total) => ok(&req.id, json!({ "totalCount": total })),
        Err(e) => report_err(&req.id, e),
    }
}

fn handle_report_evaluate(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let settings = match report_settings(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ids = required_course(&req.params).and_then(|course| {
        Ok((
            course,
            required_i64(&req.params, "activityId")?,
            required_i64(&req.params, "learnerId")?,
        ))
    });
    let (course_id, activity_id, learner_id) = match ids {
        Ok(v) => v,
        Err(e) => return report_err(&req.id, e),
    };
    let ctx = ReportContext {
        conn,
        settings: &settings,
    };
    match assemble::evaluate_one(&ctx, course_id, activity_id, learner_id) {
        Ok((activity, status)) => ok(
            &req.id,
            json!({
                "activityId": activity.id,
                "moduleType": activity.module_type,
                "learnerId": learner_id,
                "status": status,
                "label": status.label(),
            }),
        ),
        Err(e) => report_err(&req.id, e),
    }
}

fn handle_report_learner_activity(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let settings = match report_settings(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_course(&req.params) {
        Ok(v) => v,
        Err(e) => return report_err(&req.id, e),
    };
    let filter = match parse_filter(&req.params) {
        Ok(v) => v,
        Err(e) => return report_err(&req.id, e),
    };
    let sort = match SortSpec::parse(req.params.get("sort")) {
        Ok(v) => v,
        Err(e) => return report_err(&req.id, e),
    };
    let download = param_str(&req.params, "download")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_ascii_lowercase);

    let mode = match &download {
        Some(_) => PageMode::Export,
        None => {
            let paging = param_usize(&req.params, "page").and_then(|page| {
                Ok((page.unwrap_or(0), param_usize(&req.params, "perpage")?))
            });
            let (page, per_page) = match paging {
                Ok(v) => v,
                Err(e) => return report_err(&req.id, e),
            };
            let per_page = per_page.unwrap_or(settings.default_per_page.max(1) as usize);
            PageMode::Interactive { page, per_page }
        }
    };

    let ctx = ReportContext {
        conn,
        settings: &settings,
    };
    let now = Local::now();
    let report = match assemble::assemble(&ctx, course_id, &filter, &sort, mode, now.timestamp()) {
        Ok(v) => v,
        Err(e) => return report_err(&req.id, e),
    };

    let export = download.map(|format| {
        json!({
            "format": format,
            "filename": export_filename(&report.course.fullname, &now),
        })
    });
    let summary = summary_line(report.total_count);

    let mut payload = json!(report);
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("export".to_string(), export.unwrap_or(Value::Null));
        obj.insert("summary".to_string(), Value::String(summary));
        obj.insert("sort".to_string(), json!(sort));
        obj.insert("filter".to_string(), json!(filter));
    }
    ok(&req.id, payload)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "report.activities" => Some(handle_report_activities(state, req)),
        "report.count" => Some(handle_report_count(state, req)),
        "report.evaluate" => Some(handle_report_evaluate(state, req)),
        "report.learnerActivity" => Some(handle_report_learner_activity(state, req)),
        _ => None,
    }
}
