use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use super::catalog::{self, Activity, Column};
use super::completion::{CompletionEvaluator, CompletionStatus};
use super::enrolment::{EnrolmentResolver, Learner};
use super::profile;
use super::{load_course, Course, Filter, Limit, ReportContext, ReportError, SortSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMode {
    Interactive { page: usize, per_page: usize },
    /// Full export: one page holding the whole population.
    Export,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub id: i64,
    pub firstname: String,
    pub lastname: String,
    pub idnumber: String,
    pub institution: String,
    pub department: String,
    pub team: String,
    pub group: String,
    pub email: String,
    pub suspended: bool,
    pub lastaccess: Option<i64>,
    pub lastaccess_display: String,
    /// Completion per course module id.
    pub activities: BTreeMap<i64, CompletionStatus>,
    pub custom_fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPage {
    pub render_id: String,
    pub course: Course,
    pub columns: Vec<Column>,
    pub activities: Vec<Activity>,
    pub rows: Vec<ReportRow>,
    pub total_count: i64,
    pub page: usize,
    pub per_page: usize,
}

pub fn last_access_display(last_access: Option<i64>) -> String {
    last_access
        .filter(|ts| *ts > 0)
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "Never".to_string())
}

fn window(mode: PageMode, total_count: i64) -> Result<(usize, usize, usize, Limit), ReportError> {
    match mode {
        PageMode::Interactive { page, per_page } => {
            if per_page == 0 {
                return Err(ReportError::validation("perpage must be greater than zero"));
            }
            let offset = page
                .checked_mul(per_page)
                .filter(|offset| i64::try_from(*offset).is_ok())
                .ok_or_else(|| ReportError::validation("page is out of range"))?;
            Ok((page, per_page, offset, Limit::Rows(per_page)))
        }
        PageMode::Export => Ok((0, total_count.max(0) as usize, 0, Limit::All)),
    }
}

/// Builds one page of report rows. The activity catalog is read once and
/// completion is looked up per activity for the whole page of learners.
pub fn assemble(
    ctx: &ReportContext<'_>,
    course_id: i64,
    filter: &Filter,
    sort: &SortSpec,
    mode: PageMode,
    now: i64,
) -> Result<ReportPage, ReportError> {
    let render_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!("report", render_id = %render_id, course = course_id);
    let _guard = span.enter();

    let course = load_course(ctx.conn, course_id)?;
    let enrolment = EnrolmentResolver::new(ctx);
    let total_count = enrolment.count(&course, filter)?;
    let (page, per_page, offset, limit) = window(mode, total_count)?;
    let learners = enrolment.fetch(&course, filter, sort, offset, limit)?;

    let activities = catalog::list_gradable_activities(ctx.conn, &course)?;
    let columns = catalog::columns(&activities);
    let learner_ids: Vec<i64> = learners.iter().map(|l| l.id).collect();

    let evaluator = CompletionEvaluator::new(ctx.conn);
    let mut statuses: Vec<HashMap<i64, CompletionStatus>> = Vec::with_capacity(activities.len());
    let mut unresolved: HashSet<&str> = HashSet::new();
    for activity in &activities {
        if !evaluator.has_resolver(activity) && unresolved.insert(activity.module_type.as_str()) {
            tracing::debug!(
                module = activity.module_type.as_str(),
                "no completion resolver for module type"
            );
        }
        statuses.push(evaluator.evaluate_many(activity, &learner_ids)?);
    }

    let groups = profile::group_names(ctx.conn, course.id, &learner_ids)?;
    let mut fields = profile::custom_fields(ctx.conn, &learner_ids)?;
    let active = profile::active_enrolments(ctx.conn, course.id, &learner_ids, now)?;
    let team_field = ctx.settings.team_custom_field.as_deref();

    let rows: Vec<ReportRow> = learners
        .into_iter()
        .map(|learner: Learner| {
            let custom_fields = fields.remove(&learner.id).unwrap_or_default();
            let team = team_field
                .and_then(|key| custom_fields.get(key))
                .cloned()
                .unwrap_or_default();
            let group = profile::group_display(
                groups.get(&learner.id).map(Vec::as_slice).unwrap_or(&[]),
            );
            let per_activity = activities
                .iter()
                .zip(&statuses)
                .map(|(a, by_learner)| {
                    (a.id, by_learner.get(&learner.id).copied().unwrap_or_default())
                })
                .collect();
            ReportRow {
                id: learner.id,
                suspended: learner.suspended || !active.contains(&learner.id),
                lastaccess_display: last_access_display(learner.last_access),
                lastaccess: learner.last_access,
                firstname: learner.first_name,
                lastname: learner.last_name,
                idnumber: learner.id_number,
                institution: learner.institution,
                department: learner.department,
                email: learner.email,
                team,
                group,
                activities: per_activity,
                custom_fields,
            }
        })
        .collect();

    tracing::info!(
        rows = rows.len(),
        total = total_count,
        activities = activities.len(),
        "report assembled"
    );

    Ok(ReportPage {
        render_id,
        course,
        columns,
        activities,
        rows,
        total_count,
        page,
        per_page,
    })
}

/// Completion of one learner on one catalog activity of the course.
pub fn evaluate_one(
    ctx: &ReportContext<'_>,
    course_id: i64,
    activity_id: i64,
    learner_id: i64,
) -> Result<(Activity, CompletionStatus), ReportError> {
    let course = load_course(ctx.conn, course_id)?;
    let activity = catalog::list_gradable_activities(ctx.conn, &course)?
        .into_iter()
        .find(|a| a.id == activity_id)
        .ok_or_else(|| {
            ReportError::not_found("activity not found in course catalog")
                .with_details(serde_json::json!({ "activityId": activity_id }))
        })?;
    let status = CompletionEvaluator::new(ctx.conn).evaluate(&activity, learner_id)?;
    Ok((activity, status))
}
