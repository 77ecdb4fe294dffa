use rusqlite::{params_from_iter, types::Value, Connection};
use serde::Serialize;
use std::collections::HashMap;

use super::catalog::Activity;
use super::{db_err, placeholders, ReportError, LEARNER_CHUNK};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CompletionStatus {
    #[default]
    Empty,
    InProgress,
    ReadyForGrade,
    Completed,
}

impl CompletionStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Empty => "",
            Self::InProgress => "In progress",
            Self::ReadyForGrade => "Ready for grade",
            Self::Completed => "Completed",
        }
    }
}

/// Activity-type specific status lookup. Implementations answer for a whole
/// page of learners at once; learners absent from the result are `Empty`.
pub trait StatusResolver {
    fn resolve(
        &self,
        conn: &Connection,
        instance_id: i64,
        learner_ids: &[i64],
    ) -> Result<HashMap<i64, CompletionStatus>, ReportError>;
}

/// Only the first attempt (lowest attempt id) counts, even when a later
/// attempt finished.
pub fn classify_quiz_attempt(first_attempt_sum_grades: Option<Option<f64>>) -> CompletionStatus {
    match first_attempt_sum_grades {
        None => CompletionStatus::Empty,
        Some(None) => CompletionStatus::InProgress,
        Some(Some(_)) => CompletionStatus::Completed,
    }
}

pub fn classify_assign_submission(status: &str, grade: Option<f64>) -> CompletionStatus {
    if grade.is_some() {
        return CompletionStatus::Completed;
    }
    match status {
        "new" => CompletionStatus::InProgress,
        "submitted" => CompletionStatus::ReadyForGrade,
        _ => CompletionStatus::Empty,
    }
}

pub struct QuizResolver;

impl StatusResolver for QuizResolver {
    fn resolve(
        &self,
        conn: &Connection,
        instance_id: i64,
        learner_ids: &[i64],
    ) -> Result<HashMap<i64, CompletionStatus>, ReportError> {
        let mut out = HashMap::new();
        for chunk in learner_ids.chunks(LEARNER_CHUNK) {
            let sql = format!(
                "SELECT qa.user_id, qa.sum_grades
                 FROM quiz_attempts qa
                 WHERE qa.quiz = ? AND qa.user_id IN ({})
                 ORDER BY qa.user_id, qa.id ASC",
                placeholders(chunk.len())
            );
            let mut binds: Vec<Value> = Vec::with_capacity(chunk.len() + 1);
            binds.push(Value::Integer(instance_id));
            binds.extend(chunk.iter().map(|id| Value::Integer(*id)));

            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(params_from_iter(binds), |r| {
                    Ok((r.get::<_, i64>(0)?, r.get::<_, Option<f64>>(1)?))
                })
                .map_err(db_err)?;
            for row in rows {
                let (user_id, sum_grades) = row.map_err(db_err)?;
                out.entry(user_id)
                    .or_insert_with(|| classify_quiz_attempt(Some(sum_grades)));
            }
        }
        Ok(out)
    }
}

pub struct AssignmentResolver;

impl StatusResolver for AssignmentResolver {
    fn resolve(
        &self,
        conn: &Connection,
        instance_id: i64,
        learner_ids: &[i64],
    ) -> Result<HashMap<i64, CompletionStatus>, ReportError> {
        let mut out = HashMap::new();
        for chunk in learner_ids.chunks(LEARNER_CHUNK) {
            let sql = format!(
                "SELECT s.user_id, s.status, g.grade
                 FROM assign_submission s
                 LEFT JOIN assign_grades g
                   ON g.assignment = s.assignment AND g.user_id = s.user_id
                 WHERE s.assignment = ? AND s.latest = 1 AND s.user_id IN ({})
                 ORDER BY s.user_id, s.id ASC, g.id ASC",
                placeholders(chunk.len())
            );
            let mut binds: Vec<Value> = Vec::with_capacity(chunk.len() + 1);
            binds.push(Value::Integer(instance_id));
            binds.extend(chunk.iter().map(|id| Value::Integer(*id)));

            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(params_from_iter(binds), |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, Option<f64>>(2)?,
                    ))
                })
                .map_err(db_err)?;
            for row in rows {
                let (user_id, status, grade) = row.map_err(db_err)?;
                out.entry(user_id)
                    .or_insert_with(|| classify_assign_submission(&status, grade));
            }
        }
        Ok(out)
    }
}

/// Dispatches completion lookups by module type. Types without a registered
/// resolver evaluate to `Empty`.
pub struct CompletionEvaluator<'a> {
    conn: &'a Connection,
    resolvers: HashMap<String, Box<dyn StatusResolver>>,
}

impl<'a> CompletionEvaluator<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        let mut evaluator = Self {
            conn,
            resolvers: HashMap::new(),
        };
        evaluator.register("quiz", Box::new(QuizResolver));
        evaluator.register("assign", Box::new(AssignmentResolver));
        evaluator
    }

    pub fn register(&mut self, module_name: &str, resolver: Box<dyn StatusResolver>) {
        self.resolvers.insert(module_name.to_string(), resolver);
    }

    pub fn has_resolver(&self, activity: &Activity) -> bool {
        self.resolvers.contains_key(activity.module_type.as_str())
    }

    pub fn evaluate(&self, activity: &Activity, learner_id: i64) -> Result<CompletionStatus, ReportError> {
        let statuses = self.evaluate_many(activity, &[learner_id])?;
        Ok(statuses.get(&learner_id).copied().unwrap_or_default())
    }

    /// One lookup per activity covering every learner on the page.
    pub fn evaluate_many(
        &self,
        activity: &Activity,
        learner_ids: &[i64],
    ) -> Result<HashMap<i64, CompletionStatus>, ReportError> {
        if learner_ids.is_empty() {
            return Ok(HashMap::new());
        }
        match self.resolvers.get(activity.module_type.as_str()) {
            Some(resolver) => resolver.resolve(self.conn, activity.instance_id, learner_ids),
            None => Ok(HashMap::new()),
        }
    }
}
