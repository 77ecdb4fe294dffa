use rusqlite::{params_from_iter, types::Value, Connection};
use serde::Serialize;

use super::{db_err, placeholders, Course, Filter, Limit, ReportContext, ReportError, SortSpec};

const COURSE_CONTEXT_LEVEL: i64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Learner {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub id_number: String,
    pub institution: String,
    pub department: String,
    pub email: String,
    pub last_access: Option<i64>,
    pub suspended: bool,
}

/// Context ids a role assignment may sit on to count for the course: the
/// course context itself plus every parent on its path.
pub fn course_context_ancestry(conn: &Connection, course_id: i64) -> Result<Vec<i64>, ReportError> {
    let mut stmt = conn
        .prepare("SELECT id, path FROM contexts WHERE context_level = ? AND instance_id = ?")
        .map_err(db_err)?;
    let rows = stmt
        .query_map((COURSE_CONTEXT_LEVEL, course_id), |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut ids: Vec<i64> = Vec::new();
    for (id, path) in rows {
        ids.push(id);
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if let Ok(parent) = part.parse::<i64>() {
                if !ids.contains(&parent) {
                    ids.push(parent);
                }
            }
        }
    }
    Ok(ids)
}

/// Escapes LIKE wildcards so the institution filter matches the value itself.
fn like_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Resolves the gradebook-relevant learners of a course.
pub struct EnrolmentResolver<'a> {
    conn: &'a Connection,
    role_ids: Vec<i64>,
}

struct Population {
    from_where: String,
    binds: Vec<Value>,
}

impl<'a> EnrolmentResolver<'a> {
    pub fn new(ctx: &ReportContext<'a>) -> Self {
        Self {
            conn: ctx.conn,
            role_ids: ctx.settings.role_ids(),
        }
    }

    /// `None` when the population is empty by construction (no roles
    /// configured or the course has no context).
    fn population(&self, course: &Course, filter: &Filter) -> Result<Option<Population>, ReportError> {
        if self.role_ids.is_empty() {
            return Ok(None);
        }
        let ancestry = course_context_ancestry(self.conn, course.id)?;
        if ancestry.is_empty() {
            return Ok(None);
        }

        let mut binds: Vec<Value> = Vec::new();
        binds.extend(self.role_ids.iter().map(|r| Value::Integer(*r)));
        binds.extend(ancestry.iter().map(|c| Value::Integer(*c)));

        let mut from_where = format!(
            "FROM users u
             JOIN (
               SELECT DISTINCT ra.user_id
               FROM role_assignments ra
               WHERE ra.role_id IN ({}) AND ra.context_id IN ({})
             ) rainner ON rainner.user_id = u.id ",
            placeholders(self.role_ids.len()),
            placeholders(ancestry.len())
        );
        if filter.group_id > 0 {
            from_where.push_str("JOIN course_group_members gm ON gm.user_id = u.id AND gm.group_id = ? ");
            binds.push(Value::Integer(filter.group_id));
        }
        from_where.push_str("WHERE 1 = 1 ");
        if let Some(institution) = filter.institution.as_deref() {
            from_where.push_str("AND u.institution LIKE ? ESCAPE '\\' ");
            binds.push(Value::Text(like_literal(institution)));
        }

        Ok(Some(Population { from_where, binds }))
    }

    pub fn count(&self, course: &Course, filter: &Filter) -> Result<i64, ReportError> {
        let Some(pop) = self.population(course, filter)? else {
            return Ok(0);
        };
        let sql = format!("SELECT COUNT(u.id) {}", pop.from_where);
        self.conn
            .query_row(&sql, params_from_iter(pop.binds), |r| r.get(0))
            .map_err(db_err)
    }

    pub fn fetch(
        &self,
        course: &Course,
        filter: &Filter,
        sort: &SortSpec,
        offset: usize,
        limit: Limit,
    ) -> Result<Vec<Learner>, ReportError> {
        if limit == Limit::Rows(0) {
            return Err(ReportError::validation("page size must be greater than zero"));
        }
        let Some(pop) = self.population(course, filter)? else {
            return Ok(Vec::new());
        };

        let sql = format!(
            "SELECT u.id, u.first_name, u.last_name, u.id_number, u.institution, u.department,
                    u.email, u.last_access, u.suspended
             {}
             ORDER BY {}
             LIMIT ? OFFSET ?",
            pop.from_where,
            sort.order_by()
        );
        let mut binds = pop.binds;
        binds.push(Value::Integer(limit.as_sql()));
        let offset = i64::try_from(offset)
            .map_err(|_| ReportError::validation("page is out of range"))?;
        binds.push(Value::Integer(offset));

        let mut stmt = self.conn.prepare(&sql).map_err(db_err)?;
        let learners = stmt
            .query_map(params_from_iter(binds), |r| {
                Ok(Learner {
                    id: r.get(0)?,
                    first_name: r.get(1)?,
                    last_name: r.get(2)?,
                    id_number: r.get(3)?,
                    institution: r.get(4)?,
                    department: r.get(5)?,
                    email: r.get(6)?,
                    last_access: r.get(7)?,
                    suspended: r.get::<_, i64>(8)? != 0,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?;
        Ok(learners)
    }

    /// Distinct non-empty institutions across the whole course population.
    pub fn institutions(&self, course: &Course) -> Result<Vec<String>, ReportError> {
        let Some(pop) = self.population(course, &Filter::default())? else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT DISTINCT u.institution {} AND u.institution <> '' ORDER BY u.institution",
            pop.from_where
        );
        let mut stmt = self.conn.prepare(&sql).map_err(db_err)?;
        let out = stmt
            .query_map(params_from_iter(pop.binds), |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?;
        Ok(out)
    }
}
