use rusqlite::Connection;
use serde_json::Value;

use super::error::err;
use super::types::{AppState, Request};
use crate::report::ReportError;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Integer param that may arrive as a JSON number or a numeric string.
pub fn param_i64(params: &Value, key: &str) -> Result<Option<i64>, ReportError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| {
            ReportError::validation(format!("{} must be an integer", key))
        }),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse::<i64>().map(Some).map_err(|_| {
            ReportError::validation(format!("{} must be an integer", key))
        }),
        Some(_) => Err(ReportError::validation(format!("{} must be an integer", key))),
    }
}

pub fn param_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub fn required_course(params: &Value) -> Result<i64, ReportError> {
    match param_i64(params, "course")? {
        Some(id) if id > 0 => Ok(id),
        _ => Err(ReportError::validation("course is required")),
    }
}

pub fn required_i64(params: &Value, key: &str) -> Result<i64, ReportError> {
    param_i64(params, key)?
        .ok_or_else(|| ReportError::validation(format!("missing {}", key)))
}

/// Non-negative page index or size; `None` when absent.
pub fn param_usize(params: &Value, key: &str) -> Result<Option<usize>, ReportError> {
    match param_i64(params, key)? {
        None => Ok(None),
        Some(n) if n < 0 => Err(ReportError::validation(format!("{} must be >= 0", key))),
        Some(n) => Ok(Some(n as usize)),
    }
}
