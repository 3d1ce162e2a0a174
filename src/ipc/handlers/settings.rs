use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

pub const AGGREGATE_DEFAULTS_KEY: &str = "aggregate.defaults";
pub const DEFAULT_TERM: &str = "Term 3";
pub const DEFAULT_EXAM_TYPE: &str = "End of Term";

/// Picks the (term, examType) selector for a request: explicit params win,
/// then the workspace's saved defaults, then the stock defaults.
pub fn resolve_selector(conn: &Connection, params: &serde_json::Value) -> (String, String) {
    let saved = db::settings_get_json(conn, AGGREGATE_DEFAULTS_KEY)
        .ok()
        .flatten();

    let from_saved = |field: &str| {
        saved
            .as_ref()
            .and_then(|v| v.get(field))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    let term = params
        .get("term")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| from_saved("term"))
        .unwrap_or_else(|| DEFAULT_TERM.to_string());
    let exam_type = params
        .get("examType")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| from_saved("examType"))
        .unwrap_or_else(|| DEFAULT_EXAM_TYPE.to_string());

    (term, exam_type)
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let key = match req.params.get("key").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => return err(&req.id, "bad_params", "missing key", None),
    };

    match db::settings_get_json(conn, &key) {
        Ok(value) => ok(
            &req.id,
            json!({ "key": key, "value": value.unwrap_or(serde_json::Value::Null) }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_settings_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let key = match req.params.get("key").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => return err(&req.id, "bad_params", "missing key", None),
    };
    let Some(value) = req.params.get("value") else {
        return err(&req.id, "bad_params", "missing value", None);
    };

    match db::settings_set_json(conn, &key, value) {
        Ok(()) => ok(&req.id, json!({ "key": key, "value": value })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.set" => Some(handle_settings_set(state, req)),
        _ => None,
    }
}
