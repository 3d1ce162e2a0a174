use crate::aggregate::{self, AggregateContext};
use crate::grading;
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::handlers::settings::resolve_selector;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_aggregates_calculate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let (term, exam_type) = resolve_selector(conn, &req.params);

    let ctx = AggregateContext {
        conn,
        term: &term,
        exam_type: &exam_type,
    };
    // A null aggregate is the designed signal for "nothing to compute yet"
    // (missing student/class or not enough marks), not an error.
    match aggregate::calculate_student_aggregate(&ctx, &student_id) {
        Ok(aggregate) => ok(
            &req.id,
            json!({
                "studentId": student_id,
                "term": term,
                "examType": exam_type,
                "aggregate": aggregate
            }),
        ),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_aggregates_breakdown(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let (term, exam_type) = resolve_selector(conn, &req.params);

    let ctx = AggregateContext {
        conn,
        term: &term,
        exam_type: &exam_type,
    };
    match aggregate::calculate_student_aggregate_detailed(&ctx, &student_id) {
        Ok(breakdown) => {
            let breakdown = match breakdown {
                Some(b) => match serde_json::to_value(b) {
                    Ok(v) => v,
                    Err(e) => return err(&req.id, "serialize_failed", e.to_string(), None),
                },
                None => serde_json::Value::Null,
            };
            ok(
                &req.id,
                json!({
                    "studentId": student_id,
                    "term": term,
                    "examType": exam_type,
                    "breakdown": breakdown
                }),
            )
        }
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_aggregates_update_all(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (term, exam_type) = resolve_selector(conn, &req.params);
    let ctx = AggregateContext {
        conn,
        term: &term,
        exam_type: &exam_type,
    };
    match aggregate::update_all_student_aggregates(&ctx) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "term": term,
                "examType": exam_type,
                "updatedCount": summary.updated_count,
                "failedCount": summary.failed_count,
                "totalStudents": summary.total_students
            }),
        ),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_aggregates_grade_scale(_state: &mut AppState, req: &Request) -> serde_json::Value {
    match serde_json::to_value(grading::grade_scale()) {
        Ok(bands) => ok(&req.id, json!({ "bands": bands })),
        Err(e) => err(&req.id, "serialize_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "aggregates.calculate" => Some(handle_aggregates_calculate(state, req)),
        "aggregates.breakdown" => Some(handle_aggregates_breakdown(state, req)),
        "aggregates.updateAll" => Some(handle_aggregates_update_all(state, req)),
        "aggregates.gradeScale" => Some(handle_aggregates_grade_scale(state, req)),
        _ => None,
    }
}
