use crate::aggregate::{self, AggregateContext};
use crate::grading;
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::handlers::settings::resolve_selector;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: String,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn new(code: &str, message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details,
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, &self.code, self.message, self.details)
    }

    fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string(), None)
    }
}

fn require_student(conn: &Connection, student_id: &str) -> Result<(), HandlerErr> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new(
            "not_found",
            "student not found",
            Some(json!({ "studentId": student_id })),
        ));
    }
    Ok(())
}

fn require_subject(conn: &Connection, subject_id: &str) -> Result<(), HandlerErr> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new(
            "not_found",
            "subject not found",
            Some(json!({ "subjectId": subject_id })),
        ));
    }
    Ok(())
}

fn upsert_mark(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    term: &str,
    exam_type: &str,
    score: f64,
    grade: u8,
) -> Result<(), HandlerErr> {
    let mark_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO marks(id, student_id, subject_id, term, exam_type, score, grade, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
         ON CONFLICT(student_id, subject_id, term, exam_type) DO UPDATE SET
           score = excluded.score,
           grade = excluded.grade,
           updated_at = excluded.updated_at",
        (
            &mark_id, student_id, subject_id, term, exam_type, score, grade,
        ),
    )
    .map_err(|e| {
        HandlerErr::new(
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "marks" })),
        )
    })?;
    Ok(())
}

/// Recompute and store the student's aggregate after a mark change. When the
/// remaining marks no longer support a computation, the stored value is
/// cleared rather than left stale.
fn refresh_aggregate(
    conn: &Connection,
    student_id: &str,
    term: &str,
    exam_type: &str,
) -> Result<Option<f64>, HandlerErr> {
    let ctx = AggregateContext {
        conn,
        term,
        exam_type,
    };
    let computed = aggregate::calculate_student_aggregate(&ctx, student_id)
        .map_err(|e| HandlerErr::new(&e.code, e.message, e.details))?;

    conn.execute(
        "UPDATE students
         SET aggregate = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        (computed, student_id),
    )
    .map_err(HandlerErr::db)?;
    Ok(computed)
}

fn handle_marks_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let raw_score = match req.params.get("score").and_then(|v| v.as_f64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing/invalid score", None),
    };
    let (term, exam_type) = resolve_selector(conn, &req.params);

    // The single validation gate in front of mark entry.
    let score = match grading::validate_and_normalize_score(raw_score) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, e),
    };
    let grade = match grading::calculate_grade(score) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, e),
    };

    if let Err(e) = require_student(conn, &student_id) {
        return e.response(&req.id);
    }
    if let Err(e) = require_subject(conn, &subject_id) {
        return e.response(&req.id);
    }

    if let Err(e) = upsert_mark(
        conn,
        &student_id,
        &subject_id,
        &term,
        &exam_type,
        score,
        grade,
    ) {
        return e.response(&req.id);
    }

    let aggregate = match refresh_aggregate(conn, &student_id, &term, &exam_type) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "term": term,
            "examType": exam_type,
            "score": score,
            "grade": grade,
            "gradeDescription": grading::grade_description(grade),
            "aggregateUpdated": aggregate.is_some(),
            "aggregate": aggregate
        }),
    )
}

fn handle_marks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "marks": [] }));
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let (term, exam_type) = resolve_selector(conn, &req.params);

    let mut stmt = match conn.prepare(
        "SELECT m.id, m.subject_id, s.name, s.code, s.subject_type, m.score
         FROM marks m
         JOIN subjects s ON s.id = m.subject_id
         WHERE m.student_id = ? AND m.term = ? AND m.exam_type = ?
         ORDER BY s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Grades are derived from the score on every read; the stored grade is a
    // cache for external report queries and is never trusted here.
    let rows = stmt
        .query_map((&student_id, &term, &exam_type), |row| {
            let mark_id: String = row.get(0)?;
            let subject_id: String = row.get(1)?;
            let subject_name: String = row.get(2)?;
            let subject_code: String = row.get(3)?;
            let subject_type: String = row.get(4)?;
            let score: f64 = row.get(5)?;
            Ok((
                mark_id,
                subject_id,
                subject_name,
                subject_code,
                subject_type,
                score,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut marks = Vec::with_capacity(rows.len());
    for (mark_id, subject_id, subject_name, subject_code, subject_type, score) in rows {
        let grade = match grading::calculate_grade(score) {
            Ok(v) => v,
            Err(e) => return calc_err(&req.id, e),
        };
        marks.push(json!({
            "markId": mark_id,
            "subjectId": subject_id,
            "subjectName": subject_name,
            "subjectCode": subject_code,
            "subjectType": subject_type,
            "term": term,
            "examType": exam_type,
            "score": score,
            "grade": grade,
            "gradeDescription": grading::grade_description(grade)
        }));
    }

    ok(&req.id, json!({ "marks": marks }))
}

fn handle_marks_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mark_id = match req.params.get("markId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing markId", None),
    };

    let row: Option<(String, String, String)> = match conn
        .query_row(
            "SELECT student_id, term, exam_type FROM marks WHERE id = ?",
            [&mark_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((student_id, term, exam_type)) = row else {
        return err(&req.id, "not_found", "mark not found", None);
    };

    if let Err(e) = conn.execute("DELETE FROM marks WHERE id = ?", [&mark_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "marks" })),
        );
    }

    let aggregate = match refresh_aggregate(conn, &student_id, &term, &exam_type) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    ok(
        &req.id,
        json!({
            "markId": mark_id,
            "deleted": true,
            "aggregateUpdated": aggregate.is_some(),
            "aggregate": aggregate
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.upsert" => Some(handle_marks_upsert(state, req)),
        "marks.list" => Some(handle_marks_list(state, req)),
        "marks.delete" => Some(handle_marks_delete(state, req)),
        _ => None,
    }
}
