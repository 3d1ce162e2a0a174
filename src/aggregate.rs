use log::{debug, info, warn};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::grading::{self, CalcError};

pub const CORE_SUBJECTS_REQUIRED: usize = 4;
pub const ELECTIVE_SUBJECTS_REQUIRED: usize = 2;
pub const SELECTION_METHOD: &str = "Highest scoring elective subjects selected";

/// Explicit handle the engine works through. Callers open the connection and
/// pick the (term, exam type) selector; nothing here reaches ambient state.
#[derive(Debug, Clone)]
pub struct AggregateContext<'a> {
    pub conn: &'a Connection,
    pub term: &'a str,
    pub exam_type: &'a str,
}

/// How the subject list for a student was resolved. Class categories and
/// subject categories are entered separately and can drift; when nothing
/// matches the class category, every subject in the workspace is considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SubjectScope {
    CategoryScoped,
    AllSubjects,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDetail {
    pub subject_name: String,
    pub subject_code: String,
    pub score: f64,
    pub grade: u8,
    pub selected: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationDetails {
    pub core_total: u32,
    pub elective_total: u32,
    pub aggregate: u32,
    pub core_count: usize,
    pub elective_count: usize,
    pub selection_method: &'static str,
}

/// Full transparency payload for one student: every counted subject with its
/// score and grade, which electives were picked, and the arithmetic.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateBreakdown {
    pub aggregate: Option<f64>,
    pub error: Option<String>,
    pub subject_scope: SubjectScope,
    pub core_subjects: Vec<SubjectDetail>,
    pub selected_electives: Vec<SubjectDetail>,
    pub all_electives: Vec<SubjectDetail>,
    pub calculation_details: Option<CalculationDetails>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateSummary {
    pub updated_count: usize,
    pub failed_count: usize,
    pub total_students: usize,
}

#[derive(Debug, Clone)]
struct ScoredSubject {
    subject_id: String,
    name: String,
    code: String,
    score: f64,
    grade: u8,
}

struct MarkedSubjects {
    scope: SubjectScope,
    core: Vec<ScoredSubject>,
    electives: Vec<ScoredSubject>,
}

fn db_err(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_query_failed", e.to_string())
}

/// Elective selection order: highest score first, never best grade (several
/// scores can share one grade band). Equal scores fall back to ascending
/// subject id so repeated runs pick the same pair.
fn rank_electives(electives: &mut [ScoredSubject]) {
    electives.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.subject_id.cmp(&b.subject_id))
    });
}

fn query_subjects(
    conn: &Connection,
    category: Option<&str>,
) -> Result<Vec<(String, String, String, String)>, CalcError> {
    let (sql, params): (&str, Vec<&str>) = match category {
        Some(cat) => (
            "SELECT id, name, code, subject_type FROM subjects WHERE category = ? ORDER BY id",
            vec![cat],
        ),
        None => (
            "SELECT id, name, code, subject_type FROM subjects ORDER BY id",
            Vec::new(),
        ),
    };
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    stmt.query_map(rusqlite::params_from_iter(params), |r| {
        Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

/// Shared resolution path for both calculators: student -> class category ->
/// eligible subjects -> this term's marks, partitioned into core subjects and
/// ranked elective candidates. `None` when the student or class is missing.
fn gather_marked_subjects(
    ctx: &AggregateContext<'_>,
    student_id: &str,
) -> Result<Option<MarkedSubjects>, CalcError> {
    let class_id: Option<String> = ctx
        .conn
        .query_row(
            "SELECT class_id FROM students WHERE id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(class_id) = class_id else {
        return Ok(None);
    };

    let category: Option<String> = ctx
        .conn
        .query_row(
            "SELECT category FROM classes WHERE id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(category) = category else {
        return Ok(None);
    };

    let scoped = query_subjects(ctx.conn, Some(&category))?;
    let (subjects, scope) = if scoped.is_empty() {
        debug!(
            "no subjects carry category {:?}; falling back to all subjects for student {}",
            category, student_id
        );
        (query_subjects(ctx.conn, None)?, SubjectScope::AllSubjects)
    } else {
        (scoped, SubjectScope::CategoryScoped)
    };

    let mut stmt = ctx
        .conn
        .prepare(
            "SELECT subject_id, score FROM marks
             WHERE student_id = ? AND term = ? AND exam_type = ?",
        )
        .map_err(db_err)?;
    let mark_scores: HashMap<String, f64> = stmt
        .query_map((student_id, ctx.term, ctx.exam_type), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(db_err)?;

    let mut core = Vec::new();
    let mut electives = Vec::new();
    for (subject_id, name, code, subject_type) in subjects {
        let Some(&score) = mark_scores.get(&subject_id) else {
            continue;
        };
        // A stored mark outside 0-100 is structurally invalid, not an
        // insufficient-data outcome.
        let grade = grading::calculate_grade(score)?;
        let scored = ScoredSubject {
            subject_id,
            name,
            code,
            score,
            grade,
        };
        if subject_type == "core" {
            core.push(scored);
        } else {
            electives.push(scored);
        }
    }
    rank_electives(&mut electives);

    Ok(Some(MarkedSubjects {
        scope,
        core,
        electives,
    }))
}

/// Sum of grades over four core subjects plus the two best-scoring electives.
/// Range 6 (all grade 1) to 54 (all grade 9); lower is better. `None` when
/// the student or class is missing, or the term's marks cover fewer than four
/// core or two elective subjects.
pub fn calculate_student_aggregate(
    ctx: &AggregateContext<'_>,
    student_id: &str,
) -> Result<Option<f64>, CalcError> {
    let Some(gathered) = gather_marked_subjects(ctx, student_id)? else {
        return Ok(None);
    };

    if gathered.core.len() < CORE_SUBJECTS_REQUIRED {
        return Ok(None);
    }
    if gathered.electives.len() < ELECTIVE_SUBJECTS_REQUIRED {
        return Ok(None);
    }

    let core_total: u32 = gathered.core[..CORE_SUBJECTS_REQUIRED]
        .iter()
        .map(|s| u32::from(s.grade))
        .sum();
    let elective_total: u32 = gathered.electives[..ELECTIVE_SUBJECTS_REQUIRED]
        .iter()
        .map(|s| u32::from(s.grade))
        .sum();

    Ok(Some(f64::from(core_total + elective_total)))
}

fn subject_detail(s: &ScoredSubject, selected: bool) -> SubjectDetail {
    SubjectDetail {
        subject_name: s.name.clone(),
        subject_code: s.code.clone(),
        score: s.score,
        grade: s.grade,
        selected,
    }
}

/// Same selection algorithm as [`calculate_student_aggregate`], but returns
/// the full per-subject breakdown for transparency panels and reports.
/// Shortfalls come back as a breakdown with `aggregate: None` and an error
/// message naming the gap; a missing student/class is `None`, as there is
/// nothing to detail.
pub fn calculate_student_aggregate_detailed(
    ctx: &AggregateContext<'_>,
    student_id: &str,
) -> Result<Option<AggregateBreakdown>, CalcError> {
    let Some(gathered) = gather_marked_subjects(ctx, student_id)? else {
        return Ok(None);
    };

    let core_subjects: Vec<SubjectDetail> = gathered
        .core
        .iter()
        .map(|s| subject_detail(s, true))
        .collect();
    let mut all_electives: Vec<SubjectDetail> = gathered
        .electives
        .iter()
        .map(|s| subject_detail(s, false))
        .collect();
    for detail in all_electives.iter_mut().take(ELECTIVE_SUBJECTS_REQUIRED) {
        detail.selected = true;
    }
    let selected_electives: Vec<SubjectDetail> = all_electives
        .iter()
        .take(ELECTIVE_SUBJECTS_REQUIRED)
        .cloned()
        .collect();

    if core_subjects.len() < CORE_SUBJECTS_REQUIRED {
        return Ok(Some(AggregateBreakdown {
            aggregate: None,
            error: Some(format!(
                "Insufficient core subjects: {}/{} required",
                core_subjects.len(),
                CORE_SUBJECTS_REQUIRED
            )),
            subject_scope: gathered.scope,
            core_subjects,
            selected_electives: Vec::new(),
            all_electives,
            calculation_details: None,
        }));
    }

    if selected_electives.len() < ELECTIVE_SUBJECTS_REQUIRED {
        return Ok(Some(AggregateBreakdown {
            aggregate: None,
            error: Some(format!(
                "Insufficient elective subjects: {}/{} required",
                selected_electives.len(),
                ELECTIVE_SUBJECTS_REQUIRED
            )),
            subject_scope: gathered.scope,
            core_subjects,
            selected_electives,
            all_electives,
            calculation_details: None,
        }));
    }

    let core_used: Vec<SubjectDetail> = core_subjects
        .iter()
        .take(CORE_SUBJECTS_REQUIRED)
        .cloned()
        .collect();
    let core_total: u32 = core_used.iter().map(|d| u32::from(d.grade)).sum();
    let elective_total: u32 = selected_electives.iter().map(|d| u32::from(d.grade)).sum();
    let aggregate = core_total + elective_total;

    Ok(Some(AggregateBreakdown {
        aggregate: Some(f64::from(aggregate)),
        error: None,
        subject_scope: gathered.scope,
        core_subjects: core_used,
        selected_electives,
        all_electives,
        calculation_details: Some(CalculationDetails {
            core_total,
            elective_total,
            aggregate,
            core_count: CORE_SUBJECTS_REQUIRED,
            elective_count: ELECTIVE_SUBJECTS_REQUIRED,
            selection_method: SELECTION_METHOD,
        }),
    }))
}

/// Recomputes and persists one student's aggregate. `false` when the
/// calculator has nothing to persist (missing student/class or not enough
/// marks); the stored value is left untouched in that case.
pub fn update_student_aggregate(
    ctx: &AggregateContext<'_>,
    student_id: &str,
) -> Result<bool, CalcError> {
    let Some(aggregate) = calculate_student_aggregate(ctx, student_id)? else {
        return Ok(false);
    };

    let changed = ctx
        .conn
        .execute(
            "UPDATE students
             SET aggregate = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE id = ?",
            (aggregate, student_id),
        )
        .map_err(|e| CalcError::new("db_update_failed", e.to_string()))?;
    Ok(changed > 0)
}

/// Recomputes every student's aggregate for the context's selector. One
/// student's shortfall (or store failure) is counted, never fatal to the
/// batch; only the initial student scan can fail the whole call.
pub fn update_all_student_aggregates(
    ctx: &AggregateContext<'_>,
) -> Result<BulkUpdateSummary, CalcError> {
    let mut stmt = ctx
        .conn
        .prepare("SELECT id FROM students ORDER BY class_id, sort_order")
        .map_err(db_err)?;
    let student_ids: Vec<String> = stmt
        .query_map([], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut updated_count = 0;
    let mut failed_count = 0;
    for student_id in &student_ids {
        match update_student_aggregate(ctx, student_id) {
            Ok(true) => updated_count += 1,
            Ok(false) => failed_count += 1,
            Err(e) => {
                warn!(
                    "aggregate update failed for student {}: {} ({})",
                    student_id, e.message, e.code
                );
                failed_count += 1;
            }
        }
    }

    info!(
        "bulk aggregate update term={:?} exam_type={:?}: {} updated, {} failed of {}",
        ctx.term,
        ctx.exam_type,
        updated_count,
        failed_count,
        student_ids.len()
    );
    Ok(BulkUpdateSummary {
        updated_count,
        failed_count,
        total_students: student_ids.len(),
    })
}
