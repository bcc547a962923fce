use crate::calc::{self, CalcContext, CalcError, SingleRecalc};
use crate::classroom;
use crate::period::{format_timestamp, Period};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredGrade {
    pub id: String,
    pub classroom_id: String,
    pub student_id: String,
    pub student_name: Option<String>,
    pub competency_id: String,
    pub competency_name: Option<String>,
    pub period: String,
    pub score: f64,
    pub grade_label: String,
    pub breakdown: serde_json::Value,
    pub activities_count: i64,
    pub is_manual_override: bool,
    pub manual_score: Option<f64>,
    pub manual_note: Option<String>,
    pub calculated_at: String,
    pub updated_at: Option<String>,
}

pub struct GradeWrite<'a> {
    pub classroom_id: &'a str,
    pub student_id: &'a str,
    pub competency_id: &'a str,
    pub period: Period,
    pub score: f64,
    pub grade_label: &'a str,
    pub breakdown: &'a str,
    pub activities_count: i64,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Written,
    SkippedOverride,
}

const GRADE_SELECT: &str = "SELECT g.id, g.classroom_id, g.student_id, cs.display_name,
        g.competency_id, c.name, g.period, g.score, g.grade_label, g.breakdown,
        g.activities_count, g.is_manual_override, g.manual_score, g.manual_note,
        g.calculated_at, g.updated_at
     FROM competency_grades g
     LEFT JOIN competencies c ON c.id = g.competency_id
     LEFT JOIN classroom_students cs
       ON cs.classroom_id = g.classroom_id AND cs.student_id = g.student_id
     LEFT JOIN classroom_competencies cc
       ON cc.classroom_id = g.classroom_id AND cc.competency_id = g.competency_id";

fn grade_from_row(r: &Row<'_>) -> rusqlite::Result<StoredGrade> {
    let breakdown_raw: String = r.get(9)?;
    // Breakdown is written by this engine; anything unreadable is shown as empty.
    let breakdown = classroom::decode_json_field(Some(&breakdown_raw))
        .filter(|v| v.is_array())
        .unwrap_or_else(|| json!([]));
    Ok(StoredGrade {
        id: r.get(0)?,
        classroom_id: r.get(1)?,
        student_id: r.get(2)?,
        student_name: r.get(3)?,
        competency_id: r.get(4)?,
        competency_name: r.get(5)?,
        period: r.get(6)?,
        score: r.get(7)?,
        grade_label: r.get(8)?,
        breakdown,
        activities_count: r.get(10)?,
        is_manual_override: r.get::<_, i64>(11)? != 0,
        manual_score: r.get(12)?,
        manual_note: r.get(13)?,
        calculated_at: r.get(14)?,
        updated_at: r.get(15)?,
    })
}

/// Inserts or refreshes a computed grade unless a manual override is in force.
///
/// The override check lives in the statement itself so concurrent writers cannot
/// slip past it.
pub fn upsert_grade(conn: &Connection, w: &GradeWrite<'_>) -> Result<UpsertOutcome, CalcError> {
    let now = format_timestamp(w.now);
    let changed = conn
        .execute(
            "INSERT INTO competency_grades(
                id, classroom_id, student_id, competency_id, period, score, grade_label,
                breakdown, activities_count, is_manual_override, calculated_at, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
             ON CONFLICT(classroom_id, student_id, competency_id, period) DO UPDATE SET
                score = excluded.score,
                grade_label = excluded.grade_label,
                breakdown = excluded.breakdown,
                activities_count = excluded.activities_count,
                calculated_at = excluded.calculated_at,
                updated_at = excluded.updated_at
             WHERE competency_grades.is_manual_override = 0",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                w.classroom_id,
                w.student_id,
                w.competency_id,
                w.period.to_string(),
                w.score,
                w.grade_label,
                w.breakdown,
                w.activities_count,
                now,
                now,
            ],
        )
        .map_err(|e| {
            CalcError::new("db_update_failed", e.to_string())
                .with_details(json!({ "table": "competency_grades" }))
        })?;
    if changed == 0 {
        Ok(UpsertOutcome::SkippedOverride)
    } else {
        Ok(UpsertOutcome::Written)
    }
}

pub fn load_grade(conn: &Connection, grade_id: &str) -> Result<StoredGrade, CalcError> {
    let sql = format!("{} WHERE g.id = ?", GRADE_SELECT);
    let grade = conn
        .query_row(&sql, [grade_id], grade_from_row)
        .optional()?;
    grade.ok_or_else(|| {
        CalcError::new("not_found", "grade not found").with_details(json!({ "gradeId": grade_id }))
    })
}

pub fn load_grade_by_key(
    conn: &Connection,
    classroom_id: &str,
    student_id: &str,
    competency_id: &str,
    period: Period,
) -> Result<Option<StoredGrade>, CalcError> {
    let sql = format!(
        "{} WHERE g.classroom_id = ? AND g.student_id = ? AND g.competency_id = ? AND g.period = ?",
        GRADE_SELECT
    );
    let grade = conn
        .query_row(
            &sql,
            (classroom_id, student_id, competency_id, period.to_string()),
            grade_from_row,
        )
        .optional()?;
    Ok(grade)
}

#[derive(Debug, Clone, Default)]
pub struct GradeFilter {
    pub classroom_id: Option<String>,
    pub student_id: Option<String>,
    pub period: Option<Period>,
}

/// Stored grades for a student and/or a classroom, in roster then competency order.
pub fn list_grades(conn: &Connection, filter: &GradeFilter) -> Result<Vec<StoredGrade>, CalcError> {
    if filter.classroom_id.is_none() && filter.student_id.is_none() {
        return Err(CalcError::new(
            "bad_params",
            "either classroomId or studentId is required",
        ));
    }
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();
    if let Some(cid) = &filter.classroom_id {
        clauses.push("g.classroom_id = ?");
        binds.push(cid.clone());
    }
    if let Some(sid) = &filter.student_id {
        clauses.push("g.student_id = ?");
        binds.push(sid.clone());
    }
    if let Some(p) = filter.period {
        clauses.push("g.period = ?");
        binds.push(p.to_string());
    }
    let sql = format!(
        "{} WHERE {}
         ORDER BY g.classroom_id, COALESCE(cs.sort_order, 0), g.student_id, g.period,
                  COALESCE(cc.sort_order, 0), c.name, g.competency_id",
        GRADE_SELECT,
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), grade_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn parse_stored_period(grade: &StoredGrade) -> Result<Period, CalcError> {
    Period::parse(&grade.period).map_err(|_| {
        CalcError::new("db_query_failed", "stored grade has an invalid period")
            .with_details(json!({ "gradeId": grade.id, "period": grade.period }))
    })
}

/// Pins a teacher-entered score; the label follows the classroom's scale.
pub fn set_manual_grade(
    conn: &Connection,
    grade_id: &str,
    manual_score: f64,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<StoredGrade, CalcError> {
    if !manual_score.is_finite() || !(0.0..=100.0).contains(&manual_score) {
        return Err(CalcError::new("bad_params", "score must be between 0 and 100")
            .with_details(json!({ "score": manual_score })));
    }
    let grade = load_grade(conn, grade_id)?;
    let room = classroom::load_classroom(conn, &grade.classroom_id, now)?;
    let label = room.convert(manual_score);
    let note = note.map(str::trim).filter(|s| !s.is_empty());

    conn.execute(
        "UPDATE competency_grades
         SET is_manual_override = 1, manual_score = ?, manual_note = ?,
             score = ?, grade_label = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            manual_score,
            note,
            manual_score,
            label,
            format_timestamp(now),
            grade_id
        ],
    )
    .map_err(|e| {
        CalcError::new("db_update_failed", e.to_string())
            .with_details(json!({ "table": "competency_grades" }))
    })?;
    tracing::info!(grade_id, manual_score, label = %label, "manual grade set");
    load_grade(conn, grade_id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearOutcome {
    pub grade: StoredGrade,
    pub recalculated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
}

/// Drops the override and recalculates the same student/competency/period at once.
///
/// If no fresh calculation is possible the flag is still cleared and the last
/// override values remain as the stored grade until the next successful calculation.
pub fn clear_manual_grade(
    conn: &Connection,
    grade_id: &str,
    now: DateTime<Utc>,
) -> Result<ClearOutcome, CalcError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))?;

    let grade = load_grade(&tx, grade_id)?;
    let period = parse_stored_period(&grade)?;
    tx.execute(
        "UPDATE competency_grades
         SET is_manual_override = 0, manual_score = NULL, manual_note = NULL, updated_at = ?
         WHERE id = ?",
        (format_timestamp(now), grade_id),
    )
    .map_err(|e| {
        CalcError::new("db_update_failed", e.to_string())
            .with_details(json!({ "table": "competency_grades" }))
    })?;

    let ctx = CalcContext { conn: &tx, now };
    let outcome = calc::recalculate_single(
        &ctx,
        &grade.classroom_id,
        &grade.student_id,
        &grade.competency_id,
        period,
    )?;
    let skipped_reason = match outcome {
        SingleRecalc::Recalculated(result) => {
            tracing::debug!(grade_id, score = result.score, "override cleared; grade recalculated");
            None
        }
        SingleRecalc::Skipped { reason } => {
            tracing::warn!(grade_id, reason, "override cleared without recalculation");
            Some(reason.to_string())
        }
    };

    let refreshed = load_grade(&tx, grade_id)?;
    tx.commit()
        .map_err(|e| CalcError::new("db_commit_failed", e.to_string()))?;
    tracing::info!(grade_id, recalculated = skipped_reason.is_none(), "manual grade cleared");
    Ok(ClearOutcome {
        grade: refreshed,
        recalculated: skipped_reason.is_none(),
        skipped_reason,
    })
}
