use crate::classroom::{self, Classroom};
use crate::collectors::{self, ActivityScore, CollectQuery, Collector};
use crate::grades::{self, GradeWrite, StoredGrade, UpsertOutcome};
use crate::period::{Period, PeriodWindow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::fmt;

/// 1-decimal rounding used for every persisted score:
/// `Int(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for CalcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CalcError {}

impl From<rusqlite::Error> for CalcError {
    fn from(e: rusqlite::Error) -> Self {
        CalcError::new("db_query_failed", e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
    pub now: DateTime<Utc>,
}

/// Weighted mean of all entries; 0 when nothing carries weight.
pub fn weighted_score(entries: &[ActivityScore]) -> f64 {
    let mut sum = 0.0_f64;
    let mut denom = 0.0_f64;
    for e in entries {
        if !e.score.is_finite() || !e.weight.is_finite() || e.weight <= 0.0 {
            continue;
        }
        sum += e.score.clamp(0.0, 100.0) * e.weight;
        denom += e.weight;
    }
    if denom > 0.0 {
        (sum / denom).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetencyLink {
    pub competency_id: String,
    pub name: String,
    pub weight: f64,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetencyResult {
    pub grade_id: String,
    pub competency_id: String,
    pub competency_name: String,
    pub competency_weight: f64,
    pub score: f64,
    pub grade_label: String,
    pub activities_count: i64,
    pub breakdown: serde_json::Value,
    pub is_manual_override: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_note: Option<String>,
}

impl CompetencyResult {
    fn from_stored(link: &CompetencyLink, g: StoredGrade) -> Self {
        Self {
            grade_id: g.id,
            competency_id: link.competency_id.clone(),
            competency_name: link.name.clone(),
            competency_weight: link.weight,
            score: g.score,
            grade_label: g.grade_label,
            activities_count: g.activities_count,
            breakdown: g.breakdown,
            is_manual_override: g.is_manual_override,
            manual_note: g.manual_note,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResult {
    pub student_id: String,
    pub display_name: String,
    pub competencies: Vec<CompetencyResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomRecalc {
    pub classroom_id: String,
    pub period: Period,
    pub window: Option<PeriodWindow>,
    pub students_count: usize,
    pub grades_count: usize,
    pub students: Vec<StudentResult>,
}

#[derive(Debug, Clone)]
struct ClassStudent {
    id: String,
    display_name: String,
}

fn load_active_competencies(
    conn: &Connection,
    classroom_id: &str,
) -> Result<Vec<CompetencyLink>, CalcError> {
    let mut stmt = conn.prepare(
        "SELECT cc.competency_id, c.name, cc.weight, cc.sort_order
         FROM classroom_competencies cc
         JOIN competencies c ON c.id = cc.competency_id
         WHERE cc.classroom_id = ? AND cc.is_active = 1
         ORDER BY cc.sort_order, c.name, cc.competency_id",
    )?;
    let links = stmt
        .query_map([classroom_id], |r| {
            Ok(CompetencyLink {
                competency_id: r.get(0)?,
                name: r.get(1)?,
                weight: r.get(2)?,
                sort_order: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(links)
}

fn load_student(
    conn: &Connection,
    classroom_id: &str,
    student_id: &str,
) -> Result<ClassStudent, CalcError> {
    let display_name: Option<String> = conn
        .query_row(
            "SELECT display_name FROM classroom_students WHERE classroom_id = ? AND student_id = ?",
            (classroom_id, student_id),
            |r| r.get(0),
        )
        .optional()?;
    let Some(display_name) = display_name else {
        return Err(CalcError::new("not_found", "student not found in classroom")
            .with_details(json!({ "classroomId": classroom_id, "studentId": student_id })));
    };
    Ok(ClassStudent {
        id: student_id.to_string(),
        display_name,
    })
}

fn load_active_students(
    conn: &Connection,
    classroom_id: &str,
) -> Result<Vec<ClassStudent>, CalcError> {
    let mut stmt = conn.prepare(
        "SELECT student_id, display_name
         FROM classroom_students
         WHERE classroom_id = ? AND active = 1
         ORDER BY sort_order, display_name, student_id",
    )?;
    let students = stmt
        .query_map([classroom_id], |r| {
            Ok(ClassStudent {
                id: r.get(0)?,
                display_name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}

/// Collects, aggregates, converts and persists one competency of one student.
///
/// When the stored row carries a manual override the write is skipped and the
/// override values are returned.
fn calculate_competency(
    ctx: &CalcContext<'_>,
    classroom: &Classroom,
    collectors: &[Box<dyn Collector>],
    student_id: &str,
    link: &CompetencyLink,
    period: Period,
    window: PeriodWindow,
) -> Result<CompetencyResult, CalcError> {
    let query = CollectQuery {
        student_id,
        competency_id: &link.competency_id,
        classroom_id: &classroom.id,
        window,
    };
    let entries = collectors::collect_all(collectors, ctx.conn, &query)?;
    let score = round_off_1_decimal(weighted_score(&entries));
    let label = classroom.convert(score);
    let breakdown = serde_json::to_string(&entries)
        .map_err(|e| CalcError::new("db_update_failed", e.to_string()))?;

    tracing::debug!(
        student_id,
        competency_id = %link.competency_id,
        %period,
        score,
        label = %label,
        entries = entries.len(),
        "competency calculated"
    );

    let outcome = grades::upsert_grade(
        ctx.conn,
        &GradeWrite {
            classroom_id: &classroom.id,
            student_id,
            competency_id: &link.competency_id,
            period,
            score,
            grade_label: &label,
            breakdown: &breakdown,
            activities_count: entries.len() as i64,
            now: ctx.now,
        },
    )?;
    if outcome == UpsertOutcome::SkippedOverride {
        tracing::info!(
            student_id,
            competency_id = %link.competency_id,
            %period,
            "manual override in force; stored grade left untouched"
        );
    }

    let stored =
        grades::load_grade_by_key(ctx.conn, &classroom.id, student_id, &link.competency_id, period)?
            .ok_or_else(|| CalcError::new("db_query_failed", "grade row missing after upsert"))?;
    Ok(CompetencyResult::from_stored(link, stored))
}

fn calculate_loaded(
    ctx: &CalcContext<'_>,
    classroom: &Classroom,
    links: &[CompetencyLink],
    student_id: &str,
    period: Period,
    window: PeriodWindow,
) -> Result<Vec<CompetencyResult>, CalcError> {
    let collectors = collectors::default_collectors();
    links
        .iter()
        .map(|link| {
            calculate_competency(ctx, classroom, &collectors, student_id, link, period, window)
        })
        .collect()
}

/// Calculates and stores every active competency of one student for `period`.
///
/// Future periods are rejected. A classroom without competency grading yields no rows.
pub fn calculate_for_student(
    ctx: &CalcContext<'_>,
    classroom_id: &str,
    student_id: &str,
    period: Period,
) -> Result<Vec<CompetencyResult>, CalcError> {
    let classroom = classroom::load_classroom(ctx.conn, classroom_id, ctx.now)?;
    classroom.periods.ensure_not_future(period)?;
    if !classroom.use_competencies {
        return Ok(Vec::new());
    }
    let student = load_student(ctx.conn, classroom_id, student_id)?;
    let window = classroom
        .periods
        .window(period, classroom.created_at, ctx.now);
    let links = load_active_competencies(ctx.conn, classroom_id)?;
    let results = calculate_loaded(ctx, &classroom, &links, &student.id, period, window)?;
    tracing::info!(
        classroom_id,
        student_id,
        %period,
        competencies = results.len(),
        "student grades calculated"
    );
    Ok(results)
}

/// Sequential [`calculate_for_student`] over the active students of a classroom.
///
/// Every competency row is written by its own statement, so an interrupted run leaves
/// the rows written so far valid.
pub fn recalculate_for_classroom(
    ctx: &CalcContext<'_>,
    classroom_id: &str,
    period: Period,
) -> Result<ClassroomRecalc, CalcError> {
    let classroom = classroom::load_classroom(ctx.conn, classroom_id, ctx.now)?;
    classroom.periods.ensure_not_future(period)?;
    if !classroom.use_competencies {
        return Ok(ClassroomRecalc {
            classroom_id: classroom_id.to_string(),
            period,
            window: None,
            students_count: 0,
            grades_count: 0,
            students: Vec::new(),
        });
    }
    let window = classroom
        .periods
        .window(period, classroom.created_at, ctx.now);
    let links = load_active_competencies(ctx.conn, classroom_id)?;
    let students = load_active_students(ctx.conn, classroom_id)?;

    let mut out = Vec::with_capacity(students.len());
    let mut grades_count = 0;
    for s in students {
        let competencies = calculate_loaded(ctx, &classroom, &links, &s.id, period, window)?;
        grades_count += competencies.len();
        out.push(StudentResult {
            student_id: s.id,
            display_name: s.display_name,
            competencies,
        });
    }
    tracing::info!(
        classroom_id,
        %period,
        students = out.len(),
        grades = grades_count,
        "classroom grades recalculated"
    );
    Ok(ClassroomRecalc {
        classroom_id: classroom_id.to_string(),
        period,
        window: Some(window),
        students_count: out.len(),
        grades_count,
        students: out,
    })
}

#[derive(Debug, Clone)]
pub enum SingleRecalc {
    Recalculated(CompetencyResult),
    Skipped { reason: &'static str },
}

/// Recomputes one stored (student, competency, period) grade in place.
///
/// Conditions that make a fresh calculation impossible (the period is now in the future,
/// grading was disabled, the competency was deactivated) are reported as `Skipped`
/// instead of failing.
pub fn recalculate_single(
    ctx: &CalcContext<'_>,
    classroom_id: &str,
    student_id: &str,
    competency_id: &str,
    period: Period,
) -> Result<SingleRecalc, CalcError> {
    let classroom = classroom::load_classroom(ctx.conn, classroom_id, ctx.now)?;
    if let Err(e) = classroom.periods.ensure_not_future(period) {
        tracing::info!(classroom_id, %period, "single recalculation skipped: {}", e);
        return Ok(SingleRecalc::Skipped {
            reason: "future_period",
        });
    }
    if !classroom.use_competencies {
        return Ok(SingleRecalc::Skipped {
            reason: "competency_grading_disabled",
        });
    }
    let links = load_active_competencies(ctx.conn, classroom_id)?;
    let Some(link) = links.iter().find(|l| l.competency_id == competency_id) else {
        return Ok(SingleRecalc::Skipped {
            reason: "competency_inactive",
        });
    };
    let window = classroom
        .periods
        .window(period, classroom.created_at, ctx.now);
    let collectors = collectors::default_collectors();
    let result =
        calculate_competency(ctx, &classroom, &collectors, student_id, link, period, window)?;
    Ok(SingleRecalc::Recalculated(result))
}
