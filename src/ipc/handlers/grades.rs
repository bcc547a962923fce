use crate::calc::{self, CalcContext, CalcError};
use crate::grades::{self, GradeFilter};
use crate::ipc::helpers::{
    optional_str, required_period, required_score, required_str, to_value, with_conn,
};
use crate::ipc::types::{AppState, Request};
use crate::period::Period;
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

fn calculate_student(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let classroom_id = required_str(params, "classroomId")?;
    let student_id = required_str(params, "studentId")?;
    let period = required_period(params)?;
    let ctx = CalcContext {
        conn,
        now: Utc::now(),
    };
    let competencies = calc::calculate_for_student(&ctx, &classroom_id, &student_id, period)?;
    Ok(json!({
        "classroomId": classroom_id,
        "studentId": student_id,
        "period": period,
        "competencies": to_value(&competencies)?,
    }))
}

fn recalculate_classroom(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let classroom_id = required_str(params, "classroomId")?;
    let period = required_period(params)?;
    let ctx = CalcContext {
        conn,
        now: Utc::now(),
    };
    to_value(&calc::recalculate_for_classroom(&ctx, &classroom_id, period)?)
}

fn list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let period = match optional_str(params, "period")? {
        Some(raw) => Some(Period::parse(&raw)?),
        None => None,
    };
    let filter = GradeFilter {
        classroom_id: optional_str(params, "classroomId")?,
        student_id: optional_str(params, "studentId")?,
        period,
    };
    let rows = grades::list_grades(conn, &filter)?;
    Ok(json!({ "grades": to_value(&rows)? }))
}

fn get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let grade_id = required_str(params, "gradeId")?;
    to_value(&grades::load_grade(conn, &grade_id)?)
}

fn set_manual(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let grade_id = required_str(params, "gradeId")?;
    let score = required_score(params, "score")?;
    let note = optional_str(params, "note")?;
    let grade = grades::set_manual_grade(conn, &grade_id, score, note.as_deref(), Utc::now())?;
    to_value(&grade)
}

fn clear_manual(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let grade_id = required_str(params, "gradeId")?;
    to_value(&grades::clear_manual_grade(conn, &grade_id, Utc::now())?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.calculateStudent" => Some(with_conn(state, req, calculate_student)),
        "grades.recalculateClassroom" => Some(with_conn(state, req, recalculate_classroom)),
        "grades.list" => Some(with_conn(state, req, list)),
        "grades.get" => Some(with_conn(state, req, get)),
        "grades.setManual" => Some(with_conn(state, req, set_manual)),
        "grades.clearManual" => Some(with_conn(state, req, clear_manual)),
        _ => None,
    }
}
