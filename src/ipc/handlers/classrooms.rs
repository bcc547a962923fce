use crate::calc::CalcError;
use crate::classroom;
use crate::ipc::error::respond;
use crate::ipc::helpers::{db_conn, required_score, required_str, to_value};
use crate::ipc::types::{AppState, Request};
use crate::scale::{self, GradeScaleType};
use chrono::Utc;
use serde_json::json;

fn grading_settings(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let conn = db_conn(state)?;
    let classroom_id = required_str(params, "classroomId")?;
    let room = classroom::load_classroom(conn, &classroom_id, Utc::now())?;
    to_value(&room.settings())
}

fn scales_list() -> serde_json::Value {
    let scales: Vec<serde_json::Value> = GradeScaleType::predefined()
        .into_iter()
        .map(|s| {
            json!({
                "type": s.as_str(),
                "tiers": scale::predefined_tiers(s),
            })
        })
        .collect();
    json!({ "scales": scales })
}

fn scales_convert(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let conn = db_conn(state)?;
    let classroom_id = required_str(params, "classroomId")?;
    let score = required_score(params, "score")?;
    let room = classroom::load_classroom(conn, &classroom_id, Utc::now())?;
    Ok(json!({
        "score": score,
        "gradeLabel": room.convert(score),
        "gradeScaleType": room.scale_type,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classrooms.gradingSettings" => Some(respond(&req.id, grading_settings(state, &req.params))),
        "scales.list" => Some(respond(&req.id, Ok(scales_list()))),
        "scales.convert" => Some(respond(&req.id, scales_convert(state, &req.params))),
        _ => None,
    }
}
