use crate::calc::CalcError;
use crate::classroom::{self, Classroom};
use crate::ipc::helpers::{optional_str, required_period, required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::period::{format_timestamp, Period};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::json;

fn status_value(room: &Classroom, year: i32, now: DateTime<Utc>) -> serde_json::Value {
    let periods: Vec<serde_json::Value> = Period::all_of(year)
        .map(|p| {
            let closed = room.periods.closed_entry(p);
            let window = room.periods.window(p, room.created_at, now);
            json!({
                "period": p,
                "ordinal": p.ordinal(),
                "status": room.periods.status(p),
                "isCurrent": p == room.periods.current,
                "closedAt": closed.map(|c| format_timestamp(c.closed_at)),
                "closedBy": closed.and_then(|c| c.closed_by.clone()),
                "window": window,
            })
        })
        .collect();
    json!({
        "classroomId": room.id,
        "year": year,
        "currentPeriod": room.periods.current,
        "periods": periods,
    })
}

fn periods_status(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let classroom_id = required_str(params, "classroomId")?;
    let now = Utc::now();
    let room = classroom::load_classroom(conn, &classroom_id, now)?;
    let year = match params.get("year") {
        None => room.periods.current.year(),
        Some(v) if v.is_null() => room.periods.current.year(),
        Some(v) => v
            .as_i64()
            .and_then(|y| i32::try_from(y).ok())
            .filter(|y| (1..=9999).contains(y))
            .ok_or_else(|| CalcError::new("bad_params", "year must be an integer"))?,
    };
    Ok(status_value(&room, year, now))
}

/// Loads the classroom, applies one lifecycle transition and persists the new state.
fn transition<F>(
    conn: &Connection,
    params: &serde_json::Value,
    action: &'static str,
    apply: F,
) -> Result<serde_json::Value, CalcError>
where
    F: FnOnce(&mut Classroom, Period, DateTime<Utc>) -> Result<(), CalcError>,
{
    let classroom_id = required_str(params, "classroomId")?;
    let period = required_period(params)?;
    let now = Utc::now();
    let mut room = classroom::load_classroom(conn, &classroom_id, now)?;
    apply(&mut room, period, now)?;
    classroom::save_period_state(conn, &classroom_id, &room.periods)?;
    tracing::info!(
        classroom_id = %classroom_id,
        %period,
        action,
        current = %room.periods.current,
        "period lifecycle updated"
    );
    Ok(status_value(&room, period.year(), now))
}

fn periods_set_current(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    transition(conn, params, "setCurrent", |room, period, _| {
        room.periods.set_current(period)
    })
}

fn periods_close(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let closed_by = optional_str(params, "closedBy")?;
    transition(conn, params, "close", move |room, period, now| {
        room.periods.close(period, now, closed_by)
    })
}

fn periods_reopen(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    transition(conn, params, "reopen", |room, period, _| {
        room.periods.reopen(period)
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "periods.status" => Some(with_conn(state, req, periods_status)),
        "periods.setCurrent" => Some(with_conn(state, req, periods_set_current)),
        "periods.close" => Some(with_conn(state, req, periods_close)),
        "periods.reopen" => Some(with_conn(state, req, periods_reopen)),
        _ => None,
    }
}
