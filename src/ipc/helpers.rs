use crate::calc::CalcError;
use crate::ipc::error::respond;
use crate::ipc::types::{AppState, Request};
use crate::period::Period;
use rusqlite::Connection;

pub fn db_conn(state: &AppState) -> Result<&Connection, CalcError> {
    state
        .db
        .as_ref()
        .ok_or_else(|| CalcError::new("no_workspace", "select a workspace first"))
}

/// Runs `f` against the open workspace and wraps the outcome in the response envelope.
pub fn with_conn<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, CalcError>,
{
    let result = db_conn(state).and_then(|conn| f(conn, &req.params));
    respond(&req.id, result)
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, CalcError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CalcError::new("bad_params", format!("missing {}", key)))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, CalcError> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.trim().to_string()).filter(|s| !s.is_empty()))
            .ok_or_else(|| CalcError::new("bad_params", format!("{} must be string", key))),
    }
}

pub fn required_period(params: &serde_json::Value) -> Result<Period, CalcError> {
    let raw = required_str(params, "period")?;
    Period::parse(&raw)
}

pub fn required_score(params: &serde_json::Value, key: &str) -> Result<f64, CalcError> {
    let n = params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| CalcError::new("bad_params", format!("{} must be a number", key)))?;
    if !(0.0..=100.0).contains(&n) {
        return Err(CalcError::new(
            "bad_params",
            format!("{} must be between 0 and 100", key),
        ));
    }
    Ok(n)
}

pub fn to_value<T: serde::Serialize>(v: &T) -> Result<serde_json::Value, CalcError> {
    serde_json::to_value(v)
        .map_err(|e| CalcError::new("db_query_failed", format!("failed to encode result: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_params_are_trimmed_and_required() {
        let params = json!({ "a": "  x ", "b": "", "c": 3, "d": null });
        assert_eq!(required_str(&params, "a").unwrap(), "x");
        assert_eq!(required_str(&params, "b").unwrap_err().code, "bad_params");
        assert_eq!(required_str(&params, "zz").unwrap_err().code, "bad_params");
        assert_eq!(optional_str(&params, "d").unwrap(), None);
        assert_eq!(optional_str(&params, "b").unwrap(), None);
        assert_eq!(optional_str(&params, "c").unwrap_err().code, "bad_params");
    }

    #[test]
    fn scores_must_be_percentages() {
        assert_eq!(required_score(&json!({ "score": 73 }), "score").unwrap(), 73.0);
        assert!(required_score(&json!({ "score": 101 }), "score").is_err());
        assert!(required_score(&json!({ "score": "73" }), "score").is_err());
    }

    #[test]
    fn unencodable_results_use_a_known_code() {
        let mut bad = std::collections::HashMap::new();
        bad.insert((1, 2), "pair keys are not JSON object keys");
        assert_eq!(to_value(&bad).unwrap_err().code, "db_query_failed");
        assert_eq!(to_value(&vec![1, 2]).unwrap(), json!([1, 2]));
    }
}
