use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One line of stdin: `{"id": "...", "method": "grades.calculateStudent", "params": {...}}`.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Sidecar state shared by every request; no database until a workspace is selected.
#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
