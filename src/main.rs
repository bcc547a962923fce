mod calc;
mod classroom;
mod collectors;
mod config;
mod db;
mod grades;
mod ipc;
mod logging;
mod period;
mod scale;

use std::io::{self, BufRead, Write};

fn main() {
    let config = config::DaemonConfig::from_env();
    if let Err(e) = logging::init_tracing(&config) {
        eprintln!("competencyd: logging disabled: {e}");
    }

    let mut state = ipc::AppState::default();
    if let Some(path) = config.workspace.as_deref() {
        // A bad start-up workspace must not keep the sidecar from serving requests.
        if let Err(e) = ipc::select_workspace(&mut state, path) {
            tracing::warn!(workspace = %path.display(), "start-up workspace not opened: {e:?}");
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "competencyd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("stdin closed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                let body = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", body);
                let _ = stdout.flush();
                continue;
            }
        };

        let span = tracing::debug_span!("request", id = %req.id, method = %req.method);
        let _guard = span.enter();
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
