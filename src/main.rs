mod accounts;
mod audit;
mod backup;
mod commit;
mod config;
mod confirm;
mod credentials;
mod db;
mod exchange;
mod grading;
mod ipc;
mod nav;
mod records;
mod telemetry;
mod tickets;
mod visibility;

use std::io::{self, BufRead, Write};

fn main() {
    telemetry::init();
    let config = config::DaemonConfig::from_env();
    let startup_workspace = config.workspace.clone();
    let mut state = ipc::AppState::new(config);

    if let Some(path) = startup_workspace {
        if let Err(e) = ipc::select_workspace(&mut state, &path) {
            tracing::error!(error = ?e, workspace = %path.to_string_lossy(), "startup workspace not opened");
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "riskbookd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id; report it without one.
                tracing::warn!(error = %e, "unparsable request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() },
                });
                let _ = writeln!(stdout, "{resp}");
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::info!("stdin closed, exiting");
}
