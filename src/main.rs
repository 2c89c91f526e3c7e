mod cache;
mod crypto;
mod db;
mod grades;
mod ipc;
mod logging;
mod normalize;
mod prepare;
mod resolve;
mod roster;
mod session;

use std::io::{self, BufRead, Write};
use tracing::{debug, warn};

fn main() {
    if let Err(e) = logging::init_tracing() {
        eprintln!("gradeflowd: logging disabled: {e}");
    }

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        session: session::Session::new(),
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "stdin closed with error");
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
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        debug!(id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
