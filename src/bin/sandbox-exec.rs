//! Privileged helper: confine to a root image, drop to an unprivileged uid,
//! then run the guest program and supervise it.
//!
//! Usage: `sandbox-exec [--timeout-ms N] [--watchdog-ms N] [--watch-pid PID]
//! <root> <uid> <workdir> <command> [args...]`
//!
//! Must run as root (via sudo or the setuid bit). Exits with the guest's
//! status, 128+signal if it was killed, 124 if it ran past the time limit,
//! and 126 without running anything if any step fails.

use sandbox_tunnel::sandbox::{IsolationRequest, HELPER_FAILURE_STATUS};

fn main() {
    let result = IsolationRequest::from_args(std::env::args_os().skip(1)).and_then(IsolationRequest::run);

    match result {
        Ok(status) => std::process::exit(status),
        Err(e) => {
            eprintln!("sandbox-exec: {}", e);
            std::process::exit(HELPER_FAILURE_STATUS);
        }
    }
}
