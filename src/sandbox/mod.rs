//! Sandbox isolation.
//!
//! Guests run confined to a root image under an unprivileged uid. The
//! privileged part lives in the separate `sandbox-exec` helper
//! ([`IsolationRequest::run`]); the server only builds the helper's argv
//! ([`SandboxLauncher`]) and never holds elevated identity itself. The helper
//! stays behind as the guest's parent and enforces the [`Supervision`]
//! limits, since the server has no right to signal the guest.

mod isolation;
mod launcher;
mod supervise;

pub use isolation::IsolationRequest;
pub use launcher::{GuestArg, SandboxLauncher};
#[cfg(unix)]
pub use supervise::{install_termination_handlers, supervise};
pub use supervise::{GuestExit, Supervision, DEFAULT_GUEST_WATCHDOG};

/// Exit status of the helper when it refuses or fails to start the guest.
pub const HELPER_FAILURE_STATUS: i32 = 126;

/// Exit status of the helper when it killed the guest for running too long.
pub const HELPER_TIMEOUT_STATUS: i32 = 124;
