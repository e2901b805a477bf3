//! # sandbox-tunnel
//!
//! Backend for browser-hosted code editors: per-session workspaces,
//! interactive terminals and sandboxed one-shot code execution.
//!
//! ## Features
//!
//! - **Workspaces**: one directory per session, every client path confined
//!   to it by [`WorkspaceGuard`]
//! - **Terminals**: one pty-backed shell per session, relayed over a
//!   WebSocket session channel
//! - **Execution**: interpreters and compilers run with hard timeouts,
//!   process-group kill and bounded output
//! - **Sandbox**: guests confined to a root image under an unprivileged uid
//!   by the `sandbox-exec` helper
//!
//! ## Quick Start
//!
//! ```no_run
//! use sandbox_tunnel::api::{serve, AppState, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> sandbox_tunnel::Result<()> {
//!     sandbox_tunnel::logging::try_init().ok();
//!
//!     let state = AppState::with_workspace_root("./workspaces");
//!     serve(ServerConfig::default(), state).await
//! }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod pty;
pub mod sandbox;
pub mod session;
pub mod terminal;
pub mod workspace;

// Re-export commonly used types
pub use error::{Result, TunnelError};
pub use execution::{
    CompileOutcome, ExecutionDispatcher, ExecutionOutcome, ExecutionRequest, ExecutionSettings,
    Isolation,
};
pub use pty::{NativePty, PtySize};
pub use session::{SessionId, SessionRegistry, TerminalState};
pub use terminal::{TerminalEvent, TerminalMultiplexer, TerminalSettings};
pub use workspace::WorkspaceGuard;
