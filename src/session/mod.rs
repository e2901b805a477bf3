//! Session management module.
//!
//! This module provides the session identifier, the terminal lifecycle
//! state machine, and the registry that owns every session's workspace,
//! terminal and in-flight executions.

mod id;
mod registry;
mod state;

pub use id::{SessionId, MAX_SESSION_ID_LEN};
pub use registry::{ExecutionTicket, SessionEntry, SessionRegistry};
pub use state::TerminalState;
