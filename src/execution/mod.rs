//! Code execution engine.
//!
//! This module runs one-shot guest programs for sessions:
//! - Interpreter and compiler resolution per language
//! - Temporary source files that never outlive their run
//! - Hard timeouts with process-group kill and a watchdog
//! - Bounded stdout/stderr capture
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sandbox_tunnel::execution::{ExecutionDispatcher, ExecutionRequest, ExecutionSettings, Isolation};
//! use sandbox_tunnel::session::SessionRegistry;
//!
//! # async fn demo() -> sandbox_tunnel::Result<()> {
//! let registry = Arc::new(SessionRegistry::new("/var/lib/sandbox-tunnel/workspaces"));
//! let dispatcher = ExecutionDispatcher::new(registry, ExecutionSettings::default(), Isolation::Host);
//!
//! let outcome = dispatcher
//!     .execute(ExecutionRequest {
//!         session_id: "alice".into(),
//!         language: "python".into(),
//!         code: Some("print(1+1)".into()),
//!         filepath: None,
//!     })
//!     .await?;
//! assert_eq!(outcome.stdout, "2\n");
//! # Ok(())
//! # }
//! ```

mod dispatcher;
mod language;
mod outcome;
pub mod process_group;

pub use dispatcher::{
    compile_output_path, CompileRequest, ExecutionDispatcher, ExecutionRequest, ExecutionSettings,
    Isolation, DEFAULT_MAX_OUTPUT, DEFAULT_TIMEOUT, DEFAULT_WATCHDOG,
};
pub use language::{LanguageSpec, LanguageTable, Resolved};
pub use outcome::{CompileOutcome, ExecutionOutcome};
