//! API layer for sandbox-tunnel.
//!
//! ## Endpoints
//!
//! ### Health & Info
//! - `GET /health` - Health check
//! - `GET /api` - API information
//!
//! ### Workspace files
//! - `GET /api/files/list?sessionId=` - Workspace tree
//! - `GET /api/files/read?sessionId=&filepath=` - File contents
//! - `POST /api/files/save` - Create or overwrite a file
//! - `POST /api/files/delete` - Delete a file or directory
//!
//! ### Execution
//! - `POST /api/execute` - Run inline code or a workspace file
//! - `POST /api/compile` - Compile a workspace file
//!
//! ### Session channel
//! - `WS /ws` - Interactive terminal (`create-terminal`, `terminal-input`,
//!   `terminal-resize` in; `terminal-created`, `terminal-output`,
//!   `terminal-exit` out)
//!
//! ## Example
//!
//! ```no_run
//! use sandbox_tunnel::api::{serve, AppState, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> sandbox_tunnel::Result<()> {
//!     let state = AppState::with_workspace_root("./workspaces");
//!     serve(ServerConfig::new("127.0.0.1", 3000), state).await
//! }
//! ```

pub mod handlers;
pub mod router;
pub mod types;
pub mod websocket;

// Re-export commonly used types
pub use handlers::{ApiError, AppState};
pub use router::{create_router, serve, ServerConfig};
pub use types::{ErrorResponse, WsMessage};
