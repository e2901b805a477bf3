//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::error::TunnelError;
use crate::execution::{CompileOutcome, ExecutionOutcome};
use crate::terminal::TerminalEvent;
use crate::workspace::FileNode;

/// Query carrying only the session id.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    #[serde(default)]
    pub session_id: String,
}

/// Query for reading one file.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReadFileQuery {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub filepath: String,
}

/// Request to create or overwrite a file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveFileRequest {
    #[serde(default)]
    pub session_id: String,
    pub filepath: String,
    #[serde(default)]
    pub content: String,
}

/// Request to delete a file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFileRequest {
    #[serde(default)]
    pub session_id: String,
    pub filepath: String,
}

/// Request to run code or a workspace file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default)]
    pub session_id: String,
    pub language: String,
    /// Inline source.
    #[serde(default, alias = "sourceCode")]
    pub code: Option<String>,
    /// Workspace file to run; wins over `code`.
    #[serde(default)]
    pub filepath: Option<String>,
}

/// Request to compile a workspace file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    #[serde(default)]
    pub session_id: String,
    pub filepath: String,
    pub language: String,
}

/// Workspace tree.
#[derive(Debug, Clone, Serialize)]
pub struct FilesResponse {
    pub files: Vec<FileNode>,
}

/// File contents.
#[derive(Debug, Clone, Serialize)]
pub struct ContentResponse {
    pub content: String,
}

/// Acknowledgment of a mutation.
#[derive(Debug, Clone, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Result of one run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub stdout: String,
    pub stderr: String,
    /// `null` when the guest was killed.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub truncated: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ExecutionOutcome> for ExecuteResponse {
    fn from(outcome: ExecutionOutcome) -> Self {
        Self {
            duration_ms: outcome.duration.as_millis() as u64,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            exit_code: outcome.exit_code,
            timed_out: outcome.timed_out,
            truncated: outcome.truncated,
            error: None,
        }
    }
}

/// Result of a compile.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl From<CompileOutcome> for CompileResponse {
    fn from(outcome: CompileOutcome) -> Self {
        match outcome {
            CompileOutcome::Built { output_path } => Self {
                success: true,
                output_path: Some(output_path),
                stdout: None,
                stderr: None,
                exit_code: None,
                timed_out: false,
            },
            CompileOutcome::Failed(run) => Self {
                success: false,
                output_path: None,
                stdout: Some(run.stdout),
                stderr: Some(run.stderr),
                exit_code: run.exit_code,
                timed_out: run.timed_out,
            },
        }
    }
}

/// Generic API error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Error code (e.g., "ACCESS_DENIED").
    pub code: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }
}

impl From<&TunnelError> for ErrorResponse {
    fn from(err: &TunnelError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

/// Session channel frames, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum WsMessage {
    /// Client asks for the session's terminal.
    CreateTerminal {
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Server acknowledges a terminal.
    TerminalCreated { term_id: String },
    /// Client keystrokes.
    TerminalInput { term_id: String, input: String },
    /// Shell output.
    TerminalOutput { term_id: String, data: String },
    /// Client window size.
    TerminalResize { term_id: String, cols: u16, rows: u16 },
    /// Shell exited.
    TerminalExit {
        term_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<u32>,
    },
    /// Ping/pong for connection health.
    Ping,
    Pong,
    /// Rejected request or unparseable frame.
    Error { code: String, message: String },
}

impl WsMessage {
    pub fn error(err: &TunnelError) -> Self {
        WsMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<TerminalEvent> for WsMessage {
    fn from(event: TerminalEvent) -> Self {
        match event {
            TerminalEvent::Created { term_id } => WsMessage::TerminalCreated { term_id },
            TerminalEvent::Output { term_id, data } => WsMessage::TerminalOutput { term_id, data },
            TerminalEvent::Exited { term_id, exit_code } => {
                WsMessage::TerminalExit { term_id, exit_code }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_session_query_default() {
        let query: SessionQuery = serde_json::from_str("{}").unwrap();
        assert!(query.session_id.is_empty());
    }

    #[test]
    fn test_execute_request_fields() {
        let json = r#"{"sessionId": "alice", "language": "python", "code": "print(1)"}"#;
        let req: ExecuteRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.session_id, "alice");
        assert_eq!(req.code.as_deref(), Some("print(1)"));
        assert!(req.filepath.is_none());

        let json = r#"{"sessionId": "alice", "language": "python", "sourceCode": "x"}"#;
        let req: ExecuteRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.code.as_deref(), Some("x"));
    }

    #[test]
    fn test_execute_response_null_exit_code() {
        let outcome = ExecutionOutcome {
            stdout: "started\n".to_string(),
            timed_out: true,
            duration: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_value(ExecuteResponse::from(outcome)).unwrap();
        assert!(json["exitCode"].is_null());
        assert_eq!(json["timedOut"], true);
        assert_eq!(json["durationMs"], 1500);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_compile_response_shapes() {
        let built = CompileResponse::from(CompileOutcome::Built {
            output_path: "src/main".to_string(),
        });
        let json = serde_json::to_value(built).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["outputPath"], "src/main");
        assert!(json.get("stderr").is_none());

        let failed = CompileResponse::from(CompileOutcome::Failed(ExecutionOutcome {
            stderr: "error: expected ';'".to_string(),
            exit_code: Some(1),
            ..Default::default()
        }));
        let json = serde_json::to_value(failed).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["exitCode"], 1);
        assert!(json.get("outputPath").is_none());
    }

    #[test]
    fn test_error_response_serialization() {
        let err = ErrorResponse::from(&TunnelError::AccessDenied("../x".to_string()));
        let json = serde_json::to_value(err).unwrap();
        assert_eq!(json["code"], "ACCESS_DENIED");
        assert!(json["error"].as_str().unwrap().contains("../x"));
    }

    #[test]
    fn test_ws_message_wire_names() {
        let msg: WsMessage =
            serde_json::from_str(r#"{"type": "create-terminal", "sessionId": "alice"}"#).unwrap();
        assert_eq!(
            msg,
            WsMessage::CreateTerminal {
                session_id: Some("alice".to_string())
            }
        );

        let msg: WsMessage = serde_json::from_str(r#"{"type": "create-terminal"}"#).unwrap();
        assert_eq!(msg, WsMessage::CreateTerminal { session_id: None });

        let msg: WsMessage = serde_json::from_str(
            r#"{"type": "terminal-resize", "termId": "alice", "cols": 120, "rows": 40}"#,
        )
        .unwrap();
        assert!(matches!(msg, WsMessage::TerminalResize { cols: 120, rows: 40, .. }));

        let json = serde_json::to_string(&WsMessage::TerminalOutput {
            term_id: "alice".to_string(),
            data: "$ ".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"terminal-output""#));
        assert!(json.contains(r#""termId":"alice""#));
    }

    #[test]
    fn test_terminal_exit_without_code() {
        let json = serde_json::to_string(&WsMessage::TerminalExit {
            term_id: "alice".to_string(),
            exit_code: None,
        })
        .unwrap();
        assert!(!json.contains("exitCode"));
    }

    #[test]
    fn test_ws_message_ping_parse() {
        let msg: WsMessage = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert_eq!(msg, WsMessage::Ping);
    }

    #[test]
    fn test_event_conversion() {
        let msg = WsMessage::from(TerminalEvent::Exited {
            term_id: "bob".to_string(),
            exit_code: Some(3),
        });
        assert_eq!(
            msg,
            WsMessage::TerminalExit {
                term_id: "bob".to_string(),
                exit_code: Some(3)
            }
        );
    }
}
