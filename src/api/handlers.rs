//! REST API handlers.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, error};

use super::types::{
    CompileRequest, CompileResponse, ContentResponse, DeleteFileRequest, ErrorResponse,
    ExecuteRequest, ExecuteResponse, FilesResponse, ReadFileQuery, SaveFileRequest, SessionQuery,
    SuccessResponse,
};
use crate::error::TunnelError;
use crate::execution::{self, ExecutionDispatcher, ExecutionSettings, Isolation};
use crate::session::SessionRegistry;
use crate::terminal::{TerminalMultiplexer, TerminalSettings};
use crate::workspace::{files, WorkspaceGuard};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub terminals: Arc<TerminalMultiplexer>,
    pub dispatcher: Arc<ExecutionDispatcher>,
}

impl AppState {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        terminal: TerminalSettings,
        execution: ExecutionSettings,
        isolation: Isolation,
    ) -> Self {
        let registry = match isolation {
            Isolation::Host => SessionRegistry::new(workspace_root),
            // Guests run under their own uid and write into the workspaces.
            Isolation::Sandbox(_) => SessionRegistry::new(workspace_root).with_shared_workspaces(),
        };
        let registry = Arc::new(registry);
        let terminals = Arc::new(TerminalMultiplexer::new(
            Arc::clone(&registry),
            terminal,
            isolation.clone(),
        ));
        let dispatcher = Arc::new(ExecutionDispatcher::new(
            Arc::clone(&registry),
            execution,
            isolation,
        ));
        Self {
            registry,
            terminals,
            dispatcher,
        }
    }

    /// Host-mode state with default settings.
    pub fn with_workspace_root(workspace_root: impl Into<PathBuf>) -> Self {
        Self::new(
            workspace_root,
            TerminalSettings::default(),
            ExecutionSettings::default(),
            Isolation::Host,
        )
    }

    async fn guard(&self, session_id: &str) -> Result<WorkspaceGuard, ApiError> {
        let (_, workspace) = self.registry.workspace_for(session_id).await?;
        Ok(self.registry.guard(&workspace))
    }
}

/// A [`TunnelError`] rendered as `{error, code}` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub TunnelError);

impl From<TunnelError> for ApiError {
    fn from(err: TunnelError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(TunnelError::BadRequest(rejection.body_text()))
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            TunnelError::InvalidSession(_) | TunnelError::BadRequest(_) => StatusCode::BAD_REQUEST,
            TunnelError::NotFound(_) => StatusCode::NOT_FOUND,
            TunnelError::AccessDenied(_) => StatusCode::FORBIDDEN,
            TunnelError::UnsupportedLanguage(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.0.code(), "request failed: {}", self.0);
        } else {
            debug!(code = self.0.code(), "request rejected: {}", self.0);
        }
        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

/// API information endpoint.
pub async fn api_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "sandbox-tunnel",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// List the session's workspace as a tree.
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<FilesResponse> {
    let guard = state.guard(&query.session_id).await?;
    let files = files::list(&guard).await?;
    Ok(Json(FilesResponse { files }))
}

/// Read one file.
pub async fn read_file(
    State(state): State<AppState>,
    Query(query): Query<ReadFileQuery>,
) -> ApiResult<ContentResponse> {
    let guard = state.guard(&query.session_id).await?;
    let content = files::read(&guard, &query.filepath).await?;
    Ok(Json(ContentResponse { content }))
}

/// Create or overwrite a file.
pub async fn save_file(
    State(state): State<AppState>,
    body: Result<Json<SaveFileRequest>, JsonRejection>,
) -> ApiResult<SuccessResponse> {
    let Json(req) = body?;
    let guard = state.guard(&req.session_id).await?;
    files::save(&guard, &req.filepath, &req.content).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// Delete a file or directory.
pub async fn delete_file(
    State(state): State<AppState>,
    body: Result<Json<DeleteFileRequest>, JsonRejection>,
) -> ApiResult<SuccessResponse> {
    let Json(req) = body?;
    let guard = state.guard(&req.session_id).await?;
    files::delete(&guard, &req.filepath).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// Run inline code or a workspace file.
pub async fn execute(
    State(state): State<AppState>,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> ApiResult<ExecuteResponse> {
    let Json(req) = body?;
    let outcome = state
        .dispatcher
        .execute(execution::ExecutionRequest {
            session_id: req.session_id,
            language: req.language,
            code: req.code,
            filepath: req.filepath,
        })
        .await?;

    let timed_out = outcome.timed_out;
    let mut response = ExecuteResponse::from(outcome);
    if timed_out {
        let limit = state.dispatcher.settings().timeout;
        response.error = Some(TunnelError::ExecutionTimeout(limit).to_string());
    }
    Ok(Json(response))
}

/// Compile a workspace file.
pub async fn compile(
    State(state): State<AppState>,
    body: Result<Json<CompileRequest>, JsonRejection>,
) -> ApiResult<CompileResponse> {
    let Json(req) = body?;
    let outcome = state
        .dispatcher
        .compile(execution::CompileRequest {
            session_id: req.session_id,
            filepath: req.filepath,
            language: req.language,
        })
        .await?;
    Ok(Json(CompileResponse::from(outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_app_state_new() {
        let dir = TempDir::new().unwrap();
        let state = AppState::with_workspace_root(dir.path());
        assert_eq!(state.registry.count(), 0);
        assert_eq!(state.registry.root(), dir.path());
    }

    #[test]
    fn test_sandboxed_state_shares_workspaces() {
        let dir = TempDir::new().unwrap();
        let launcher = crate::sandbox::SandboxLauncher::new(dir.path(), 1001, "/usr/local/bin/sandbox-exec", true);
        let state = AppState::new(
            dir.path().join("workspaces"),
            TerminalSettings::default(),
            ExecutionSettings::default(),
            Isolation::Sandbox(launcher),
        );
        assert!(state.registry.is_shared());

        let argv = state.terminals.shell_argv(&dir.path().join("workspaces/alice")).unwrap();
        assert_eq!(argv[0], "sudo");
        assert_eq!(argv[2], "/usr/local/bin/sandbox-exec");

        assert!(!AppState::with_workspace_root(dir.path()).registry.is_shared());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = health().await;
        assert_eq!(response, "OK");
    }

    #[tokio::test]
    async fn test_api_info_endpoint() {
        let response = api_info().await;
        let json = response.0;
        assert_eq!(json["name"], "sandbox-tunnel");
        assert_eq!(json["status"], "running");
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (TunnelError::InvalidSession(String::new()), StatusCode::BAD_REQUEST),
            (TunnelError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (TunnelError::NotFound("a.py".into()), StatusCode::NOT_FOUND),
            (TunnelError::AccessDenied("../a".into()), StatusCode::FORBIDDEN),
            (
                TunnelError::UnsupportedLanguage("cobol".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (TunnelError::LockPoisoned, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[tokio::test]
    async fn test_save_then_read() {
        let dir = TempDir::new().unwrap();
        let state = AppState::with_workspace_root(dir.path());

        let req = SaveFileRequest {
            session_id: "alice".to_string(),
            filepath: "a.py".to_string(),
            content: "x=1".to_string(),
        };
        tokio_test::assert_ok!(save_file(State(state.clone()), Ok(Json(req))).await);

        let query = ReadFileQuery {
            session_id: "alice".to_string(),
            filepath: "a.py".to_string(),
        };
        let Json(read) = read_file(State(state), Query(query)).await.unwrap();
        assert_eq!(read.content, "x=1");
    }

    #[tokio::test]
    async fn test_invalid_session_rejected() {
        let dir = TempDir::new().unwrap();
        let state = AppState::with_workspace_root(dir.path());

        let result = list_files(State(state), Query(SessionQuery::default())).await;
        let err = tokio_test::assert_err!(result);
        assert!(matches!(err.0, TunnelError::InvalidSession(_)));
    }
}
