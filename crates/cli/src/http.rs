//! HTTP surface for the query and command backends.
//!
//! - `POST /query` `{query, operation, params}` → `{rows, rowCount}`
//! - `GET /test` → `{success, status: {database, api}}`
//! - `POST /execute` `{command, timeout}` → `{success, exitCode, output, error}`
//!
//! Failures carry `{error, details}`: 400 for bad input or a rejected query,
//! 500 for backend faults.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use policy::Operation;
use runtime::{CommandError, CommandExecutor, CommandRequest, QueryError, QueryExecutor};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Shared handles for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub queries: Arc<QueryExecutor>,
    pub commands: Arc<CommandExecutor>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/query", post(query))
        .route("/test", get(test))
        .route("/execute", post(execute))
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "http surface listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    query: Option<String>,
    operation: Option<Operation>,
    #[serde(default)]
    params: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ExecuteBody {
    command: Option<String>,
    /// Milliseconds.
    timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteReply {
    success: bool,
    exit_code: i32,
    output: String,
    error: String,
}

fn error_reply(status: StatusCode, error: &str, details: impl Into<String>) -> Response {
    (
        status,
        Json(json!({"error": error, "details": details.into()})),
    )
        .into_response()
}

fn bad_body(rejection: JsonRejection) -> Response {
    error_reply(
        StatusCode::BAD_REQUEST,
        "invalid request body",
        rejection.body_text(),
    )
}

async fn query(
    State(state): State<AppState>,
    body: Result<Json<QueryBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let Some(query) = body.query else {
        return error_reply(StatusCode::BAD_REQUEST, "missing required field", "query");
    };
    let Some(operation) = body.operation else {
        return error_reply(StatusCode::BAD_REQUEST, "missing required field", "operation");
    };
    let params = body.params.unwrap_or_default();

    match state.queries.run(&query, operation, &params).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(QueryError::Rejected(reason)) => {
            error_reply(StatusCode::BAD_REQUEST, "query rejected", reason)
        }
        Err(e) => {
            warn!(error = %e, "query failed");
            error_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "database error",
                e.to_string(),
            )
        }
    }
}

async fn test(State(state): State<AppState>) -> Response {
    match state.queries.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "status": {"database": "connected", "api": "running"}
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "status": {"database": "disconnected", "api": "running"},
                "error": e.to_string()
            })),
        )
            .into_response(),
    }
}

async fn execute(
    State(state): State<AppState>,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let Some(command) = body.command else {
        return error_reply(StatusCode::BAD_REQUEST, "missing required field", "command");
    };

    let mut request = CommandRequest::new(state.commands.settings().default_shell, command);
    if let Some(ms) = body.timeout {
        request = request.timeout(Duration::from_millis(ms));
    }

    match state.commands.run(&request).await {
        Ok(out) => (
            StatusCode::OK,
            Json(ExecuteReply {
                success: out.success,
                exit_code: out.exit_code,
                output: out.output,
                error: out.error,
            }),
        )
            .into_response(),
        Err(e @ (CommandError::EmptyCommand | CommandError::WorkingDir(_))) => {
            error_reply(StatusCode::BAD_REQUEST, "invalid command", e.to_string())
        }
        Err(e) => {
            warn!(error = %e, "command failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ExecuteReply {
                    success: false,
                    exit_code: -1,
                    output: String::new(),
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}
