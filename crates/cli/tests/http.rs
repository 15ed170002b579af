use std::net::SocketAddr;
use std::sync::Arc;

use cli::http::{self, AppState};
use policy::QueryPolicy;
use runtime::{CommandExecutor, CommandSettings, DatabaseSettings, QueryExecutor};
use serde_json::{Value, json};
use tokio::sync::oneshot;

struct Server {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Server {
    async fn start() -> Self {
        // Nothing listens on port 1, so every pooled request fails fast.
        let database = DatabaseSettings {
            port: 1,
            acquire_timeout_ms: 500,
            ..DatabaseSettings::default()
        };
        let state = AppState {
            queries: Arc::new(QueryExecutor::new(&database, QueryPolicy::default())),
            commands: Arc::new(CommandExecutor::new(CommandSettings::default())),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(http::serve(listener, state, async {
            let _ = rx.await;
        }));

        Self {
            addr,
            shutdown: Some(tx),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let response = reqwest::Client::new()
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[tokio::test]
async fn forbidden_query_is_rejected_with_400() {
    let server = Server::start().await;
    let (status, body) = server
        .post(
            "/query",
            json!({"query": "drop table users", "operation": "select"}),
        )
        .await;

    assert_eq!(status, 400);
    assert_eq!(body["error"], "query rejected");
    assert_eq!(
        body["details"],
        "unsafe query: contains forbidden keyword 'DROP'"
    );
}

#[tokio::test]
async fn delete_without_where_is_rejected_with_400() {
    let server = Server::start().await;
    let (status, body) = server
        .post(
            "/query",
            json!({"query": "DELETE FROM users", "operation": "delete"}),
        )
        .await;

    assert_eq!(status, 400);
    assert_eq!(body["details"], "unsafe query: DELETE without WHERE clause");
}

#[tokio::test]
async fn missing_operation_is_a_bad_request() {
    let server = Server::start().await;
    let (status, body) = server.post("/query", json!({"query": "SELECT 1"})).await;

    assert_eq!(status, 400);
    assert_eq!(body["error"], "missing required field");
    assert_eq!(body["details"], "operation");
}

#[tokio::test]
async fn unreachable_database_is_a_server_error() {
    let server = Server::start().await;
    let (status, body) = server
        .post(
            "/query",
            json!({"query": "SELECT 1", "operation": "select"}),
        )
        .await;

    assert_eq!(status, 500);
    assert_eq!(body["error"], "database error");
    assert!(body["details"].as_str().is_some_and(|d| !d.is_empty()));
}

#[tokio::test]
async fn health_check_reports_database_status() {
    let server = Server::start().await;
    let response = reqwest::get(server.url("/test")).await.unwrap();

    assert_eq!(response.status().as_u16(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["status"]["database"], "disconnected");
    assert_eq!(body["status"]["api"], "running");
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let server = Server::start().await;
    let response = reqwest::Client::new()
        .post(server.url("/execute"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid request body");
}

#[cfg(unix)]
#[tokio::test]
async fn execute_runs_in_default_shell() {
    let server = Server::start().await;
    let (status, body) = server.post("/execute", json!({"command": "echo hi"})).await;

    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({"success": true, "exitCode": 0, "output": "hi\n", "error": ""})
    );
}

#[cfg(unix)]
#[tokio::test]
async fn execute_reports_nonzero_exit() {
    let server = Server::start().await;
    let (status, body) = server
        .post("/execute", json!({"command": "echo oops >&2; exit 2"}))
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["success"], false);
    assert_eq!(body["exitCode"], 2);
    assert_eq!(body["error"], "oops\n");
}

#[cfg(unix)]
#[tokio::test]
async fn execute_timeout_is_a_server_error() {
    let server = Server::start().await;
    let (status, body) = server
        .post("/execute", json!({"command": "sleep 5", "timeout": 200}))
        .await;

    assert_eq!(status, 500);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "command timed out after 200ms");
}
