//! HTTP transport against a real axum server on an ephemeral port.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use shared_types::{PollRequest, SendMessageRequest};
use tokio::net::TcpListener;

use log_view::{HttpTransport, LogTransport, TransportError};

#[derive(Clone, Default)]
struct ServerState {
    polls: Arc<Mutex<Vec<Value>>>,
    messages: Arc<Mutex<Vec<Value>>>,
}

struct TestServer {
    addr: SocketAddr,
    state: ServerState,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn poll_handler(State(state): State<ServerState>, Json(body): Json<Value>) -> Json<Value> {
    state.polls.lock().unwrap().push(body.clone());
    let context = body.get("context").cloned().unwrap_or(Value::Null);
    Json(json!({
        "deselect_chat": false,
        "context": context,
        "contexts": [{"id": "ctx-1", "name": "Recipes", "created_at": "2024-05-01T10:00:00Z", "running": true, "paused": false}],
        "tasks": [],
        "logs": [
            {"no": 0, "id": "u1", "type": "user", "heading": "", "content": "hi", "kvps": null, "timestamp": 1714557600.5, "agentno": 0},
            {"no": 1, "id": "t1", "type": "tool", "heading": "Using search", "content": "", "kvps": {"tool_name": "search_engine"}, "timestamp": 1714557601.0, "agentno": 0}
        ],
        "log_guid": "guid-1",
        "log_version": 2,
        "log_progress": "icon://search Searching",
        "log_progress_active": true,
        "paused": false,
        "notifications": [],
        "notifications_guid": "n-1",
        "notifications_version": 0
    }))
}

async fn message_handler(
    State(state): State<ServerState>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.messages.lock().unwrap().push(body.clone());
    Json(json!({"message": "Message received.", "context": body.get("context").cloned().unwrap_or(json!("ctx-new"))}))
}

async fn failing_handler() -> impl IntoResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Context not found"})),
    )
}

async fn garbage_handler() -> impl IntoResponse {
    (StatusCode::OK, "<html>not json</html>")
}

async fn start_server(router: Router<ServerState>) -> TestServer {
    let state = ServerState::default();
    let app = router.with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .await
            .expect("Server failed");
    });
    TestServer {
        addr,
        state,
        handle,
    }
}

fn transport(server: &TestServer) -> HttpTransport {
    HttpTransport::new(format!("http://{}/", server.addr), Duration::from_secs(5))
        .expect("Failed to build transport")
}

fn poll_request() -> PollRequest {
    PollRequest {
        log_from: 0,
        context: Some("ctx-1".into()),
        notifications_from: 0,
        timezone: "Europe/Prague".into(),
    }
}

#[tokio::test]
async fn poll_round_trips_wire_format() {
    let server = start_server(
        Router::new()
            .route("/poll", post(poll_handler))
            .route("/message_async", post(message_handler)),
    )
    .await;

    let response = transport(&server).poll(&poll_request()).await.unwrap();
    assert_eq!(response.context, "ctx-1");
    assert_eq!(response.log_version, 2);
    assert_eq!(response.logs.len(), 2);
    assert_eq!(response.logs[1].tool_name(), Some("search_engine"));
    assert!(response.logs[0].kvps.is_empty());
    assert!(response.logs[0].timestamp.is_some());
    assert!(response.contexts[0].running);
    assert_eq!(response.contexts[0].extra.get("paused"), Some(&json!(false)));

    let received = server.state.polls.lock().unwrap().clone();
    assert_eq!(received[0]["timezone"], "Europe/Prague");
    assert_eq!(received[0]["log_from"], 0);
}

#[tokio::test]
async fn send_message_carries_client_message_id() {
    let server = start_server(Router::new().route("/message_async", post(message_handler))).await;
    let request = SendMessageRequest::new("hello", Some("ctx-1".into()))
        .with_attachments(vec!["/tmp/a.txt".into()]);

    let response = transport(&server).send_message(&request).await.unwrap();
    assert_eq!(response.context, "ctx-1");

    let received = server.state.messages.lock().unwrap().clone();
    assert_eq!(received[0]["message_id"], request.message_id.as_str());
    assert_eq!(received[0]["attachments"], json!(["/tmp/a.txt"]));
}

#[tokio::test]
async fn server_error_message_is_surfaced() {
    let server = start_server(Router::new().route("/poll", post(failing_handler))).await;
    let err = transport(&server).poll(&poll_request()).await.unwrap_err();
    match err {
        TransportError::Status { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "Context not found");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let server = start_server(Router::new().route("/poll", post(garbage_handler))).await;
    let err = transport(&server).poll(&poll_request()).await.unwrap_err();
    assert!(matches!(err, TransportError::Decode(_)));
}

#[tokio::test]
async fn unreachable_server_is_a_request_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = HttpTransport::new(format!("http://{addr}"), Duration::from_secs(2)).unwrap();
    let err = transport.poll(&poll_request()).await.unwrap_err();
    assert!(matches!(err, TransportError::Request(_)));
}
