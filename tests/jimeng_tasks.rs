#![cfg(feature = "gateway")]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use quote_portrait::{
    JimengTasks, PollPolicy, PortraitError, ProviderResult, VolcCredentials, VolcSigner,
};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct SeenCall {
    action: String,
    authorization: Option<String>,
    x_date: Option<String>,
    content_sha256: Option<String>,
    body_sha256: String,
    body: Value,
}

/// Stateful stand-in for the async image API: answers submits with a fixed
/// task id and replays `script` for status checks (the last entry repeats).
struct StubApi {
    submit: (StatusCode, Value),
    script: Vec<(StatusCode, Value)>,
    polls: AtomicUsize,
    calls: Mutex<Vec<SeenCall>>,
}

impl StubApi {
    fn new(script: Vec<(StatusCode, Value)>) -> Self {
        Self {
            submit: (
                StatusCode::OK,
                json!({ "code": 10000, "data": { "task_id": "task-42" } }),
            ),
            script,
            polls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_submit(mut self, status: StatusCode, body: Value) -> Self {
        self.submit = (status, body);
        self
    }

    async fn calls(&self, action: &str) -> Vec<SeenCall> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| call.action == action)
            .cloned()
            .collect()
    }
}

async fn handle(
    State(stub): State<Arc<StubApi>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let action = query.get("Action").cloned().unwrap_or_default();
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let mut hasher = Sha256::new();
    hasher.update(&body);
    let body_sha256 = hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();

    stub.calls.lock().await.push(SeenCall {
        action: action.clone(),
        authorization: header("authorization"),
        x_date: header("x-date"),
        content_sha256: header("x-content-sha256"),
        body_sha256,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    let (status, payload) = match action.as_str() {
        "CVSync2AsyncSubmitTask" => stub.submit.clone(),
        "CVSync2AsyncGetResult" => {
            let index = stub.polls.fetch_add(1, Ordering::SeqCst);
            let last = stub.script.len().saturating_sub(1);
            stub.script[index.min(last)].clone()
        }
        _ => (StatusCode::BAD_REQUEST, json!({ "error": "unknown action" })),
    };
    (status, Json(payload)).into_response()
}

async fn spawn_stub(stub: Arc<StubApi>) -> SocketAddr {
    let app = Router::new().route("/", post(handle)).with_state(stub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

fn tasks_for(addr: SocketAddr) -> JimengTasks {
    let credentials = VolcCredentials::new("ak-test", "sk-test").expect("credentials");
    let signer = VolcSigner::new(credentials, "visual.volcengineapi.com", "cn-north-1", "cv")
        .expect("signer");
    JimengTasks::new(signer)
        .expect("client")
        .with_base_url(format!("http://{addr}"))
        .with_poll_policy(PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts: 20,
        })
}

fn pending() -> (StatusCode, Value) {
    (
        StatusCode::OK,
        json!({ "code": 10000, "data": { "status": "generating" } }),
    )
}

#[tokio::test]
async fn polls_until_done_with_fresh_signature_per_call() -> quote_portrait::Result<()> {
    if quote_portrait::utils::test_support::should_skip_httpmock() {
        return Ok(());
    }

    let stub = Arc::new(StubApi::new(vec![
        pending(),
        pending(),
        (
            StatusCode::OK,
            json!({ "data": { "status": "done", "image_urls": ["https://img.example/ada.png"] } }),
        ),
    ]));
    let addr = spawn_stub(stub.clone()).await;
    let tasks = tasks_for(addr);

    let task = tasks.submit("Ada Lovelace").await?;
    assert_eq!(task.task_id, "task-42");
    let images = tasks.wait(task).await?;
    assert_eq!(
        images.into_result()?,
        ProviderResult::url("https://img.example/ada.png")
    );

    let submits = stub.calls("CVSync2AsyncSubmitTask").await;
    assert_eq!(submits.len(), 1);
    assert_eq!(submits[0].body["req_key"], "jimeng_t2i_v40");
    assert_eq!(submits[0].body["width"], 1728);
    assert_eq!(submits[0].body["height"], 2304);

    let polls = stub.calls("CVSync2AsyncGetResult").await;
    assert_eq!(polls.len(), 3);
    for call in &polls {
        let authorization = call.authorization.as_deref().expect("authorization");
        assert!(authorization.starts_with("HMAC-SHA256 Credential=ak-test/"));
        assert!(authorization.contains("/cn-north-1/cv/request, "));
        assert_eq!(call.x_date.as_deref().map(str::len), Some(16));
        assert_eq!(call.content_sha256.as_deref(), Some(call.body_sha256.as_str()));
        assert_eq!(call.body["task_id"], "task-42");
        assert_eq!(call.body["req_json"], r#"{"return_url":false}"#);
    }
    Ok(())
}

#[tokio::test]
async fn always_pending_times_out_after_budget() -> quote_portrait::Result<()> {
    if quote_portrait::utils::test_support::should_skip_httpmock() {
        return Ok(());
    }

    let stub = Arc::new(StubApi::new(vec![pending()]));
    let addr = spawn_stub(stub.clone()).await;

    let err = tasks_for(addr).run("Ada").await.expect_err("timeout");
    match err {
        PortraitError::Timeout { task_id, attempts } => {
            assert_eq!(task_id, "task-42");
            assert_eq!(attempts, 20);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(stub.calls("CVSync2AsyncGetResult").await.len(), 20);
    Ok(())
}

#[tokio::test]
async fn rejected_status_checks_count_as_pending() -> quote_portrait::Result<()> {
    if quote_portrait::utils::test_support::should_skip_httpmock() {
        return Ok(());
    }

    let stub = Arc::new(StubApi::new(vec![
        (StatusCode::SERVICE_UNAVAILABLE, json!({ "message": "busy" })),
        (
            StatusCode::OK,
            json!({ "data": { "status": "done", "binary_data_base64": ["aGk="], "image_urls": ["https://img.example/x.png"] } }),
        ),
    ]));
    let addr = spawn_stub(stub.clone()).await;

    let images = tasks_for(addr).run("Ada").await?;
    assert_eq!(images.image_base64.as_deref(), Some("aGk="));
    assert_eq!(images.image_url.as_deref(), Some("https://img.example/x.png"));
    assert_eq!(images.into_result()?, ProviderResult::base64("aGk="));
    assert_eq!(stub.calls("CVSync2AsyncGetResult").await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn expired_task_is_terminal() -> quote_portrait::Result<()> {
    if quote_portrait::utils::test_support::should_skip_httpmock() {
        return Ok(());
    }

    let stub = Arc::new(StubApi::new(vec![
        pending(),
        (StatusCode::OK, json!({ "data": { "status": "expired" } })),
        pending(),
    ]));
    let addr = spawn_stub(stub.clone()).await;

    let err = tasks_for(addr).run("Ada").await.expect_err("expired");
    assert!(
        matches!(&err, PortraitError::TaskFailed { status, .. } if status == "expired"),
        "{err}"
    );
    assert_eq!(stub.calls("CVSync2AsyncGetResult").await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn done_without_images_is_protocol_error() -> quote_portrait::Result<()> {
    if quote_portrait::utils::test_support::should_skip_httpmock() {
        return Ok(());
    }

    let stub = Arc::new(StubApi::new(vec![(
        StatusCode::OK,
        json!({ "data": { "status": "done", "image_urls": [] } }),
    )]));
    let addr = spawn_stub(stub).await;

    let err = tasks_for(addr).run("Ada").await.expect_err("empty");
    assert!(matches!(err, PortraitError::Protocol(_)), "{err}");
    Ok(())
}

#[tokio::test]
async fn submit_failures_surface_status_or_protocol_errors() -> quote_portrait::Result<()> {
    if quote_portrait::utils::test_support::should_skip_httpmock() {
        return Ok(());
    }

    let rejected = Arc::new(
        StubApi::new(vec![pending()])
            .with_submit(StatusCode::UNAUTHORIZED, json!({ "message": "bad signature" })),
    );
    let addr = spawn_stub(rejected.clone()).await;
    let err = tasks_for(addr).submit("Ada").await.expect_err("401");
    match err {
        PortraitError::Upstream { status, body } => {
            assert_eq!(status.as_u16(), 401);
            assert!(body.contains("bad signature"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(rejected.calls("CVSync2AsyncGetResult").await.is_empty());

    let no_task = Arc::new(
        StubApi::new(vec![pending()]).with_submit(StatusCode::OK, json!({ "data": {} })),
    );
    let addr = spawn_stub(no_task).await;
    let err = tasks_for(addr).submit("Ada").await.expect_err("no task id");
    assert!(matches!(err, PortraitError::Protocol(_)), "{err}");
    Ok(())
}
