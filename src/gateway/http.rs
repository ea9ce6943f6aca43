use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::{ProviderSettings, ServerConfig};
use crate::image::ImageBackend;
use crate::orchestrator::PortraitOrchestrator;
use crate::poster::portrait_prompt;
use crate::providers::{ArkImages, JimengTasks, PollPolicy};
use crate::types::{GenerationRequest, ProviderResult};
use crate::utils::http::{MAX_RESPONSE_BODY_BYTES, build_http_client, parse_json_lenient};
use crate::{PortraitError, Result};

/// Shared state behind every relay route. Credentials are resolved once at
/// startup and never leave the process except as upstream auth headers.
#[derive(Clone)]
pub struct PortraitHttpState {
    settings: Arc<ProviderSettings>,
    config: Arc<ServerConfig>,
    http: reqwest::Client,
    jimeng_base_url: Option<String>,
    jimeng: Option<Arc<JimengVariant>>,
    portrait: Option<Arc<PortraitOrchestrator>>,
}

impl PortraitHttpState {
    pub fn new(settings: ProviderSettings, config: ServerConfig) -> Result<Self> {
        let http = build_http_client(config.request_timeout())?;
        Self {
            settings: Arc::new(settings),
            config: Arc::new(config),
            http,
            jimeng_base_url: None,
            jimeng: None,
            portrait: None,
        }
        .assembled()
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Result<Self> {
        self.http = http;
        self.assembled()
    }

    /// Sends signed async-task calls somewhere other than `https://<host>`.
    pub fn with_jimeng_base_url(mut self, base_url: impl Into<String>) -> Result<Self> {
        self.jimeng_base_url = Some(base_url.into());
        self.assembled()
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Rebuilds the adapters behind `/api/jimeng` and `/api/portrait` so both
    /// routes share one client and one async endpoint.
    fn assembled(mut self) -> Result<Self> {
        self.jimeng = self.jimeng_variant()?.map(Arc::new);
        self.portrait = match self.settings.primary {
            Some(_) => Some(Arc::new(PortraitOrchestrator::from_settings_with_client(
                &self.settings,
                &self.config,
                self.http.clone(),
                self.jimeng_base_url.as_deref(),
            )?)),
            None => None,
        };
        Ok(self)
    }

    /// The signed async provider when its keys are present, else the
    /// synchronous Ark provider.
    fn jimeng_variant(&self) -> Result<Option<JimengVariant>> {
        if let Some(settings) = self.settings.jimeng.as_ref() {
            let mut tasks = JimengTasks::from_settings(settings)?
                .with_http_client(self.http.clone())
                .with_poll_policy(PollPolicy {
                    interval: self.config.poll_interval(),
                    max_attempts: self.config.max_poll_attempts,
                });
            if let Some(base_url) = self.jimeng_base_url.as_deref() {
                tasks = tasks.with_base_url(base_url);
            }
            return Ok(Some(JimengVariant::Async(tasks)));
        }
        if let Some(settings) = self.settings.ark.as_ref() {
            let ark = ArkImages::from_settings(settings)?.with_http_client(self.http.clone());
            return Ok(Some(JimengVariant::Sync(ark)));
        }
        Ok(None)
    }
}

enum JimengVariant {
    Async(JimengTasks),
    Sync(ArkImages),
}

impl std::fmt::Debug for PortraitHttpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortraitHttpState")
            .field("settings", &self.settings)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

pub fn router(state: PortraitHttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/image", get(handle_image))
        .route("/api/imagen", post(handle_imagen))
        .route("/api/jimeng", post(handle_jimeng))
        .route("/api/deepseek", post(handle_deepseek))
        .route("/api/portrait", post(handle_portrait))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    message: String,
}

fn json_error(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                message: message.to_string(),
            },
        }),
    )
        .into_response()
}

fn plain(status: StatusCode, message: &'static str) -> Response {
    (status, message).into_response()
}

fn raw_json(status: StatusCode, body: impl Into<axum::body::Body>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body.into(),
    )
        .into_response()
}

fn error_response(err: &PortraitError) -> Response {
    match err {
        PortraitError::Config(message) => json_error(StatusCode::INTERNAL_SERVER_ERROR, message),
        PortraitError::InvalidInput(message) => json_error(StatusCode::BAD_REQUEST, message),
        PortraitError::Upstream { status, body } => raw_json(*status, body.clone()),
        PortraitError::Timeout { .. } => json_error(StatusCode::GATEWAY_TIMEOUT, err),
        PortraitError::Http(_) => json_error(StatusCode::BAD_GATEWAY, err),
        _ => json_error(StatusCode::INTERNAL_SERVER_ERROR, err),
    }
}

/// Relays status, content type and body of an upstream response unchanged.
async fn relay_response(response: reqwest::Response, default_content_type: Option<&str>) -> Response {
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .or_else(|| default_content_type.and_then(|ct| HeaderValue::from_str(ct).ok()));
    let body = match read_capped(response).await {
        Ok(body) => body,
        Err(err) => return error_response(&err),
    };

    let mut out = (status, body).into_response();
    if let Some(content_type) = content_type {
        out.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    out
}

async fn read_capped(response: reqwest::Response) -> Result<Bytes> {
    let body = response.bytes().await?;
    if body.len() > MAX_RESPONSE_BODY_BYTES {
        return Err(PortraitError::Protocol(format!(
            "upstream body exceeds {MAX_RESPONSE_BODY_BYTES} bytes"
        )));
    }
    Ok(body)
}

fn body_json(body: &Bytes) -> Value {
    std::str::from_utf8(body)
        .ok()
        .and_then(parse_json_lenient)
        .unwrap_or_else(|| json!({}))
}

fn prompt_of(payload: &Value) -> Option<String> {
    payload
        .get("prompt")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|prompt| !prompt.is_empty())
        .map(str::to_string)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct ImageQuery {
    url: Option<String>,
}

async fn handle_image(
    State(state): State<PortraitHttpState>,
    Query(query): Query<ImageQuery>,
) -> Response {
    let Some(target) = query.url.filter(|url| !url.trim().is_empty()) else {
        return plain(StatusCode::BAD_REQUEST, "Missing url");
    };
    let Ok(parsed) = reqwest::Url::parse(target.trim()) else {
        return plain(StatusCode::BAD_REQUEST, "Invalid url");
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return plain(StatusCode::BAD_REQUEST, "Invalid protocol");
    }

    match state.http.get(parsed).send().await {
        Ok(response) => relay_response(response, None).await,
        Err(err) => {
            tracing::warn!(error = %err, "image fetch failed");
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Image fetch failed")
        }
    }
}

async fn handle_imagen(State(state): State<PortraitHttpState>, body: Bytes) -> Response {
    let primary = match state.settings.require_primary() {
        Ok(primary) => primary,
        Err(err) => return error_response(&err),
    };

    let payload = body_json(&body);
    let req = state
        .http
        .post(&primary.api_url)
        .header("x-goog-api-key", &primary.api_key)
        .json(&payload);
    match req.send().await {
        Ok(response) => relay_response(response, Some("application/json")).await,
        Err(err) => error_response(&PortraitError::Http(err)),
    }
}

#[derive(Debug, Default, Deserialize)]
struct JimengQuery {
    debug: Option<String>,
}

async fn handle_jimeng(
    State(state): State<PortraitHttpState>,
    Query(query): Query<JimengQuery>,
    body: Bytes,
) -> Response {
    let Some(variant) = state.jimeng.as_deref() else {
        return error_response(&PortraitError::missing_config("Jimeng"));
    };

    let payload = body_json(&body);
    let Some(prompt) = prompt_of(&payload) else {
        return plain(StatusCode::BAD_REQUEST, "Missing prompt");
    };

    match variant {
        JimengVariant::Async(tasks) => {
            jimeng_async(tasks, &prompt, query.debug.as_deref() == Some("1")).await
        }
        JimengVariant::Sync(ark) => ark_sync(ark, prompt, payload).await,
    }
}

async fn jimeng_async(tasks: &JimengTasks, prompt: &str, debug: bool) -> Response {
    let (task, envelope) = match tasks.submit_traced(prompt).await {
        Ok(submitted) => submitted,
        Err(err) => return jimeng_error(&err),
    };
    let images = match tasks.wait(task).await {
        Ok(images) => images,
        Err(err) => return jimeng_error(&err),
    };

    let mut out = json!({});
    if let Some(data) = images.image_base64 {
        out["image_base64"] = Value::String(data);
    }
    if let Some(url) = images.image_url {
        out["image_url"] = Value::String(url);
    }
    if debug {
        out["debug"] = json!({
            "x_date": envelope.x_date,
            "payload_hash": envelope.payload_hash,
            "signature": envelope.signature,
            "canonical_request_hash": envelope.canonical_request_hash(),
            "string_to_sign_hash": envelope.string_to_sign_hash(),
        });
    }
    (StatusCode::OK, Json(out)).into_response()
}

fn jimeng_error(err: &PortraitError) -> Response {
    tracing::warn!(error = %err, "async image task failed");
    match err {
        PortraitError::Timeout { .. } => json_error(StatusCode::GATEWAY_TIMEOUT, "Jimeng timeout"),
        PortraitError::TaskFailed { .. } => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Task expired")
        }
        _ => error_response(err),
    }
}

async fn ark_sync(ark: &ArkImages, prompt: String, payload: Value) -> Response {
    let request = match GenerationRequest::new(prompt) {
        Ok(request) => request.with_options(payload),
        Err(err) => return error_response(&err),
    };
    match ark.generate(&request).await {
        Ok(ProviderResult::Url { url }) => Json(json!({ "image_url": url })).into_response(),
        Ok(ProviderResult::Base64 { data, .. }) => {
            Json(json!({ "image_base64": data })).into_response()
        }
        Err(PortraitError::Protocol(message)) => {
            tracing::warn!(error = %message, "ark returned no image");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Empty result")
        }
        Err(err) => error_response(&err),
    }
}

async fn handle_deepseek(State(state): State<PortraitHttpState>, body: Bytes) -> Response {
    let deepseek = match state.settings.require_deepseek() {
        Ok(deepseek) => deepseek,
        Err(err) => return error_response(&err),
    };

    let req = state
        .http
        .post(&deepseek.api_url)
        .bearer_auth(&deepseek.api_key)
        .json(&body_json(&body));
    match req.send().await {
        Ok(response) => relay_response(response, Some("application/json")).await,
        Err(err) => error_response(&PortraitError::Http(err)),
    }
}

#[derive(Debug, Default, Deserialize)]
struct PortraitBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

#[derive(Debug, Serialize)]
struct PortraitResponse {
    image: String,
    kind: &'static str,
    stage: crate::orchestrator::Stage,
    backend: String,
}

async fn handle_portrait(State(state): State<PortraitHttpState>, body: Bytes) -> Response {
    let payload: PortraitBody = serde_json::from_slice(&body).unwrap_or_default();
    let prompt = payload
        .prompt
        .filter(|prompt| !prompt.trim().is_empty())
        .or_else(|| {
            payload
                .name
                .filter(|name| !name.trim().is_empty())
                .map(|name| portrait_prompt(&name))
        });
    let Some(prompt) = prompt else {
        return plain(StatusCode::BAD_REQUEST, "Missing prompt");
    };

    let outcome = run_portrait(&state, prompt).await;

    match outcome {
        Ok(outcome) => Json(PortraitResponse {
            image: outcome.image.display_ref(),
            kind: outcome.image.kind(),
            stage: outcome.stage,
            backend: outcome.backend,
        })
        .into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "portrait generation failed");
            error_response(&err)
        }
    }
}

async fn run_portrait(
    state: &PortraitHttpState,
    prompt: String,
) -> Result<crate::orchestrator::PortraitOutcome> {
    let orchestrator = state
        .portrait
        .as_deref()
        .ok_or_else(|| PortraitError::missing_config("API"))?;
    let request = GenerationRequest::new(prompt)?;
    orchestrator.generate(&request).await
}
