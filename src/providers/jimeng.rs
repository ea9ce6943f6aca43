use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use crate::auth::{SignedEnvelope, VolcSigner, canonical_query};
use crate::config::JimengSettings;
use crate::image::ImageBackend;
use crate::providers::extract::non_empty_str;
use crate::types::{GenerationRequest, ProviderResult};
use crate::utils::http::{
    MAX_ERROR_BODY_BYTES, MAX_RESPONSE_BODY_BYTES, build_http_client, parse_json_lenient,
    preview, read_json_body, response_text_truncated,
};
use crate::{PortraitError, Result};

pub const SUBMIT_ACTION: &str = "CVSync2AsyncSubmitTask";
pub const RESULT_ACTION: &str = "CVSync2AsyncGetResult";
pub const API_VERSION: &str = "2022-08-31";
pub const DEFAULT_REQ_KEY: &str = "jimeng_t2i_v40";

const OUTPUT_WIDTH: u32 = 1728;
const OUTPUT_HEIGHT: u32 = 2304;
const OUTPUT_SCALE: f64 = 0.5;

/// Fixed-interval polling with a hard attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1200),
            max_attempts: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Done,
    Expired,
    NotFound,
}

impl TaskStatus {
    /// Absent and unrecognized statuses read as still pending.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("done") => Self::Done,
            Some("expired") => Self::Expired,
            Some("not_found") => Self::NotFound,
            _ => Self::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Expired => "expired",
            Self::NotFound => "not_found",
        }
    }
}

/// A submitted job. Only polling changes its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncTask {
    pub task_id: String,
    pub status: TaskStatus,
}

/// Images from a finished task. At least one field is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskImages {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl TaskImages {
    /// Inline payload first; the URL only when no payload came back.
    pub fn into_result(self) -> Result<ProviderResult> {
        match (self.image_base64, self.image_url) {
            (Some(data), _) => Ok(ProviderResult::base64(data)),
            (None, Some(url)) => Ok(ProviderResult::url(url)),
            (None, None) => Err(PortraitError::Protocol("Empty result".to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Done(TaskImages),
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    req_key: &'a str,
    prompt: &'a str,
    force_single: bool,
    width: u32,
    height: u32,
    scale: f64,
}

#[derive(Serialize)]
struct ResultBody<'a> {
    req_key: &'a str,
    task_id: &'a str,
    req_json: String,
}

/// Submit/poll client for the signed asynchronous text-to-image API.
/// Every request, including each poll, carries a freshly signed envelope.
#[derive(Clone)]
pub struct JimengTasks {
    http: reqwest::Client,
    signer: VolcSigner,
    base_url: String,
    policy: PollPolicy,
}

impl JimengTasks {
    pub fn new(signer: VolcSigner) -> Result<Self> {
        let base_url = format!("https://{}", signer.host());
        Ok(Self {
            http: build_http_client(None)?,
            signer,
            base_url,
            policy: PollPolicy::default(),
        })
    }

    pub fn from_settings(settings: &JimengSettings) -> Result<Self> {
        Self::new(settings.signer()?)
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Overrides where requests go. The signed `host` stays the signer's.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.policy
    }

    fn action_query(action: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("Action".to_string(), action.to_string()),
            ("Version".to_string(), API_VERSION.to_string()),
        ])
    }

    async fn post_signed(
        &self,
        query: &BTreeMap<String, String>,
        body: String,
    ) -> Result<(reqwest::Response, SignedEnvelope)> {
        let envelope = self.signer.sign_now(&body, query)?;
        let url = format!(
            "{}/?{}",
            self.base_url.trim_end_matches('/'),
            canonical_query(query)
        );
        let req = envelope.apply(self.http.post(url)).body(body);
        let response = req.send().await?;
        Ok((response, envelope))
    }

    pub async fn submit(&self, prompt: &str) -> Result<AsyncTask> {
        Ok(self.submit_traced(prompt).await?.0)
    }

    /// Like [`submit`](Self::submit), also returning the envelope that
    /// signed the submit call.
    pub async fn submit_traced(&self, prompt: &str) -> Result<(AsyncTask, SignedEnvelope)> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(PortraitError::InvalidInput(
                "prompt must be non-empty".to_string(),
            ));
        }

        let body = serde_json::to_string(&SubmitBody {
            req_key: DEFAULT_REQ_KEY,
            prompt,
            force_single: true,
            width: OUTPUT_WIDTH,
            height: OUTPUT_HEIGHT,
            scale: OUTPUT_SCALE,
        })?;
        let (response, envelope) = self
            .post_signed(&Self::action_query(SUBMIT_ACTION), body)
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response_text_truncated(response, MAX_ERROR_BODY_BYTES).await;
            return Err(PortraitError::Upstream { status, body });
        }
        let (value, text) = read_json_body(response).await?;

        let task_id = value
            .get("data")
            .and_then(|data| data.get("task_id"))
            .and_then(|id| match id {
                Value::String(id) => Some(id.trim().to_string()),
                Value::Number(id) => Some(id.to_string()),
                _ => None,
            })
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                PortraitError::Protocol(format!("Missing task_id: {}", preview(&text)))
            })?;

        tracing::info!(task_id = %task_id, "submitted async image task");
        Ok((
            AsyncTask {
                task_id,
                status: TaskStatus::Pending,
            },
            envelope,
        ))
    }

    /// One signed status check. Updates `task.status`.
    pub async fn poll_once(&self, task: &mut AsyncTask) -> Result<PollOutcome> {
        let body = serde_json::to_string(&ResultBody {
            req_key: DEFAULT_REQ_KEY,
            task_id: &task.task_id,
            req_json: json!({ "return_url": false }).to_string(),
        })?;
        let (response, _) = self
            .post_signed(&Self::action_query(RESULT_ACTION), body)
            .await?;

        let status_code = response.status();
        let text = response_text_truncated(response, MAX_RESPONSE_BODY_BYTES).await;
        if !status_code.is_success() {
            tracing::warn!(
                task_id = %task.task_id,
                status = %status_code,
                body = %preview(&text),
                "status check rejected; treating task as pending"
            );
        }
        let value = parse_json_lenient(&text).unwrap_or(Value::Null);
        let data = value.get("data");

        task.status = TaskStatus::parse(data.and_then(|d| d.get("status")).and_then(Value::as_str));
        match task.status {
            TaskStatus::Done => {
                let first = |key: &str| {
                    data.and_then(|d| d.get(key))
                        .and_then(Value::as_array)
                        .and_then(|items| non_empty_str(items.first()))
                        .map(str::to_string)
                };
                let images = TaskImages {
                    image_base64: first("binary_data_base64"),
                    image_url: first("image_urls"),
                };
                if images.image_base64.is_none() && images.image_url.is_none() {
                    return Err(PortraitError::Protocol(format!(
                        "Empty result: {}",
                        preview(&text)
                    )));
                }
                Ok(PollOutcome::Done(images))
            }
            TaskStatus::Expired | TaskStatus::NotFound => Err(PortraitError::TaskFailed {
                task_id: task.task_id.clone(),
                status: task.status.as_str().to_string(),
            }),
            TaskStatus::Pending => Ok(PollOutcome::Pending),
        }
    }

    /// Polls until a terminal status or until the attempt budget runs out.
    pub async fn wait(&self, mut task: AsyncTask) -> Result<TaskImages> {
        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            tracing::debug!(task_id = %task.task_id, attempt, max_attempts, "polling async image task");
            if let PollOutcome::Done(images) = self.poll_once(&mut task).await? {
                return Ok(images);
            }
            if attempt < max_attempts {
                tokio::time::sleep(self.policy.interval).await;
            }
        }
        Err(PortraitError::Timeout {
            task_id: task.task_id,
            attempts: max_attempts,
        })
    }

    pub async fn run(&self, prompt: &str) -> Result<TaskImages> {
        let task = self.submit(prompt).await?;
        self.wait(task).await
    }
}

#[async_trait]
impl ImageBackend for JimengTasks {
    fn name(&self) -> &str {
        "jimeng"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderResult> {
        self.run(request.prompt()).await?.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_statuses_are_pending() {
        assert_eq!(TaskStatus::parse(Some("done")), TaskStatus::Done);
        assert_eq!(TaskStatus::parse(Some("expired")), TaskStatus::Expired);
        assert_eq!(TaskStatus::parse(Some("not_found")), TaskStatus::NotFound);
        assert_eq!(TaskStatus::parse(Some("in_queue")), TaskStatus::Pending);
        assert_eq!(TaskStatus::parse(Some("generating")), TaskStatus::Pending);
        assert_eq!(TaskStatus::parse(None), TaskStatus::Pending);
    }

    #[test]
    fn task_images_prefer_inline_payload() -> Result<()> {
        let both = TaskImages {
            image_base64: Some("aGk=".to_string()),
            image_url: Some("https://img.example/a.png".to_string()),
        };
        assert_eq!(both.into_result()?, ProviderResult::base64("aGk="));

        let url_only = TaskImages {
            image_base64: None,
            image_url: Some("https://img.example/a.png".to_string()),
        };
        assert_eq!(
            url_only.into_result()?,
            ProviderResult::url("https://img.example/a.png")
        );
        Ok(())
    }

    #[test]
    fn default_policy_is_twenty_attempts_at_1200ms() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_millis(1200));
        assert_eq!(policy.max_attempts, 20);
    }

    #[test]
    fn submit_body_has_fixed_shape() -> Result<()> {
        let body = serde_json::to_string(&SubmitBody {
            req_key: DEFAULT_REQ_KEY,
            prompt: "Ada",
            force_single: true,
            width: OUTPUT_WIDTH,
            height: OUTPUT_HEIGHT,
            scale: OUTPUT_SCALE,
        })?;
        assert_eq!(
            body,
            r#"{"req_key":"jimeng_t2i_v40","prompt":"Ada","force_single":true,"width":1728,"height":2304,"scale":0.5}"#
        );
        Ok(())
    }
}
