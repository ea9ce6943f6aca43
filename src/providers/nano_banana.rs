use async_trait::async_trait;
use serde_json::{Value, json};

use crate::config::PrimarySettings;
use crate::image::ImageBackend;
use crate::providers::extract::extract_inline_image;
use crate::types::{GenerationRequest, ProviderResult};
use crate::utils::http::{build_http_client, preview, send_checked_json};
use crate::{PortraitError, Result};

const DEFAULT_ASPECT_RATIO: &str = "3:4";

/// Primary multimodal generate-content API. Points either at the upstream
/// endpoint (with `x-goog-api-key`) or at a relay that injects the key.
#[derive(Clone)]
pub struct NanoBanana {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl NanoBanana {
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: build_http_client(None)?,
            api_url: api_url.into(),
            api_key: None,
        })
    }

    pub fn from_settings(settings: &PrimarySettings) -> Result<Self> {
        Ok(Self::new(&settings.api_url)?.with_api_key(&settings.api_key))
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.trim().is_empty()).then_some(api_key);
        self
    }

    fn body(&self, request: &GenerationRequest) -> Value {
        let aspect_ratio = request
            .option("aspect_ratio")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_ASPECT_RATIO);
        json!({
            "contents": [{ "parts": [{ "text": request.prompt() }] }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": { "aspectRatio": aspect_ratio }
            }
        })
    }
}

#[async_trait]
impl ImageBackend for NanoBanana {
    fn name(&self) -> &str {
        "nano-banana"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderResult> {
        if self.api_url.trim().is_empty() {
            return Err(PortraitError::missing_config("API"));
        }

        let mut req = self.http.post(&self.api_url).json(&self.body(request));
        if let Some(api_key) = self.api_key.as_deref() {
            req = req.header("x-goog-api-key", api_key);
        }

        let (value, text) = send_checked_json(req).await?;
        extract_inline_image(&value).ok_or_else(|| {
            PortraitError::Protocol(format!("no image data in response: {}", preview(&text)))
        })
    }
}
