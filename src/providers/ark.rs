use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::{ArkSettings, DEFAULT_ARK_API_URL, DEFAULT_ARK_MODEL, DEFAULT_ARK_SIZE};
use crate::image::ImageBackend;
use crate::providers::extract::extract_image;
use crate::types::{GenerationRequest, ProviderResult};
use crate::utils::http::{build_http_client, preview, send_checked_json};
use crate::{PortraitError, Result};

/// Request fields callers may override through `GenerationRequest` options.
const OVERRIDABLE: &[&str] = &[
    "sequential_image_generation",
    "response_format",
    "size",
    "stream",
    "watermark",
];

/// Direct synchronous image generation (Seedream on Ark), Bearer auth.
#[derive(Clone)]
pub struct ArkImages {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    size: String,
}

impl ArkImages {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(PortraitError::missing_config("Ark"));
        }
        Ok(Self {
            http: build_http_client(None)?,
            api_url: DEFAULT_ARK_API_URL.to_string(),
            api_key,
            model: DEFAULT_ARK_MODEL.to_string(),
            size: DEFAULT_ARK_SIZE.to_string(),
        })
    }

    pub fn from_settings(settings: &ArkSettings) -> Result<Self> {
        Ok(Self::new(&settings.api_key)?
            .with_api_url(&settings.api_url)
            .with_model(&settings.model)
            .with_size(&settings.size))
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    pub(crate) fn body(&self, request: &GenerationRequest) -> Map<String, Value> {
        let mut body = Map::<String, Value>::new();
        body.insert("model".to_string(), Value::String(self.model.clone()));
        body.insert(
            "prompt".to_string(),
            Value::String(request.prompt().to_string()),
        );
        body.insert(
            "sequential_image_generation".to_string(),
            Value::String("disabled".to_string()),
        );
        body.insert(
            "response_format".to_string(),
            Value::String("url".to_string()),
        );
        body.insert("size".to_string(), Value::String(self.size.clone()));
        body.insert("stream".to_string(), Value::Bool(false));
        body.insert("watermark".to_string(), Value::Bool(true));

        for key in OVERRIDABLE {
            if let Some(value) = request.option(key) {
                body.insert((*key).to_string(), value.clone());
            }
        }
        body
    }
}

#[async_trait]
impl ImageBackend for ArkImages {
    fn name(&self) -> &str {
        "ark"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderResult> {
        let req = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&self.body(request));
        let (value, text) = send_checked_json(req).await?;
        extract_image(&value).ok_or_else(|| {
            PortraitError::Protocol(format!("Empty result: {}", preview(&text)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_uses_defaults_and_accepts_overrides() -> Result<()> {
        let backend = ArkImages::new("key")?.with_size("1K");
        let request = GenerationRequest::new("Ada")?
            .with_options(json!({ "watermark": false, "model": "ignored" }));
        let body = Value::Object(backend.body(&request));
        assert_eq!(
            body,
            json!({
                "model": DEFAULT_ARK_MODEL,
                "prompt": "Ada",
                "sequential_image_generation": "disabled",
                "response_format": "url",
                "size": "1K",
                "stream": false,
                "watermark": false
            })
        );
        Ok(())
    }

    #[test]
    fn blank_key_is_config_error() {
        assert!(matches!(ArkImages::new(" "), Err(PortraitError::Config(_))));
    }
}
