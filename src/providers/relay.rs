use async_trait::async_trait;
use serde_json::json;

use crate::image::ImageBackend;
use crate::providers::extract::extract_image;
use crate::types::{GenerationRequest, ProviderResult};
use crate::utils::http::{build_http_client, preview, send_checked_json};
use crate::{PortraitError, Result};

/// Client side of a server relay route such as `/api/jimeng`: posts
/// `{prompt}` and reads back `{image_base64?, image_url?}`. The relay holds
/// the credentials, so nothing secret passes through here.
#[derive(Clone)]
pub struct RelayImages {
    http: reqwest::Client,
    name: String,
    url: String,
}

impl RelayImages {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: build_http_client(None)?,
            name: name.into(),
            url: url.into(),
        })
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }
}

#[async_trait]
impl ImageBackend for RelayImages {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderResult> {
        let mut body = json!({ "prompt": request.prompt() });
        if let (Some(target), Some(options)) = (
            body.as_object_mut(),
            request.options().and_then(|options| options.as_object()),
        ) {
            for (key, value) in options {
                target.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        let (value, text) = send_checked_json(self.http.post(&self.url).json(&body)).await?;
        // Relays answer with both fields when they have both; the inline
        // payload avoids a second cross-origin fetch.
        if let Some(data) = crate::providers::extract::non_empty_str(value.get("image_base64")) {
            return Ok(ProviderResult::base64(data));
        }
        extract_image(&value).ok_or_else(|| {
            PortraitError::Protocol(format!("relay returned no image: {}", preview(&text)))
        })
    }
}
