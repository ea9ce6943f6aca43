use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{PortraitError, Result};

/// A single portrait generation request. The prompt is trimmed and never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    prompt: String,
    options: Option<Value>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Result<Self> {
        let prompt = prompt.into();
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(PortraitError::InvalidInput(
                "prompt must be non-empty".to_string(),
            ));
        }
        Ok(Self {
            prompt: prompt.to_string(),
            options: None,
        })
    }

    /// Provider-specific fields; adapters merge the keys they understand.
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn options(&self) -> Option<&Value> {
        self.options.as_ref()
    }

    pub(crate) fn option(&self, key: &str) -> Option<&Value> {
        self.options
            .as_ref()
            .and_then(Value::as_object)
            .and_then(|obj| obj.get(key))
            .filter(|value| !value.is_null())
    }
}

/// Normalized adapter output: an inline base64 payload or a resolvable URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderResult {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

impl ProviderResult {
    pub fn base64(data: impl Into<String>) -> Self {
        Self::Base64 {
            media_type: "image/png".to_string(),
            data: data.into(),
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Base64 { .. } => "base64",
            Self::Url { .. } => "url",
        }
    }

    /// Reference an `<img>` can display: a data URI or the URL itself.
    pub fn display_ref(&self) -> String {
        match self {
            Self::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
            Self::Url { url } => url.clone(),
        }
    }

    /// Decoded image bytes; `None` for URL results.
    pub fn decode_bytes(&self) -> Option<Result<Vec<u8>>> {
        match self {
            Self::Base64 { data, .. } => Some(
                base64::engine::general_purpose::STANDARD
                    .decode(data.trim())
                    .map_err(|err| PortraitError::Protocol(format!("invalid base64 image: {err}"))),
            ),
            Self::Url { .. } => None,
        }
    }
}
