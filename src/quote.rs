use serde_json::{Value, json};

use crate::config::{DEFAULT_DEEPSEEK_API_URL, DeepSeekSettings};
use crate::utils::http::{build_http_client, preview, send_checked_json};
use crate::{PortraitError, Result};

const DEFAULT_MODEL: &str = "deepseek-chat";
const SYSTEM_PROMPT: &str = "You are a helpful assistant that provides famous quotes. When a user provides a name, you should return ONE famous quote by that person. Return ONLY the quote text in the response, without any introduction or quotation marks. If the person is Chinese, return the quote in Chinese. If the person is Western, return the quote in English.";

/// Looks up a famous quote for a name through a chat-completions API.
#[derive(Clone)]
pub struct QuoteClient {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

impl QuoteClient {
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: build_http_client(None)?,
            api_url: api_url.into(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn from_settings(settings: &DeepSeekSettings) -> Result<Self> {
        let api_url = if settings.api_url.trim().is_empty() {
            DEFAULT_DEEPSEEK_API_URL
        } else {
            settings.api_url.as_str()
        };
        Ok(Self::new(api_url)?.with_api_key(&settings.api_key))
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

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub(crate) fn body(&self, name: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": format!("Please provide a famous quote by {name}") }
            ]
        })
    }

    pub async fn generate_quote(&self, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PortraitError::InvalidInput("name must be non-empty".to_string()));
        }

        let mut req = self.http.post(&self.api_url).json(&self.body(name));
        if let Some(api_key) = self.api_key.as_deref() {
            req = req.bearer_auth(api_key);
        }
        let (value, text) = send_checked_json(req).await?;

        value
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|quote| !quote.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                PortraitError::Protocol(format!("No quote found in response: {}", preview(&text)))
            })
    }
}
