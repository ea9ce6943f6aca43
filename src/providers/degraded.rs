use async_trait::async_trait;
use time::OffsetDateTime;

use crate::auth::encode_rfc3986;
use crate::config::{DEFAULT_DEGRADED_BASE_URL, DEFAULT_DEGRADED_IMAGE_SIZE, DegradedConfig};
use crate::image::ImageBackend;
use crate::types::{GenerationRequest, ProviderResult};
use crate::Result;

/// Last-resort portrait: a public text-to-image URL built from the prompt.
/// Pure string construction, so it cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradedFallback {
    base_url: String,
    image_size: String,
    cache_bust: bool,
}

impl Default for DegradedFallback {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_DEGRADED_BASE_URL.to_string(),
            image_size: DEFAULT_DEGRADED_IMAGE_SIZE.to_string(),
            cache_bust: true,
        }
    }
}

impl DegradedFallback {
    pub fn from_config(config: &DegradedConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            image_size: config.image_size.clone(),
            cache_bust: config.cache_bust,
        }
    }

    pub fn with_cache_bust(mut self, cache_bust: bool) -> Self {
        self.cache_bust = cache_bust;
        self
    }

    /// Stable part of the URL; identical for identical prompts.
    pub fn base_url_for(&self, prompt: &str) -> String {
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}prompt={}&image_size={}",
            self.base_url,
            separator,
            encode_rfc3986(prompt),
            encode_rfc3986(&self.image_size)
        )
    }

    pub fn url_for(&self, prompt: &str) -> String {
        let base = self.base_url_for(prompt);
        if !self.cache_bust {
            return base;
        }
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        format!("{base}&t={millis}")
    }

    pub fn result_for(&self, prompt: &str) -> ProviderResult {
        ProviderResult::url(self.url_for(prompt))
    }
}

#[async_trait]
impl ImageBackend for DegradedFallback {
    fn name(&self) -> &str {
        "degraded"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderResult> {
        Ok(self.result_for(request.prompt()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_prompt_against_fixed_endpoint() {
        let fallback = DegradedFallback::default().with_cache_bust(false);
        assert_eq!(
            fallback.url_for("Ada Lovelace"),
            "https://copilot-cn.bytedance.net/api/ide/v1/text_to_image?prompt=Ada%20Lovelace&image_size=portrait_4_3"
        );
    }

    #[test]
    fn cache_buster_only_appends_a_timestamp() {
        let fallback = DegradedFallback::default();
        let url = fallback.url_for("Ada Lovelace");
        let stable = fallback.base_url_for("Ada Lovelace");
        let suffix = url.strip_prefix(&stable).expect("stable prefix");
        let millis = suffix.strip_prefix("&t=").expect("timestamp param");
        assert!(millis.parse::<u128>().is_ok(), "{millis}");
    }

    #[test]
    fn encodes_reserved_and_non_ascii_characters() {
        let fallback = DegradedFallback::default().with_cache_bust(false);
        let url = fallback.url_for("爱因斯坦 & co?");
        assert!(url.contains("prompt=%E7%88%B1%E5%9B%A0%E6%96%AF%E5%9D%A6%20%26%20co%3F&"));
    }
}
