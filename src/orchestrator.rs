//! Portrait orchestration: one logical attempt per user action.
//!
//! ```text
//! Primary --ok--------------------------------------------> done
//!    | retryable failure            terminal failure -----> error
//!    v
//! Fallback[0..n] --first ok-------------------------------> done
//!    | every fallback failed (errors logged, never surfaced)
//!    v
//! Degraded (public URL built from the prompt) ------------> done
//! ```

use std::sync::Arc;

use serde::Serialize;

use crate::config::{ProviderSettings, ServerConfig};
use crate::image::{FailureClass, ImageBackend};
use crate::providers::{
    ArkImages, DegradedFallback, JimengTasks, NanoBanana, PollPolicy, RelayImages,
};
use crate::types::{GenerationRequest, ProviderResult};
use crate::utils::http::build_http_client;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Primary,
    Fallback,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortraitOutcome {
    pub image: ProviderResult,
    pub stage: Stage,
    pub backend: String,
}

pub struct PortraitOrchestrator {
    primary: Arc<dyn ImageBackend>,
    fallbacks: Vec<Arc<dyn ImageBackend>>,
    degraded: Option<DegradedFallback>,
}

impl PortraitOrchestrator {
    pub fn new(primary: Arc<dyn ImageBackend>) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            degraded: Some(DegradedFallback::default()),
        }
    }

    /// Appends a backend to the fallback chain; chain order is call order.
    pub fn with_fallback(mut self, backend: Arc<dyn ImageBackend>) -> Self {
        self.fallbacks.push(backend);
        self
    }

    pub fn with_degraded(mut self, degraded: Option<DegradedFallback>) -> Self {
        self.degraded = degraded;
        self
    }

    /// Server-side composition: the primary API is called directly, then the
    /// signed async provider, then Ark, for whichever of those are configured.
    pub fn from_settings(settings: &ProviderSettings, config: &ServerConfig) -> Result<Self> {
        let http = build_http_client(config.request_timeout())?;
        Self::from_settings_with_client(settings, config, http, None)
    }

    /// Like [`Self::from_settings`] but every adapter shares `http`, and
    /// `jimeng_base_url` replaces `https://<host>` for signed calls.
    pub fn from_settings_with_client(
        settings: &ProviderSettings,
        config: &ServerConfig,
        http: reqwest::Client,
        jimeng_base_url: Option<&str>,
    ) -> Result<Self> {
        let primary = NanoBanana::from_settings(settings.require_primary()?)?
            .with_http_client(http.clone());

        let mut orchestrator = Self::new(Arc::new(primary)).with_degraded(
            config
                .degraded
                .enabled
                .then(|| DegradedFallback::from_config(&config.degraded)),
        );
        if let Some(jimeng) = settings.jimeng.as_ref() {
            let mut tasks = JimengTasks::from_settings(jimeng)?
                .with_http_client(http.clone())
                .with_poll_policy(PollPolicy {
                    interval: config.poll_interval(),
                    max_attempts: config.max_poll_attempts,
                });
            if let Some(base_url) = jimeng_base_url {
                tasks = tasks.with_base_url(base_url);
            }
            orchestrator = orchestrator.with_fallback(Arc::new(tasks));
        }
        if let Some(ark) = settings.ark.as_ref() {
            let ark = ArkImages::from_settings(ark)?.with_http_client(http);
            orchestrator = orchestrator.with_fallback(Arc::new(ark));
        }
        Ok(orchestrator)
    }

    /// Client-side composition against a relay server exposing
    /// `/api/imagen` and `/api/jimeng`.
    pub fn via_relay(base_url: &str, config: &ServerConfig) -> Result<Self> {
        let http = build_http_client(config.request_timeout())?;
        let base = base_url.trim_end_matches('/');
        let primary =
            NanoBanana::new(format!("{base}/api/imagen"))?.with_http_client(http.clone());
        let relay = RelayImages::new("jimeng-relay", format!("{base}/api/jimeng"))?
            .with_http_client(http);
        Ok(Self::new(Arc::new(primary))
            .with_fallback(Arc::new(relay))
            .with_degraded(
                config
                    .degraded
                    .enabled
                    .then(|| DegradedFallback::from_config(&config.degraded)),
            ))
    }

    pub fn primary_name(&self) -> &str {
        self.primary.name()
    }

    pub fn fallback_names(&self) -> Vec<&str> {
        self.fallbacks.iter().map(|backend| backend.name()).collect()
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<PortraitOutcome> {
        let primary_err = match self.primary.generate(request).await {
            Ok(image) => {
                tracing::info!(backend = self.primary.name(), "portrait generated");
                return Ok(PortraitOutcome {
                    image,
                    stage: Stage::Primary,
                    backend: self.primary.name().to_string(),
                });
            }
            Err(err) => err,
        };

        if self.primary.classify(&primary_err) == FailureClass::Terminal {
            return Err(primary_err);
        }
        tracing::warn!(
            backend = self.primary.name(),
            error = %primary_err,
            "primary provider unavailable; falling back"
        );

        for backend in &self.fallbacks {
            match backend.generate(request).await {
                Ok(image) => {
                    tracing::info!(backend = backend.name(), "portrait generated by fallback");
                    return Ok(PortraitOutcome {
                        image,
                        stage: Stage::Fallback,
                        backend: backend.name().to_string(),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        backend = backend.name(),
                        error = %err,
                        "fallback provider failed"
                    );
                }
            }
        }

        match self.degraded.as_ref() {
            Some(degraded) => {
                tracing::info!("serving degraded portrait url");
                Ok(PortraitOutcome {
                    image: degraded.result_for(request.prompt()),
                    stage: Stage::Degraded,
                    backend: degraded.name().to_string(),
                })
            }
            None => Err(primary_err),
        }
    }
}

impl std::fmt::Debug for PortraitOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortraitOrchestrator")
            .field("primary", &self.primary.name())
            .field("fallbacks", &self.fallback_names())
            .field("degraded", &self.degraded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JimengSettings, PrimarySettings};

    fn primary_only() -> ProviderSettings {
        ProviderSettings {
            primary: Some(PrimarySettings {
                api_key: "pk".to_string(),
                api_url: "https://primary.example/gen".to_string(),
            }),
            ..ProviderSettings::default()
        }
    }

    #[test]
    fn from_settings_requires_primary() {
        let err = PortraitOrchestrator::from_settings(
            &ProviderSettings::default(),
            &ServerConfig::default(),
        )
        .expect_err("primary missing");
        assert!(matches!(err, crate::PortraitError::Config(_)));
    }

    #[test]
    fn from_settings_orders_async_provider_first() -> Result<()> {
        let mut settings = primary_only();
        settings.jimeng = Some(JimengSettings {
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            host: "visual.volcengineapi.com".to_string(),
            region: "cn-north-1".to_string(),
            service: "cv".to_string(),
        });
        settings.ark = Some(crate::config::ArkSettings {
            api_key: "ark".to_string(),
            api_url: "https://ark.example/gen".to_string(),
            model: "m".to_string(),
            size: "2K".to_string(),
        });

        let orchestrator = PortraitOrchestrator::from_settings(&settings, &ServerConfig::default())?;
        assert_eq!(orchestrator.primary_name(), "nano-banana");
        assert_eq!(orchestrator.fallback_names(), vec!["jimeng", "ark"]);
        Ok(())
    }

    #[test]
    fn via_relay_mirrors_browser_composition() -> Result<()> {
        let orchestrator =
            PortraitOrchestrator::via_relay("http://localhost:8787/", &ServerConfig::default())?;
        assert_eq!(orchestrator.fallback_names(), vec!["jimeng-relay"]);
        Ok(())
    }
}
