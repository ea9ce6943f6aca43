use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::{VolcCredentials, VolcSigner};
use crate::env::Env;
use crate::{PortraitError, Result};

pub const DEFAULT_ARK_API_URL: &str = "https://ark.cn-beijing.volces.com/api/v3/images/generations";
pub const DEFAULT_ARK_MODEL: &str = "doubao-seedream-4-5-251128";
pub const DEFAULT_ARK_SIZE: &str = "2K";
pub const DEFAULT_JIMENG_HOST: &str = "visual.volcengineapi.com";
pub const DEFAULT_JIMENG_REGION: &str = "cn-north-1";
pub const DEFAULT_JIMENG_SERVICE: &str = "cv";
pub const DEFAULT_DEEPSEEK_API_URL: &str = "https://api.deepseek.com/chat/completions";
pub const DEFAULT_DEGRADED_BASE_URL: &str =
    "https://copilot-cn.bytedance.net/api/ide/v1/text_to_image";
pub const DEFAULT_DEGRADED_IMAGE_SIZE: &str = "portrait_4_3";

const PRIMARY_KEY_ENV: &[&str] = &["VITE_NANO_BANANA_API_KEY", "NANO_BANANA_API_KEY"];
const PRIMARY_URL_ENV: &[&str] = &["VITE_NANO_BANANA_API_URL", "NANO_BANANA_API_URL"];
const ARK_KEY_ENV: &[&str] = &[
    "ARK_API_KEY",
    "VOLC_ARK_API_KEY",
    "VITE_ARK_API_KEY",
    "VITE_NANO_BANANA_API_KEY",
];
const ARK_URL_ENV: &[&str] = &["ARK_API_URL", "VOLC_ARK_API_URL"];
const ARK_MODEL_ENV: &[&str] = &["ARK_IMAGE_MODEL", "VOLC_IMAGE_MODEL"];
const ARK_SIZE_ENV: &[&str] = &["ARK_IMAGE_SIZE", "VOLC_IMAGE_SIZE"];
const JIMENG_ACCESS_KEY_ENV: &[&str] = &[
    "VITE_JIMENG_ACCESS_KEY",
    "JIMENG_ACCESS_KEY",
    "VOLC_ACCESS_KEY",
];
const JIMENG_SECRET_KEY_ENV: &[&str] = &[
    "VITE_JIMENG_SECRET_KEY",
    "JIMENG_SECRET_KEY",
    "VOLC_SECRET_KEY",
];
const JIMENG_HOST_ENV: &[&str] = &["JIMENG_HOST", "VOLC_HOST"];
const JIMENG_REGION_ENV: &[&str] = &["JIMENG_REGION", "VOLC_REGION"];
const JIMENG_SERVICE_ENV: &[&str] = &["JIMENG_SERVICE", "VOLC_SERVICE"];
const DEEPSEEK_KEY_ENV: &[&str] = &["DEEPSEEK_API_KEY", "VITE_DEEPSEEK_API_KEY"];
const DEEPSEEK_URL_ENV: &[&str] = &["DEEPSEEK_API_URL"];

/// Primary multimodal image API. Both fields are required.
#[derive(Clone)]
pub struct PrimarySettings {
    pub api_key: String,
    pub api_url: String,
}

#[derive(Clone)]
pub struct ArkSettings {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub size: String,
}

#[derive(Clone)]
pub struct JimengSettings {
    pub access_key: String,
    pub secret_key: String,
    pub host: String,
    pub region: String,
    pub service: String,
}

impl JimengSettings {
    pub fn signer(&self) -> Result<VolcSigner> {
        let credentials = VolcCredentials::new(&self.access_key, &self.secret_key)?;
        VolcSigner::new(credentials, &self.host, &self.region, &self.service)
    }
}

#[derive(Clone)]
pub struct DeepSeekSettings {
    pub api_key: String,
    pub api_url: String,
}

/// Every provider block the process knows about, read once at startup.
/// A `None` block means its required keys were absent.
#[derive(Clone, Default)]
pub struct ProviderSettings {
    pub primary: Option<PrimarySettings>,
    pub ark: Option<ArkSettings>,
    pub jimeng: Option<JimengSettings>,
    pub deepseek: Option<DeepSeekSettings>,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("primary", &self.primary.as_ref().map(|p| p.api_url.as_str()))
            .field("ark", &self.ark.as_ref().map(|a| a.model.as_str()))
            .field("jimeng", &self.jimeng.as_ref().map(|j| j.host.as_str()))
            .field("deepseek", &self.deepseek.as_ref().map(|d| d.api_url.as_str()))
            .finish()
    }
}

impl ProviderSettings {
    pub fn from_env(env: &Env) -> Self {
        let primary = match (env.first(PRIMARY_KEY_ENV), env.first(PRIMARY_URL_ENV)) {
            (Some(api_key), Some(api_url)) => Some(PrimarySettings { api_key, api_url }),
            _ => None,
        };

        let ark = env.first(ARK_KEY_ENV).map(|api_key| ArkSettings {
            api_key,
            api_url: env
                .first(ARK_URL_ENV)
                .unwrap_or_else(|| DEFAULT_ARK_API_URL.to_string()),
            model: env
                .first(ARK_MODEL_ENV)
                .unwrap_or_else(|| DEFAULT_ARK_MODEL.to_string()),
            size: env
                .first(ARK_SIZE_ENV)
                .unwrap_or_else(|| DEFAULT_ARK_SIZE.to_string()),
        });

        let jimeng = match (
            env.first(JIMENG_ACCESS_KEY_ENV),
            env.first(JIMENG_SECRET_KEY_ENV),
        ) {
            (Some(access_key), Some(secret_key)) => Some(JimengSettings {
                access_key,
                secret_key,
                host: env
                    .first(JIMENG_HOST_ENV)
                    .unwrap_or_else(|| DEFAULT_JIMENG_HOST.to_string()),
                region: env
                    .first(JIMENG_REGION_ENV)
                    .unwrap_or_else(|| DEFAULT_JIMENG_REGION.to_string()),
                service: env
                    .first(JIMENG_SERVICE_ENV)
                    .unwrap_or_else(|| DEFAULT_JIMENG_SERVICE.to_string()),
            }),
            _ => None,
        };

        let deepseek = env.first(DEEPSEEK_KEY_ENV).map(|api_key| DeepSeekSettings {
            api_key,
            api_url: env
                .first(DEEPSEEK_URL_ENV)
                .unwrap_or_else(|| DEFAULT_DEEPSEEK_API_URL.to_string()),
        });

        Self {
            primary,
            ark,
            jimeng,
            deepseek,
        }
    }

    pub fn require_primary(&self) -> Result<&PrimarySettings> {
        self.primary
            .as_ref()
            .ok_or_else(|| PortraitError::missing_config("API"))
    }

    pub fn require_ark(&self) -> Result<&ArkSettings> {
        self.ark
            .as_ref()
            .ok_or_else(|| PortraitError::missing_config("Ark"))
    }

    pub fn require_jimeng(&self) -> Result<&JimengSettings> {
        self.jimeng
            .as_ref()
            .ok_or_else(|| PortraitError::missing_config("Jimeng"))
    }

    pub fn require_deepseek(&self) -> Result<&DeepSeekSettings> {
        self.deepseek
            .as_ref()
            .ok_or_else(|| PortraitError::missing_config("DeepSeek"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradedConfig {
    pub enabled: bool,
    pub base_url: String,
    pub image_size: String,
    pub cache_bust: bool,
}

impl Default for DegradedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: DEFAULT_DEGRADED_BASE_URL.to_string(),
            image_size: DEFAULT_DEGRADED_IMAGE_SIZE.to_string(),
            cache_bust: true,
        }
    }
}

/// Process tuning, optionally loaded from a TOML file. Secrets never live here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub request_timeout_secs: Option<u64>,
    pub degraded: DegradedConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8787".to_string(),
            poll_interval_ms: 1200,
            max_poll_attempts: 20,
            request_timeout_secs: None,
            degraded: DegradedConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|err| PortraitError::Config(format!("invalid server config: {err}")))?;
        if config.max_poll_attempts == 0 {
            return Err(PortraitError::Config(
                "max_poll_attempts must be > 0".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}
