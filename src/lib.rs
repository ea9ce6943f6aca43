pub mod auth;
pub mod config;
mod env;
mod error;
pub mod image;
pub mod orchestrator;
pub mod poster;
pub mod providers;
pub mod quote;
pub mod types;
pub mod utils;

#[cfg(feature = "gateway")]
pub mod gateway;

pub use auth::{SignTimestamp, SignedEnvelope, VolcCredentials, VolcSigner};
pub use config::{DegradedConfig, ProviderSettings, ServerConfig};
pub use env::{Env, parse_dotenv};
pub use error::{PortraitError, Result};
pub use image::{FailureClass, ImageBackend, classify_failure};
pub use orchestrator::{PortraitOrchestrator, PortraitOutcome, Stage};
pub use poster::{ExportFormat, PosterContent, export_portrait_url, portrait_prompt, poster_filename};
pub use providers::{
    ArkImages, AsyncTask, DegradedFallback, JimengTasks, NanoBanana, PollOutcome, PollPolicy,
    RelayImages, TaskImages, TaskStatus,
};
pub use quote::QuoteClient;
pub use types::{GenerationRequest, ProviderResult};
