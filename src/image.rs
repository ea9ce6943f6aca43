use async_trait::async_trait;

use crate::types::{GenerationRequest, ProviderResult};
use crate::{PortraitError, Result};

/// How the orchestrator should treat a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The provider looks unavailable (quota, auth, outage, unreachable).
    Retryable,
    /// The request itself is wrong, or the provider broke its response contract.
    Terminal,
}

/// Default classifier: 429/401/403/5xx and connect/timeout failures are
/// retryable; other 4xx, protocol violations and config errors are not.
pub fn classify_failure(err: &PortraitError) -> FailureClass {
    match err {
        PortraitError::Upstream { status, .. } => {
            let code = status.as_u16();
            if code == 429 || code == 401 || code == 403 || code >= 500 {
                FailureClass::Retryable
            } else {
                FailureClass::Terminal
            }
        }
        err if err.is_network() => FailureClass::Retryable,
        _ => FailureClass::Terminal,
    }
}

#[async_trait]
pub trait ImageBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderResult>;

    /// Whether a failure from this backend should hand over to the next one.
    fn classify(&self, err: &PortraitError) -> FailureClass {
        classify_failure(err)
    }
}
