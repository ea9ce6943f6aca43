use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortraitError {
    #[error("config error: {0}")]
    Config(String),
    #[error("upstream error ({status}): {body}")]
    Upstream {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("task {task_id} failed with status {status}")]
    TaskFailed { task_id: String, status: String },
    #[error("task {task_id} still pending after {attempts} poll attempts")]
    Timeout { task_id: String, attempts: u32 },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
}

impl PortraitError {
    pub(crate) fn missing_config(what: &str) -> Self {
        Self::Config(format!("Missing {what} config"))
    }

    /// Transport failures where the provider never produced an HTTP status.
    pub fn is_network(&self) -> bool {
        match self {
            Self::Http(err) => err.is_connect() || err.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PortraitError>;
