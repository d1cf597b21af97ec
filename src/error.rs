use thiserror::Error;

/// Errors raised by the feed pipeline and its collaborators.
///
/// Most of these never reach a caller of the pipeline: a failed feed or a
/// failed article page is logged and recovered where it happens. Only
/// `Registry` propagates out of a pipeline run.
#[derive(Debug, Error)]
pub enum NewsError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("feed registry unavailable: {0}")]
    Registry(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NewsError>;
