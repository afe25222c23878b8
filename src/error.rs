use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid YouTube URL: {0}")]
    InvalidUrl(String),

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("no transcript available for video {0}")]
    TranscriptUnavailable(String),

    #[error("YouTube API quota exceeded")]
    QuotaExceeded,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Upstream hiccups that a stale cache entry can paper over.
    pub fn allows_stale_fallback(&self) -> bool {
        matches!(self, AppError::Upstream(_) | AppError::QuotaExceeded)
    }

    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            AppError::Upstream(_)
                | AppError::QuotaExceeded
                | AppError::TranscriptUnavailable(_)
                | AppError::NotFound(_)
                | AppError::ChannelNotFound(_)
        )
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::Upstream(format!("request timed out: {e}"))
        } else {
            AppError::Upstream(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
