use thiserror::Error;

pub type Result<T> = std::result::Result<T, SummarizeError>;

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("missing api key for summarization")]
    MissingApiKey,

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),
}

impl SummarizeError {
    /// Rate limits, upstream 5xx, and timeout-class failures are worth
    /// retrying; everything else propagates immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Server(_) | Self::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for SummarizeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Self::Timeout(e.to_string())
        } else {
            Self::Server(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SummarizeError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}
