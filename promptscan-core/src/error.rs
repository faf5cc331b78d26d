use thiserror::Error;

/// Core error type for the PromptScan SDK.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum PromptScanError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("No API Key was provided")]
    MissingApiKey,

    #[error("rate limited by collector")]
    RateLimited { retry_after: Option<u64> },

    #[error("collector unavailable: {endpoint}")]
    Unavailable { endpoint: String },

    #[error("collector returned {code}: {message}")]
    Http { code: String, message: String },

    #[error("graphql error: {0}")]
    GraphQl(String),

    #[error("No data received from the server")]
    NoData,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PromptScanError {
    /// True for failures worth another attempt on the next flush.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Unavailable { .. } | Self::NoData
        )
    }
}

pub type CoreResult<T> = std::result::Result<T, PromptScanError>;
