use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Language or payload absent from the request.
    #[error("Invalid input")]
    MissingInput,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported language")]
    UnsupportedLanguage(String),

    #[error("no sandbox slot available within {0:?}")]
    PoolExhausted(Duration),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] sandbox::SandboxError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Rejections happen before any sandbox is touched and carry no result.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::MissingInput | Self::InvalidInput(_) | Self::UnsupportedLanguage(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
