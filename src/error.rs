use thiserror::Error;

/// Failure classes that cross the crate's public seams. Fetch, parse and
/// hardware failures never surface here: they are absorbed in place by the
/// cache fallback, the empty-result parse contract, and the verification
/// retry loop.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl AppError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }
}

pub type AppResult<T> = Result<T, AppError>;
