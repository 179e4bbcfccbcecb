use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("camera fetch error: {0}")]
    Fetch(String),
    #[error("people counting error: {0}")]
    Count(String),
    #[error("routing error: {0}")]
    Routing(String),
    #[error("estimate store error: {0}")]
    Store(String),
    #[error("state lock poisoned")]
    StateLock,
}
