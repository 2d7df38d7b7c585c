use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CmxError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    #[error("busy: {0}")]
    Busy(&'static str),

    #[error("internal inconsistency: {0}")]
    Internal(&'static str),
}

pub type Result<T> = std::result::Result<T, CmxError>;
