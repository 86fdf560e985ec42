use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the decision pipeline
///
/// Veto, risk and tier rejections are returned as data, never through this type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("feed error: {0}")]
    Feed(String),

    #[error("exchange error: {0}")]
    Exchange(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("position {0} not found")]
    PositionNotFound(Uuid),

    #[error("order {0} not found")]
    OrderNotFound(Uuid),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
