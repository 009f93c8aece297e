use thiserror::Error;

pub type PocketResult<T> = Result<T, PocketError>;

#[derive(Error, Debug)]
pub enum PocketError {
    /// Missing or malformed input fields (empty service name, non-positive
    /// amount, unknown billing cycle, ...).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown subscription, failed-payment, alert, or payment-method id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation illegal for the entity's current lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
