use pushline_model::UserId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("store failure: {0}")]
    Store(String),

    #[error("log bus error: {0}")]
    Bus(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no live sink for user {0}")]
    NoRecipient(UserId),

    #[error("every sink refused the frame for user {0}")]
    SinksRefused(UserId),

    #[error("max connections reached")]
    CapacityExceeded,

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
