use thiserror::Error;

use crate::record::RecordId;

#[derive(Error, Debug)]
pub enum BzError {
    #[error("{0} not found")]
    NotFound(RecordId),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{path}: {message}")]
    Validation { path: String, message: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("auth error: {0}")]
    Auth(String),
}

impl BzError {
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type BzResult<T> = Result<T, BzError>;
