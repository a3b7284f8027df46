//! Store failures.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unavailable(String),

    #[error("store call timed out")]
    Timeout,

    #[error("no row {id} in {table}")]
    RowNotFound { table: String, id: String },

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("store returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed row: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

/// The core treats every store failure as opaque.
impl From<StoreError> for quire_core::Error {
    fn from(err: StoreError) -> Self {
        quire_core::Error::StoreFailure(err.to_string())
    }
}
