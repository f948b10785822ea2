use thiserror::Error;

pub type SparkResult<T> = Result<T, SparkError>;

/// Failure taxonomy shared by the client, cache, dispatcher and translator.
///
/// `Clone` so one failed hydration can be handed to every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SparkError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("remote api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("conflict (room is locked or moderated): {body}")]
    Conflict { body: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl SparkError {
    /// Maps a non-2xx status from the remote API. 429 never reaches this point.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            404 => SparkError::NotFound(body),
            409 => SparkError::Conflict { body },
            _ => SparkError::Api { status, body },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SparkError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SparkError::NotFound(_))
    }
}
