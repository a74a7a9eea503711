use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Error taxonomy for the progress/grading/certificate engine.
///
/// `NotEligible` and `Busy` are expected business outcomes, not faults;
/// storage-uniqueness conflicts during issuance are recovered internally
/// and never appear here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("not eligible for a certificate: {}", unmet.join("; "))]
    NotEligible { unmet: Vec<String> },

    /// The per-(user, course) claim lock could not be acquired within the
    /// bounded wait. Retryable.
    #[error("a claim for this course is already in progress, retry shortly")]
    Busy,

    #[error("storage error: {detail}")]
    Storage { detail: String },
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn storage(detail: impl Into<String>) -> Self {
        Self::Storage {
            detail: detail.into(),
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage {
            detail: e.to_string(),
        }
    }
}
