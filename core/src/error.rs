use thiserror::Error;

/// Domain errors returned by the service layer.
///
/// `NotFound` covers both "does not exist" and "exists but belongs to someone
/// else"; callers cannot tell the two apart.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Meal group cannot exceed {limit} recipes")]
    CapacityExceeded { limit: usize },
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type PlanResult<T> = std::result::Result<T, PlanError>;

impl PlanError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

impl From<rusqlite::Error> for PlanError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.into())
    }
}
