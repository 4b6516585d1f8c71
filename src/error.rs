use thiserror::Error;

/// Error taxonomy surfaced on every public boundary of the crate.
///
/// Input validation fails synchronously with `IllegalArgument` before any side
/// effect. Persister failures pass through the `Store` variant untouched so
/// transient I/O errors never poison caches.
#[derive(Error, Debug)]
pub enum CubeError {
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("axis overlap: {0}")]
    AxisOverlap(String),

    #[error("coordinate not found: {0}")]
    CoordinateNotFound(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("security: {0}")]
    Security(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl CubeError {
    pub fn illegal_argument(msg: impl Into<String>) -> Self {
        CubeError::IllegalArgument(msg.into())
    }

    pub fn axis_overlap(msg: impl Into<String>) -> Self {
        CubeError::AxisOverlap(msg.into())
    }

    pub fn coordinate_not_found(msg: impl Into<String>) -> Self {
        CubeError::CoordinateNotFound(msg.into())
    }

    pub fn illegal_state(msg: impl Into<String>) -> Self {
        CubeError::IllegalState(msg.into())
    }

    pub fn security(msg: impl Into<String>) -> Self {
        CubeError::Security(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CubeError>;
