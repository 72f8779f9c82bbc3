use thiserror::Error;

/// Error type for all fitting and testing entry points.
///
/// Validation errors are terminal caller-input problems; the message always
/// cites the exact offending values. Numerical degeneracies (fewer positive
/// eigenvalues than requested factors, near-singular blocks in canonical
/// correlation, negligible imaginary round-off) are handled by policy inside
/// the algorithms and never surface as errors.
#[derive(Debug, Error)]
pub enum MvError {
    /// Caller-supplied arguments failed validation.
    #[error("{0}")]
    Validation(String),

    /// An optional collaborator (e.g. a plotting backend) is not attached.
    #[error("{0} is unavailable: no backend attached")]
    Unavailable(&'static str),

    /// A dense linear-algebra routine failed.
    #[error(transparent)]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    /// Saving or loading a fitted model failed.
    #[error("model serialization failed: {0}")]
    Serialization(String),

    /// A decomposition returned an unexpected shape.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl MvError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        MvError::Validation(msg.into())
    }
}
