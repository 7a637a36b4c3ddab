/// Why a job or order state machine refused a transition.
///
/// Nothing is changed when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Missing or malformed input: an empty result, an over-long cancel
    /// reason, an inconsistent history.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The current state does not allow the transition, e.g. accepting an
    /// order someone else already claimed.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The actor may not perform this transition on this order.
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl CoreError {
    /// Error code as carried in the API error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::Conflict(_) => "CONFLICT",
            CoreError::Forbidden(_) => "FORBIDDEN",
        }
    }
}
