use oxwatch_runtime::ExecutorError;

/// Errors raised by the detector engine.
///
/// # Examples
///
/// ```rust
/// use oxwatch_detect::error::DetectError;
///
/// let err = DetectError::InvalidDefinition {
///     definition_id: "boiler-high".to_string(),
///     reason: "reset_limit must be below limit".to_string(),
/// };
/// assert!(err.to_string().contains("boiler-high"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// A definition failed validation; no instance is created for it.
    #[error("Detect: invalid definition '{definition_id}': {reason}")]
    InvalidDefinition {
        definition_id: String,
        reason: String,
    },

    /// Work could not be handed to the executor.
    #[error("Detect: {0}")]
    Executor(#[from] ExecutorError),

    /// The configuration store failed to produce definitions.
    #[error("Detect: definition store error: {0}")]
    Store(String),
}

/// Convenience `Result` alias for detector operations.
pub type Result<T> = std::result::Result<T, DetectError>;
