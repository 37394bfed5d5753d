use crate::executor::Tier;

/// Errors returned when a task cannot be admitted.
///
/// # Examples
///
/// ```rust
/// use oxwatch_runtime::error::ExecutorError;
/// use oxwatch_runtime::executor::Tier;
///
/// let err = ExecutorError::Saturated { tier: Tier::High, capacity: 16 };
/// assert!(err.to_string().contains("high"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// `submit` was called before `initialize`.
    #[error("Executor: not initialized")]
    NotRunning,

    /// The executor is terminating and the tier no longer admits work.
    #[error("Executor: {tier} tier is shutting down")]
    ShuttingDown { tier: Tier },

    /// The tier queue is full and its policy rejected the task.
    #[error("Executor: {tier} tier saturated (capacity {capacity})")]
    Saturated { tier: Tier, capacity: usize },

    /// A worker or timer thread could not be started.
    #[error("Executor: failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Convenience `Result` alias for executor operations.
pub type Result<T> = std::result::Result<T, ExecutorError>;
