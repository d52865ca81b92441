use thiserror::Error;

pub type Result<T> = std::result::Result<T, FunctionError>;

/// Failures raised while preparing or invoking a transform.
///
/// `EndOfRange` is not a failure of the pipeline: a transform raises it to end
/// the sequence early, and the Map iterator turns it into end of sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FunctionError {
    #[error("end of range")]
    EndOfRange,

    #[error("instantiation error: {0}")]
    Instantiation(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cancelled")]
    Cancelled,

    #[error("function failed: {0}")]
    Failed(String),
}

impl FunctionError {
    pub fn is_end_of_range(&self) -> bool {
        matches!(self, FunctionError::EndOfRange)
    }
}
