use thiserror::Error;

/// Result type local to pullflow-ckpt.
pub type Result<T> = std::result::Result<T, CkptError>;

#[derive(Debug, Clone, Error)]
pub enum CkptError {
    #[error("checkpoint has no entry for key '{0}'")]
    MissingKey(String),

    #[error("checkpoint entry '{key}' is not {expected}")]
    WrongType { key: String, expected: &'static str },

    #[error("checkpoint storage error: {0}")]
    Storage(String),

    #[error("no checkpoint named '{0}'")]
    NotFound(String),

    #[error("unsupported codec: {0}")]
    CodecUnsupported(&'static str),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("checksum mismatch")]
    ChecksumMismatch,
}
