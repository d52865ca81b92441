//! Dataset + iterator interfaces.
//!
//! The exec runtime creates one iterator per run with `make_iterator`, calls
//! `initialize` once, then pulls with `get_next` until `Next::EndOfSequence`.

use std::sync::Arc;

use thiserror::Error;

use pullflow_ckpt::{CkptError, StateReader, StateWriter};
use pullflow_core::graph::{GraphBuilder, NodeRef};
use pullflow_core::schema::OutputSignature;
use pullflow_core::types::Record;
use pullflow_function::{FunctionError, IteratorContext};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OpError {
    #[error("setup error: {0}")]
    Setup(String),

    #[error("instantiation error: {0}")]
    Instantiation(String),

    #[error("cancelled")]
    Cancelled,

    #[error("function error: {0}")]
    Function(FunctionError),

    #[error("execution error: {0}")]
    Exec(String),

    #[error("signature error: {0}")]
    Signature(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("graph error: {0}")]
    Graph(String),
}

impl From<FunctionError> for OpError {
    fn from(e: FunctionError) -> Self {
        match e {
            FunctionError::Instantiation(msg) => OpError::Instantiation(msg),
            FunctionError::Cancelled => OpError::Cancelled,
            other => OpError::Function(other),
        }
    }
}

impl From<CkptError> for OpError {
    fn from(e: CkptError) -> Self {
        OpError::Checkpoint(e.to_string())
    }
}

impl From<pullflow_core::error::Error> for OpError {
    fn from(e: pullflow_core::error::Error) -> Self {
        use pullflow_core::error::Error;
        match e {
            Error::Signature(msg) => OpError::Signature(msg),
            Error::Graph(msg) => OpError::Graph(msg),
            Error::Config(msg) => OpError::Setup(msg),
            other => OpError::Exec(other.to_string()),
        }
    }
}

/// Outcome of one pull.
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    Record(Record),
    EndOfSequence,
}

impl Next {
    pub fn is_end(&self) -> bool {
        matches!(self, Next::EndOfSequence)
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            Next::Record(r) => Some(r),
            Next::EndOfSequence => None,
        }
    }
}

/// Immutable description of a lazy sequence of records.
///
/// Invariants:
/// - Every record any iterator yields matches `output_signature`.
/// - Sibling iterators share no mutable state.
pub trait Dataset: Send + Sync + 'static {
    /// Op name used in graph descriptions (stable).
    fn name(&self) -> &'static str;

    fn output_signature(&self) -> &OutputSignature;

    /// Fresh, uninitialized cursor over the sequence.
    fn make_iterator(self: Arc<Self>, prefix: &str) -> Box<dyn DatasetIterator>;

    /// Describe this dataset (and its inputs) through `builder`.
    fn as_graph(&self, builder: &mut dyn GraphBuilder) -> Result<NodeRef, OpError>;

    fn debug_string(&self) -> String;
}

/// Stateful cursor created by `Dataset::make_iterator`.
///
/// `get_next` takes `&self` so one iterator can be pulled from several
/// threads; implementations guard their cursor internally.
pub trait DatasetIterator: Send + Sync {
    /// Key prefix this iterator writes its state under.
    fn prefix(&self) -> &str;

    /// One-time setup before the first pull.
    fn initialize(&mut self, ctx: &IteratorContext) -> Result<(), OpError>;

    fn get_next(&self, ctx: &IteratorContext) -> Result<Next, OpError>;

    fn save(&self, writer: &mut StateWriter) -> Result<(), OpError>;

    /// Reposition to a previously saved state. Initializes first if needed.
    fn restore(&mut self, ctx: &IteratorContext, reader: &StateReader) -> Result<(), OpError>;
}

pub(crate) fn check_cancelled(ctx: &IteratorContext) -> Result<(), OpError> {
    ctx.check_cancelled().map_err(OpError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_errors_map_to_op_errors() {
        assert_eq!(
            OpError::from(FunctionError::Cancelled),
            OpError::Cancelled
        );
        assert!(matches!(
            OpError::from(FunctionError::Instantiation("x".into())),
            OpError::Instantiation(_)
        ));
        assert_eq!(
            OpError::from(FunctionError::Failed("boom".into())),
            OpError::Function(FunctionError::Failed("boom".into()))
        );
    }

    #[test]
    fn next_accessors() {
        assert!(Next::EndOfSequence.is_end());
        let r = Next::Record(Record::default());
        assert!(!r.is_end());
        assert_eq!(r.into_record(), Some(Record::default()));
    }
}
