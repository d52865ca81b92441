//! Per-pull execution context handed to iterators and functions.

use std::sync::Arc;

use pullflow_core::cancel::CancellationToken;
use pullflow_core::config::EngineConfig;

use crate::error::{FunctionError, Result};
use crate::executor::FunctionExecutor;

/// Executor, cancellation and configuration shared by one pipeline run.
/// Cheap to clone.
#[derive(Clone)]
pub struct IteratorContext {
    executor: Arc<dyn FunctionExecutor>,
    cancellation: CancellationToken,
    config: Arc<EngineConfig>,
}

impl IteratorContext {
    pub fn new(executor: Arc<dyn FunctionExecutor>) -> Self {
        Self {
            executor,
            cancellation: CancellationToken::new(),
            config: Arc::new(EngineConfig::default()),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn executor(&self) -> &Arc<dyn FunctionExecutor> {
        &self.executor
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            Err(FunctionError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for IteratorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IteratorContext")
            .field("executor", &self.executor.name())
            .field("cancellation", &self.cancellation)
            .finish()
    }
}
