//! Runtime: pull a dataset's iterator to completion and checkpoint it.
//!
//! Behavior:
//! - Fingerprints the dataset's graph description; checkpoints are stored
//!   under a name derived from it and refuse to restore into another dataset.
//! - With `resume`, restores the latest checkpoint before the first pull.
//! - Writes a checkpoint every `checkpoint_every` records, when a run is
//!   cancelled, and once at end of sequence (marked exhausted).
//! - `collect_parallel` pulls one iterator from several threads; ordering is
//!   then unspecified.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use pullflow_ckpt::{
    Checkpoint, CheckpointStore, CkptError, Codec, FsStorage, MemoryStorage, StateReader,
    StateWriter, Storage,
};
use pullflow_core::cancel::CancellationToken;
use pullflow_core::config::EngineConfig;
use pullflow_core::hash::Hash256;
use pullflow_core::manifest::{CheckpointId, CheckpointManifest};
use pullflow_core::types::Record;
use pullflow_function::{FunctionExecutor, IteratorContext};
use pullflow_operators::{graph_of, Dataset, DatasetIterator, Next, OpError};

use crate::fail_point;
use crate::metrics::{emit_span, now_ms};

/// Prefix handed to the root iterator of every run.
pub const ITERATOR_PREFIX: &str = "Iterator";

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("operator: {0}")]
    Operator(OpError),
    #[error("cancelled")]
    Cancelled,
    #[error("checkpoint: {0}")]
    Checkpoint(String),
    #[error("graph: {0}")]
    Graph(String),
    #[error("sink: {0}")]
    Sink(String),
    #[error("injected failure at '{0}'")]
    Injected(String),
}

impl From<OpError> for ExecError {
    fn from(e: OpError) -> Self {
        match e {
            OpError::Cancelled => ExecError::Cancelled,
            OpError::Graph(msg) => ExecError::Graph(msg),
            other => ExecError::Operator(other),
        }
    }
}

impl From<CkptError> for ExecError {
    fn from(e: CkptError) -> Self {
        ExecError::Checkpoint(e.to_string())
    }
}

impl From<pullflow_core::error::Error> for ExecError {
    fn from(e: pullflow_core::error::Error) -> Self {
        match e {
            pullflow_core::error::Error::Config(msg) => ExecError::Config(msg),
            other => ExecError::Graph(other.to_string()),
        }
    }
}

/// What one call to `Engine::run` did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub fingerprint: Hash256,
    /// Records handed to the sink by this run.
    pub records: u64,
    /// Records including those produced before the resumed checkpoint.
    pub total_records: u64,
    pub checkpoints: u32,
    pub resumed_from: Option<CheckpointId>,
    pub elapsed_ms: u64,
}

/// Engine owns the executor, the cancellation token and the checkpoint store.
pub struct Engine {
    cfg: EngineConfig,
    executor: Arc<dyn FunctionExecutor>,
    store: Option<CheckpointStore>,
    checkpoint_name: Option<String>,
    cancellation: CancellationToken,
}

impl Engine {
    pub fn new(cfg: EngineConfig, executor: Arc<dyn FunctionExecutor>) -> Result<Self, ExecError> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            executor,
            store: None,
            checkpoint_name: None,
            cancellation: CancellationToken::new(),
        })
    }

    pub fn with_checkpoints(mut self, store: CheckpointStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach the store described by `checkpoint_uri` / `checkpoint_dir`.
    /// `memory://` gives a store private to this engine.
    pub fn with_configured_checkpoints(self) -> Result<Self, ExecError> {
        let codec = Codec::from_name(&self.cfg.checkpoint_codec)?;
        let storage: Box<dyn Storage> = match self.cfg.checkpoint_scheme() {
            Some("memory") => Box::new(MemoryStorage::new()),
            Some("file") | None => Box::new(FsStorage::new()),
            Some(other) => {
                return Err(ExecError::Config(format!(
                    "unsupported checkpoint scheme '{other}'"
                )))
            }
        };
        let store = CheckpointStore::new(storage, codec, self.cfg.checkpoint_root())
            .with_max_bytes(self.cfg.max_checkpoint_bytes);
        Ok(self.with_checkpoints(store))
    }

    /// Store checkpoints under `name` instead of the fingerprint-derived one.
    pub fn with_checkpoint_name(mut self, name: impl Into<String>) -> Self {
        self.checkpoint_name = Some(name.into());
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn checkpoints(&self) -> Option<&CheckpointStore> {
        self.store.as_ref()
    }

    /// Token shared with every context this engine creates.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn context(&self) -> IteratorContext {
        IteratorContext::new(Arc::clone(&self.executor))
            .with_cancellation(self.cancellation.clone())
            .with_config(self.cfg.clone())
    }

    pub fn checkpoint_name_for(&self, fingerprint: &Hash256) -> String {
        self.checkpoint_name
            .clone()
            .unwrap_or_else(|| format!("dataset-{}", fingerprint.short()))
    }

    /// Pull `dataset` to the end, handing each record to `sink`.
    pub fn run<F>(&self, dataset: &Arc<dyn Dataset>, mut sink: F) -> Result<RunSummary, ExecError>
    where
        F: FnMut(Record) -> Result<(), ExecError>,
    {
        let started = Instant::now();
        let fingerprint = graph_of(dataset.as_ref())?.fingerprint()?;
        let name = self.checkpoint_name_for(&fingerprint);
        let ctx = self.context();

        let mut it = Arc::clone(dataset).make_iterator(ITERATOR_PREFIX);
        it.initialize(&ctx)?;
        tracing::debug!(dataset = %dataset.debug_string(), fingerprint = %fingerprint.short(), "run started");

        let mut summary = RunSummary {
            fingerprint,
            records: 0,
            total_records: 0,
            checkpoints: 0,
            resumed_from: None,
            elapsed_ms: 0,
        };

        if self.cfg.resume {
            if let Some(ckpt) = self.load_checkpoint(&name, &fingerprint)? {
                summary.resumed_from = Some(ckpt.manifest.id);
                summary.total_records = ckpt.manifest.records_produced;
                if ckpt.manifest.exhausted {
                    tracing::info!(checkpoint = %name, "dataset already exhausted, nothing to resume");
                    summary.elapsed_ms = started.elapsed().as_millis() as u64;
                    return Ok(summary);
                }
                it.restore(&ctx, &StateReader::from_checkpoint(&ckpt))?;
                tracing::info!(
                    checkpoint = %name,
                    records = ckpt.manifest.records_produced,
                    "resumed from checkpoint"
                );
            }
        }

        loop {
            fail_point!("exec::before_pull");
            let next = match it.get_next(&ctx) {
                Ok(next) => next,
                Err(OpError::Cancelled) => {
                    // Keep the position reached so far.
                    if self.save_checkpoint(it.as_ref(), &name, &summary, false)? {
                        summary.checkpoints += 1;
                    }
                    tracing::warn!(records = summary.records, "run cancelled");
                    return Err(ExecError::Cancelled);
                }
                Err(e) => return Err(e.into()),
            };
            match next {
                Next::Record(record) => {
                    sink(record)?;
                    summary.records += 1;
                    summary.total_records += 1;
                    if let Some(every) = self.cfg.checkpoint_every {
                        if summary.records % every == 0
                            && self.save_checkpoint(it.as_ref(), &name, &summary, false)?
                        {
                            summary.checkpoints += 1;
                        }
                    }
                }
                Next::EndOfSequence => break,
            }
        }

        if self.save_checkpoint(it.as_ref(), &name, &summary, true)? {
            summary.checkpoints += 1;
        }
        summary.elapsed_ms = started.elapsed().as_millis() as u64;

        emit_span(
            "run_complete",
            &[
                ("records", summary.records.to_string()),
                ("checkpoints", summary.checkpoints.to_string()),
                ("elapsed_ms", summary.elapsed_ms.to_string()),
            ],
        );
        tracing::info!(records = summary.records, total = summary.total_records, "run finished");
        Ok(summary)
    }

    /// Run to completion and return every record in order.
    pub fn collect(&self, dataset: &Arc<dyn Dataset>) -> Result<Vec<Record>, ExecError> {
        let mut out = Vec::new();
        self.run(dataset, |r| {
            out.push(r);
            Ok(())
        })?;
        Ok(out)
    }

    /// Pull one iterator from `workers` threads. Records come back grouped
    /// by worker; their relative order is unspecified. No checkpoints.
    pub fn collect_parallel(
        &self,
        dataset: &Arc<dyn Dataset>,
        workers: usize,
    ) -> Result<Vec<Record>, ExecError> {
        let ctx = self.context();
        let mut it = Arc::clone(dataset).make_iterator(ITERATOR_PREFIX);
        it.initialize(&ctx)?;
        let it: &dyn DatasetIterator = it.as_ref();
        let ctx = &ctx;

        let results: Vec<Result<Vec<Record>, ExecError>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..workers.max(1))
                .map(|_| {
                    s.spawn(move || -> Result<Vec<Record>, ExecError> {
                        let mut local = Vec::new();
                        loop {
                            match it.get_next(ctx)? {
                                Next::Record(r) => local.push(r),
                                Next::EndOfSequence => return Ok(local),
                            }
                        }
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(ExecError::Operator(OpError::Exec("pull worker panicked".into())))
                    })
                })
                .collect()
        });

        let mut out = Vec::new();
        for r in results {
            out.extend(r?);
        }
        emit_span(
            "collect_parallel",
            &[("records", out.len().to_string()), ("workers", workers.to_string())],
        );
        Ok(out)
    }

    fn load_checkpoint(
        &self,
        name: &str,
        fingerprint: &Hash256,
    ) -> Result<Option<Checkpoint>, ExecError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        if !store.exists(name)? {
            return Ok(None);
        }
        let ckpt = store.load(name)?;
        if ckpt.manifest.dataset_fingerprint != *fingerprint {
            return Err(ExecError::Checkpoint(format!(
                "checkpoint '{name}' belongs to dataset {}, not {}",
                ckpt.manifest.dataset_fingerprint.short(),
                fingerprint.short()
            )));
        }
        Ok(Some(ckpt))
    }

    /// Returns whether a checkpoint was written (false without a store).
    fn save_checkpoint(
        &self,
        it: &dyn DatasetIterator,
        name: &str,
        summary: &RunSummary,
        exhausted: bool,
    ) -> Result<bool, ExecError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        fail_point!("exec::before_checkpoint");
        let mut writer = StateWriter::new();
        it.save(&mut writer)?;
        let mut manifest =
            CheckpointManifest::new(summary.fingerprint, summary.total_records, now_ms());
        if exhausted {
            manifest = manifest.mark_exhausted();
        }
        let bytes = store.save(name, &writer.into_checkpoint(manifest))?;
        emit_span(
            "checkpoint",
            &[
                ("name", name.to_string()),
                ("bytes", bytes.to_string()),
                ("records", summary.total_records.to_string()),
                ("exhausted", exhausted.to_string()),
            ],
        );
        Ok(true)
    }
}
