//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Allow Map to bypass the function executor when the transform is a pure
    /// selection of its inputs. Turning this off never changes results.
    pub short_circuit: bool,

    /// Check every produced record against its dataset's output signature.
    pub validate_records: bool,

    /// Run functions on a pooled executor sized by `max_parallel_pulls`.
    /// Each Map node still carries its own `use_inter_op_parallelism` attr,
    /// which picks the async call path per dataset.
    pub use_inter_op_parallelism: bool,

    /// Emit a checkpoint every N produced records (None = only at the end).
    pub checkpoint_every: Option<u64>,

    /// Resume from the latest checkpoint for the same dataset if one exists.
    pub resume: bool,

    /// Directory for checkpoint blobs (local-path configuration).
    pub checkpoint_dir: String,

    /// Optional checkpoint URI (`memory://name` or `file:///path`).
    pub checkpoint_uri: Option<String>,

    /// Codec for checkpoint payloads: "none", "zstd" or "lz4".
    pub checkpoint_codec: String,

    /// Reject checkpoint blobs whose decoded payload exceeds this many bytes.
    pub max_checkpoint_bytes: u64,

    /// Size of the function worker pool when `use_inter_op_parallelism` is set.
    /// `Engine::collect_parallel` takes its puller count as an argument.
    pub max_parallel_pulls: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            short_circuit: true,
            validate_records: true,
            use_inter_op_parallelism: true,
            checkpoint_every: None,
            resume: false,
            checkpoint_dir: "/tmp/pullflow-ckpt".to_string(),
            checkpoint_uri: None,
            checkpoint_codec: "none".to_string(),
            max_checkpoint_bytes: 64 * 1024 * 1024, // 64 MiB
            max_parallel_pulls: 4,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `PULLFLOW_SHORT_CIRCUIT`: "true"/"false"
    /// - `PULLFLOW_VALIDATE_RECORDS`: "true"/"false"
    /// - `PULLFLOW_INTER_OP_PARALLELISM`: "true"/"false"
    /// - `PULLFLOW_CHECKPOINT_EVERY`: records between checkpoints
    /// - `PULLFLOW_RESUME`: "true"/"false"
    /// - `PULLFLOW_CHECKPOINT_DIR`, `PULLFLOW_CHECKPOINT_URI`, `PULLFLOW_CHECKPOINT_CODEC`
    /// - `PULLFLOW_MAX_CHECKPOINT_BYTES`, `PULLFLOW_MAX_PARALLEL_PULLS`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_bool("PULLFLOW_SHORT_CIRCUIT") {
            cfg.short_circuit = v;
        }

        if let Some(v) = env_bool("PULLFLOW_VALIDATE_RECORDS") {
            cfg.validate_records = v;
        }

        if let Some(v) = env_bool("PULLFLOW_INTER_OP_PARALLELISM") {
            cfg.use_inter_op_parallelism = v;
        }

        if let Ok(s) = std::env::var("PULLFLOW_CHECKPOINT_EVERY") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.checkpoint_every = Some(v);
            }
        }

        if let Some(v) = env_bool("PULLFLOW_RESUME") {
            cfg.resume = v;
        }

        if let Ok(s) = std::env::var("PULLFLOW_CHECKPOINT_DIR") {
            cfg.checkpoint_dir = s;
        }

        if let Ok(s) = std::env::var("PULLFLOW_CHECKPOINT_URI") {
            cfg.checkpoint_uri = Some(s);
        }

        if let Ok(s) = std::env::var("PULLFLOW_CHECKPOINT_CODEC") {
            cfg.checkpoint_codec = s;
        }

        if let Ok(s) = std::env::var("PULLFLOW_MAX_CHECKPOINT_BYTES") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.max_checkpoint_bytes = v;
            }
        }

        if let Ok(s) = std::env::var("PULLFLOW_MAX_PARALLEL_PULLS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_parallel_pulls = v;
            }
        }

        cfg
    }

    /// Reject settings that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_every == Some(0) {
            return Err(Error::Config("checkpoint_every must be at least 1".into()));
        }
        if self.max_parallel_pulls == 0 {
            return Err(Error::Config("max_parallel_pulls must be at least 1".into()));
        }
        if !matches!(self.checkpoint_codec.as_str(), "none" | "zstd" | "lz4") {
            return Err(Error::Config(format!(
                "unknown checkpoint codec '{}'",
                self.checkpoint_codec
            )));
        }
        Ok(())
    }

    /// Scheme of the checkpoint URI, if one is configured.
    pub fn checkpoint_scheme(&self) -> Option<&str> {
        self.checkpoint_uri
            .as_deref()
            .and_then(|uri| uri.split("://").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    /// Root under which checkpoint blobs are written.
    pub fn checkpoint_root(&self) -> String {
        match (self.checkpoint_scheme(), self.checkpoint_uri.as_ref()) {
            (Some("file"), Some(uri)) => {
                file_uri_to_path(uri).unwrap_or_else(|| self.checkpoint_dir.clone())
            }
            (Some(_), Some(uri)) => uri
                .split_once("://")
                .map(|(_, rest)| rest.trim_end_matches('/').to_string())
                .unwrap_or_else(|| self.checkpoint_dir.clone()),
            _ => self.checkpoint_dir.clone(),
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|s| match s.trim() {
        "1" | "true" | "TRUE" | "yes" => Some(true),
        "0" | "false" | "FALSE" | "no" => Some(false),
        _ => None,
    })
}

fn file_uri_to_path(uri: &str) -> Option<String> {
    let stripped = uri.strip_prefix("file://")?;
    if stripped.starts_with('/') {
        Some(stripped.to_string())
    } else {
        Some(format!("/{}", stripped))
    }
}
