//! Store configuration.
//!
//! A [`StoreConfig`] can be built in code or loaded from a file with
//! [`load_config`]. Every field has a default, so a config file only needs
//! the values the user wants to change:
//!
//! ```toml
//! index_spec = "spoc,posc,cspo"
//! data_dir = "/var/lib/quadstore"
//! sync_commits = true
//! checkpoint_bytes = 16777216
//!
//! [writer_policy]
//! mode = "block"
//! timeout_ms = 500
//! ```

use quadstore_core::{Error, IndexSpec, Result, DEFAULT_INDEX_SPEC};
use quadstore_kv::DEFAULT_CHECKPOINT_BYTES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What `begin_write` does while another write transaction is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WriterPolicy {
    /// Fail immediately with `ConcurrencyConflict`.
    #[default]
    Fail,
    /// Wait up to `timeout_ms` for the writer slot, then fail.
    Block { timeout_ms: u64 },
}

impl WriterPolicy {
    pub fn block(timeout: Duration) -> Self {
        WriterPolicy::Block {
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Permutations to maintain, e.g. `"spoc,posc"`.
    pub index_spec: String,
    /// Directory for metadata and the commit log. `None` keeps the store in memory.
    pub data_dir: Option<PathBuf>,
    /// `fsync` the commit log on every commit.
    pub sync_commits: bool,
    /// Compact the commit log once it grows past this many bytes; `0` only
    /// compacts when the store is opened.
    pub checkpoint_bytes: u64,
    pub writer_policy: WriterPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            index_spec: DEFAULT_INDEX_SPEC.to_string(),
            data_dir: None,
            sync_commits: false,
            checkpoint_bytes: DEFAULT_CHECKPOINT_BYTES,
            writer_policy: WriterPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// In-memory store with the default indexes.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Durable store rooted at `dir`.
    pub fn at(dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: Some(dir.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    pub fn with_index_spec(mut self, spec: impl Into<String>) -> Self {
        self.index_spec = spec.into();
        self
    }

    pub fn with_writer_policy(mut self, policy: WriterPolicy) -> Self {
        self.writer_policy = policy;
        self
    }

    pub fn with_sync_commits(mut self, sync: bool) -> Self {
        self.sync_commits = sync;
        self
    }

    pub fn with_checkpoint_bytes(mut self, bytes: u64) -> Self {
        self.checkpoint_bytes = bytes;
        self
    }

    /// Parse the configured index spec.
    pub fn parsed_index_spec(&self) -> Result<IndexSpec> {
        IndexSpec::parse(&self.index_spec)
    }

    pub fn validate(&self) -> Result<()> {
        self.parsed_index_spec()?;
        if let Some(dir) = &self.data_dir {
            if dir.as_os_str().is_empty() {
                return Err(Error::config("data_dir must not be empty"));
            }
        }
        Ok(())
    }
}

/// Load a config file. Detects format by extension: `.json` → JSON,
/// everything else → TOML. An empty file yields the defaults.
pub fn load_config(path: &Path) -> Result<StoreConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;

    if content.trim().is_empty() {
        return Ok(StoreConfig::default());
    }

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let config: StoreConfig = if is_json {
        serde_json::from_str(&content)
            .map_err(|e| Error::config(format!("failed to parse {}: {e}", path.display())))?
    } else {
        toml::from_str(&content)
            .map_err(|e| Error::config(format!("failed to parse {}: {e}", path.display())))?
    };
    config.validate()?;

    tracing::debug!(
        path = %path.display(),
        index_spec = %config.index_spec,
        "loaded store config"
    );
    Ok(config)
}
