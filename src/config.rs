//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. explicit path (e.g. a `--config <path>` CLI flag)
//! 2. `~/.sluice/config.toml` (user)
//! 3. `/etc/sluice/config.toml` (system)
//!
//! Every field has a default, so an empty file (or no file at all, via
//! [`Config::load_or_default`]) is a valid configuration.

use serde::Deserialize;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::offload::{ExecutionStrategy, OperationKind};
use crate::{Result, SluiceError};

/// Default number of items held between producer and consumer.
///
/// Small enough to bound memory per request, large enough to keep a
/// producer and a consumer on different threads pipelined.
pub const DEFAULT_CAPACITY: usize = 4;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
}

/// Bridge buffer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    /// Maximum buffered items per bridge (default: 4).
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

/// I/O and blocking thread pools.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Number of I/O threads (default: twice the available parallelism).
    #[serde(default)]
    pub io_threads: Option<usize>,
    /// Upper bound of the blocking pool (default: 64).
    #[serde(default = "default_max_blocking_threads")]
    pub max_blocking_threads: usize,
    /// Thread name used by both pools (default: "sluice-io").
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            io_threads: None,
            max_blocking_threads: default_max_blocking_threads(),
            thread_name: default_thread_name(),
        }
    }
}

impl ExecutorConfig {
    /// Effective number of I/O threads.
    pub fn io_threads(&self) -> usize {
        self.io_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
                * 2
        })
    }
}

fn default_max_blocking_threads() -> usize {
    64
}

fn default_thread_name() -> String {
    "sluice-io".to_string()
}

/// Which operations may block.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Offloaded operations (default: all of them).
    #[serde(default = "default_offload")]
    pub offload: Vec<OperationKind>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            offload: default_offload(),
        }
    }
}

impl StrategyConfig {
    pub fn strategy(&self) -> ExecutionStrategy {
        self.offload.iter().copied().collect()
    }
}

fn default_offload() -> Vec<OperationKind> {
    OperationKind::ALL.to_vec()
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.sluice/config.toml`
    /// 3. `/etc/sluice/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_from_file(&path)
    }

    /// Like [`load`](Self::load), but falls back to defaults when no
    /// standard location has a file. An explicit path must still exist.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
        if explicit_path.is_some() {
            return Self::load(explicit_path);
        }
        match Self::resolve_config_path(None) {
            Ok(path) => Self::load_from_file(&path),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Parse and validate a configuration file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SluiceError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            SluiceError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no bridge can run with.
    pub fn validate(&self) -> Result<()> {
        if self.buffer.capacity == 0 {
            return Err(SluiceError::Configuration(
                "buffer.capacity must be at least 1".to_string(),
            ));
        }
        if self.executor.io_threads == Some(0) {
            return Err(SluiceError::Configuration(
                "executor.io_threads must be at least 1".to_string(),
            ));
        }
        if self.executor.max_blocking_threads == 0 {
            return Err(SluiceError::Configuration(
                "executor.max_blocking_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(SluiceError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".sluice").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/sluice/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(SluiceError::Configuration(
            "No config file found. Create ~/.sluice/config.toml or /etc/sluice/config.toml"
                .to_string(),
        ))
    }
}
