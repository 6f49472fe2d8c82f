//! Configuration for the media cache.
//!
//! Budget size, decode worker count and completion queue capacity can be
//! set programmatically or loaded from environment variables.

use thiserror::Error;

/// Configuration for the media cache system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Unified media memory budget in bytes, shared by images, video frames
    /// and web surfaces.
    pub budget_bytes: usize,
    /// Number of background decode worker threads.
    pub decode_workers: usize,
    /// Capacity of the bounded decode completion channel.
    pub completion_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 256 * 1024 * 1024, // 256 MB
            decode_workers: 4,
            completion_capacity: 64,
        }
    }
}

impl CacheConfig {
    /// Sets the media budget in megabytes.
    pub fn with_budget_mb(mut self, mb: usize) -> Self {
        self.budget_bytes = mb * 1024 * 1024;
        self
    }

    /// Sets the media budget in bytes.
    pub fn with_budget_bytes(mut self, bytes: usize) -> Self {
        self.budget_bytes = bytes;
        self
    }

    /// Sets the number of decode worker threads (clamped to at least 1).
    pub fn with_decode_workers(mut self, workers: usize) -> Self {
        self.decode_workers = workers.max(1);
        self
    }

    /// Sets the completion channel capacity (clamped to at least 1).
    pub fn with_completion_capacity(mut self, capacity: usize) -> Self {
        self.completion_capacity = capacity.max(1);
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `MEDLEY_MEDIA_BUDGET_MB`: media budget in MB (default: 256)
    /// - `MEDLEY_DECODE_THREADS`: decode worker count (default: 4)
    /// - `MEDLEY_COMPLETION_QUEUE`: completion channel capacity (default: 64)
    ///
    /// # Errors
    /// Returns an error if any variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MEDLEY_MEDIA_BUDGET_MB") {
            config.budget_bytes = val
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue("MEDLEY_MEDIA_BUDGET_MB".to_string()))?
                * 1024
                * 1024;
        }

        if let Ok(val) = std::env::var("MEDLEY_DECODE_THREADS") {
            config.decode_workers = val
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue("MEDLEY_DECODE_THREADS".to_string()))?
                .max(1);
        }

        if let Ok(val) = std::env::var("MEDLEY_COMPLETION_QUEUE") {
            config.completion_capacity = val
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue("MEDLEY_COMPLETION_QUEUE".to_string()))?
                .max(1);
        }

        Ok(config)
    }

    /// Returns the media budget in megabytes.
    pub fn budget_mb(&self) -> usize {
        self.budget_bytes / (1024 * 1024)
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid value for a configuration variable.
    #[error("invalid value for configuration variable: {0}")]
    InvalidValue(String),
}
