//! Transfer configuration.

use std::time::Duration;

use crate::error::{GfileError, Result};
use crate::size::parse_size;

/// Service entry page that assigns the upload server.
pub const DEFAULT_SERVICE_ROOT: &str = "https://gigafile.nu/";

/// Default chunk size for uploads (10 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Default copy buffer size (1 MiB).
pub const DEFAULT_CHUNK_COPY_SIZE: u64 = 1024 * 1024;

/// Default number of concurrent chunk uploads.
pub const DEFAULT_WORKERS: usize = 4;

/// Upper bound for concurrent chunk uploads.
pub const MAX_WORKERS: usize = 16;

/// Retry policy applied by the HTTP client to every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Base delay; attempt `n` waits `backoff_factor * 2^n`.
    pub backoff_factor: Duration,
    /// Status codes always retried. Empty means only 413/429/503 with a
    /// `Retry-After` header.
    pub status_forcelist: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            backoff_factor: Duration::from_millis(200),
            status_forcelist: Vec::new(),
        }
    }
}

/// Retry policy for a whole chunk upload, on top of [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRetryPolicy {
    /// `None` retries until the upload is cancelled.
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ChunkRetryPolicy {
    /// Give up after `attempts` tries.
    pub fn bounded(attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: Some(attempts.max(1)),
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Delay before the retry following failed attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

impl Default for ChunkRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// External download accelerator used instead of streaming in-process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateConfig {
    pub program: String,
    /// Appended verbatim after the generated arguments.
    pub extra_args: Vec<String>,
}

impl DelegateConfig {
    /// aria2c with whitespace-separated extra arguments.
    pub fn aria2(extra_args: &str) -> Self {
        Self {
            program: "aria2c".to_string(),
            extra_args: extra_args.split_whitespace().map(str::to_string).collect(),
        }
    }
}

/// Configuration shared by uploads and downloads of one [`Session`](crate::Session).
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Bytes per uploaded chunk.
    pub chunk_size: u64,
    /// Buffer used when copying file ranges and writing downloads.
    pub chunk_copy_size: u64,
    /// Concurrent chunk uploads after the first chunk.
    pub workers: usize,
    /// Connect and page timeout; also bounds idle waits on chunk replies and download bodies.
    pub timeout: Duration,
    /// Download key for protected files.
    pub password: Option<String>,
    /// Report progress to the status callback.
    pub progress: bool,
    /// Retention hint sent with every chunk, in days.
    pub lifetime_days: u32,
    pub service_root: String,
    pub retry: RetryPolicy,
    pub chunk_retry: ChunkRetryPolicy,
    pub delegate: Option<DelegateConfig>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_copy_size: DEFAULT_CHUNK_COPY_SIZE,
            workers: DEFAULT_WORKERS,
            timeout: Duration::from_secs(10),
            password: None,
            progress: false,
            lifetime_days: 100,
            service_root: DEFAULT_SERVICE_ROOT.to_string(),
            retry: RetryPolicy::default(),
            chunk_retry: ChunkRetryPolicy::default(),
            delegate: None,
        }
    }
}

impl TransferConfig {
    /// Set the chunk size from a size string such as `"10M"`.
    pub fn with_chunk_size_str(mut self, size: &str) -> Result<Self> {
        self.chunk_size = parse_size(size)?;
        Ok(self)
    }

    /// Set the copy buffer size from a size string such as `"1M"`.
    pub fn with_chunk_copy_size_str(mut self, size: &str) -> Result<Self> {
        self.chunk_copy_size = parse_size(size)?;
        Ok(self)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, MAX_WORKERS);
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Check values that would make a transfer impossible.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(GfileError::InvalidConfig("chunk size must be positive".into()));
        }
        if self.chunk_copy_size == 0 {
            return Err(GfileError::InvalidConfig(
                "chunk copy size must be positive".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(GfileError::InvalidConfig("timeout must be positive".into()));
        }
        if !self.service_root.starts_with("http://") && !self.service_root.starts_with("https://")
        {
            return Err(GfileError::InvalidConfig(format!(
                "service root is not an http(s) URL: {}",
                self.service_root
            )));
        }
        Ok(())
    }
}
