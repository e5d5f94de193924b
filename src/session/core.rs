//! Session state shared by uploads and downloads.

use tokio_util::sync::CancellationToken;

use crate::config::{TransferConfig, MAX_WORKERS};
use crate::error::Result;
use crate::http::HttpClient;
use crate::progress::{ProgressCallback, ProgressReporter};
use crate::transport::Transport;

/// A gigafile.nu session: one HTTP client (and its cookies), a
/// configuration, an optional progress callback and a cancellation token.
///
/// Runtime state of an individual transfer (upload token, cursor, failure
/// flag) is created by each `upload()` call and dropped when it returns.
pub struct Session<T = HttpClient> {
    transport: T,
    config: TransferConfig,
    /// Progress callback for transfer progress
    progress_callback: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl Session<HttpClient> {
    /// Create a session backed by a retrying reqwest client.
    ///
    /// # Example
    /// ```no_run
    /// use gfile::{Session, TransferConfig, UploadOutcome};
    ///
    /// # async fn example() -> gfile::Result<()> {
    /// let session = Session::new(TransferConfig::default())?;
    /// if let UploadOutcome::Completed(result) = session.upload("backup.tar").await? {
    ///     println!("{}", result.url);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: TransferConfig) -> Result<Self> {
        config.validate()?;
        let http = HttpClient::new(config.timeout, config.retry.clone())?;
        Self::with_transport(http, config)
    }

    /// Create a session whose requests go through an HTTP proxy.
    pub fn with_proxy(config: TransferConfig, proxy: &str) -> Result<Self> {
        config.validate()?;
        let http = HttpClient::with_proxy(proxy, config.timeout, config.retry.clone())?;
        Self::with_transport(http, config)
    }
}

impl<T: Transport> Session<T> {
    /// Create a session over any [`Transport`].
    pub fn with_transport(transport: T, config: TransferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            progress_callback: None,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Set the number of concurrent chunk uploads (clamped to 1..=16).
    pub fn set_workers(&mut self, workers: usize) {
        self.config.workers = workers.clamp(1, MAX_WORKERS);
    }

    /// Get the current number of transfer workers.
    pub fn workers(&self) -> usize {
        self.config.workers
    }

    /// Register a progress callback and enable progress reporting.
    ///
    /// The callback is invoked from concurrent chunk uploads. Returning
    /// `false` cancels the running transfer.
    ///
    /// # Example
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use gfile::{Session, TransferConfig};
    /// # fn example() -> gfile::Result<()> {
    /// let mut session = Session::new(TransferConfig::default())?;
    /// session.watch_status(Arc::new(|progress| {
    ///     println!("{}: {:.0}%", progress.label, progress.percent());
    ///     true // continue transfer
    /// }));
    /// # Ok(())
    /// # }
    /// ```
    pub fn watch_status(&mut self, callback: ProgressCallback) {
        self.progress_callback = Some(callback);
        self.config.progress = true;
    }

    /// Clear the progress callback.
    pub fn clear_status(&mut self) {
        self.progress_callback = None;
    }

    /// Token that cancels the running transfer when triggered.
    ///
    /// Once cancelled, every later transfer on this session returns a
    /// cancelled outcome immediately.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the running transfer.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Reporter for one transfer, if progress is enabled and a callback is set.
    pub(crate) fn reporter(&self, total: u64, label: impl Into<String>) -> Option<ProgressReporter> {
        if !self.config.progress {
            return None;
        }
        self.progress_callback
            .as_ref()
            .map(|callback| ProgressReporter::new(callback.clone(), self.cancel.clone(), total, label))
    }
}

impl<T> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("progress_callback", &self.progress_callback.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_session_creation() {
        let session = Session::new(TransferConfig::default()).unwrap();
        assert_eq!(session.workers(), 4);
        assert!(!session.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TransferConfig {
            chunk_copy_size: 0,
            ..TransferConfig::default()
        };
        assert!(Session::new(config).is_err());
    }

    #[test]
    fn test_workers_configuration() {
        let mut session = Session::new(TransferConfig::default()).unwrap();
        session.set_workers(8);
        assert_eq!(session.workers(), 8);
        session.set_workers(0);
        assert_eq!(session.workers(), 1);
        session.set_workers(100);
        assert_eq!(session.workers(), 16);
    }

    #[test]
    fn test_reporter_requires_callback_and_flag() {
        let mut session = Session::new(TransferConfig::default()).unwrap();
        assert!(session.reporter(10, "x").is_none());

        session.watch_status(Arc::new(|_| true));
        assert!(session.reporter(10, "x").is_some());

        session.clear_status();
        assert!(session.reporter(10, "x").is_none());
    }

    #[test]
    fn test_cancel_is_shared() {
        let session = Session::new(TransferConfig::default()).unwrap();
        let token = session.cancellation_token();
        session.cancel();
        assert!(token.is_cancelled());
    }
}
