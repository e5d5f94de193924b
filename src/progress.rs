//! Progress reporting for file transfers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Progress information for uploads and downloads.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Bytes transferred so far
    pub done: u64,
    /// Total bytes to transfer
    pub total: u64,
    /// What is being transferred: `"chunk 2/5"` or a file name
    pub label: String,
}

impl TransferProgress {
    /// Create a new progress report.
    pub fn new(done: u64, total: u64, label: impl Into<String>) -> Self {
        Self {
            done,
            total,
            label: label.into(),
        }
    }

    /// Get progress as a percentage (0.0 to 100.0).
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.done as f64 / self.total as f64) * 100.0
    }

    /// Check if transfer is complete.
    pub fn is_complete(&self) -> bool {
        self.done >= self.total
    }
}

/// Type alias for progress callback function.
///
/// The callback is shared by all concurrent chunk uploads, so it must be
/// `Sync`. Returning `false` cancels the transfer.
pub type ProgressCallback = Arc<dyn Fn(&TransferProgress) -> bool + Send + Sync>;

/// Shorten a file name for a progress label: names longer than 20 characters
/// keep their first 11 and last 7 characters.
pub fn short_label(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= 20 {
        return name.to_string();
    }
    let head: String = chars[..11].iter().collect();
    let tail: String = chars[chars.len() - 7..].iter().collect();
    format!("{}..{}", head, tail)
}

/// Callback bound to one transfer; a `false` from the callback trips the
/// session's cancellation token.
#[derive(Clone)]
pub(crate) struct ProgressReporter {
    callback: ProgressCallback,
    cancel: CancellationToken,
    total: u64,
    label: String,
}

impl ProgressReporter {
    pub(crate) fn new(
        callback: ProgressCallback,
        cancel: CancellationToken,
        total: u64,
        label: impl Into<String>,
    ) -> Self {
        Self {
            callback,
            cancel,
            total,
            label: label.into(),
        }
    }

    pub(crate) fn report(&self, done: u64) {
        let progress = TransferProgress::new(done, self.total, self.label.as_str());
        if !(self.callback)(&progress) {
            self.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("total", &self.total)
            .field("label", &self.label)
            .finish()
    }
}
