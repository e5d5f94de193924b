//! # gfile
//!
//! Rust client for the gigafile.nu file sharing service.
//!
//! ## Features
//!
//! - **Uploads**:
//!   - Files are split into fixed-size chunks sent as multipart requests.
//!   - Parallel chunk workers; the server still sees chunks complete in order.
//!   - Retries with backoff at the request and at the chunk level.
//! - **Downloads**:
//!   - Share link validation and landing page scraping (single-file and bundle pages).
//!   - Streamed download to a temporary `.dl` file, checked against `Content-Length`.
//!   - Optional hand-off to an external accelerator such as `aria2c`.
//! - **Control**:
//!   - Progress tracking with custom callbacks.
//!   - Cancellation through a token or the progress callback.
//!
//! ## Example: Upload and Download
//!
//! ```no_run
//! use gfile::{DownloadOutcome, Session, TransferConfig, UploadOutcome};
//!
//! # async fn example() -> gfile::Result<()> {
//! let config = TransferConfig::default().with_chunk_size_str("50M")?;
//! let session = Session::new(config)?;
//!
//! if let UploadOutcome::Completed(result) = session.upload("archive.zip").await? {
//!     println!("{}", result.summary());
//!
//!     if let DownloadOutcome::Completed(path) = session.download(&result.url, None).await? {
//!         println!("downloaded to {}", path.display());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod fs;
pub mod http;
pub mod progress;
pub mod public;
pub mod session;
pub mod size;
pub mod transfer;
pub mod transport;

// Re-export commonly used types
pub use config::{ChunkRetryPolicy, DelegateConfig, RetryPolicy, TransferConfig};
pub use error::{GfileError, Result};
pub use progress::{short_label, ProgressCallback, TransferProgress};
pub use public::{parse_share_link, ResolvedFile, ShareLink};
pub use session::Session;
pub use size::{format_size, parse_size};
pub use transfer::{DownloadOutcome, UploadOutcome, UploadResult};
pub use transport::{DownloadBody, Transport};
