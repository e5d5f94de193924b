//! Error types for the gfile library.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for gfile operations.
#[derive(Error, Debug)]
pub enum GfileError {
    /// HTTP request failed with status code.
    #[error("HTTP error: {0}")]
    HttpError(u16),

    /// No reply or no further body bytes within the configured timeout.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Network request error.
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Local I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A size string did not match `<digits>[.<digits>][ ][unit][iB|B]`.
    #[error("Malformed size string: {0:?}")]
    MalformedSizeString(String),

    /// The file to upload does not exist or is not a regular file.
    #[error("Source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// The file to upload is empty.
    #[error("Source file is empty: {}", .0.display())]
    EmptySource(PathBuf),

    /// The share URL does not look like a gigafile link.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Configuration value out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The service entry page did not assign an upload server.
    #[error("Could not resolve the upload server")]
    ServerResolutionFailed,

    /// A chunk read returned a different number of bytes than planned.
    #[error("Size mismatch: copied {copied} bytes, expected {expected}")]
    SizeMismatch { copied: u64, expected: u64 },

    /// The server answered a chunk with a failure status.
    #[error("Chunk {chunk} rejected by server: {reason}")]
    Rejected { chunk: usize, reason: String },

    /// The server answered a chunk with something that is not a status object.
    #[error("Malformed response for chunk {chunk}: {body}")]
    MalformedResponse { chunk: usize, body: String },

    /// Every chunk was accepted but no response carried a download URL.
    #[error("Upload finished without a download URL")]
    MissingDownloadUrl,

    /// A bounded retry policy gave up.
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// The landing page markup was not recognised.
    #[error("Failed to parse download page: {0}")]
    PageParse(String),

    /// The landing page lists more than one file.
    #[error("Bundle pages with {files} files are not supported")]
    BundleUnsupported { files: usize },

    /// The download response did not declare its length.
    #[error("Download response has no Content-Length")]
    MissingContentLength,

    /// The downloaded file size does not match the declared length.
    #[error(
        "Downloaded file is corrupt (expected {expected} bytes, got {actual}); check {} and delete it yourself if needed",
        .temp_path.display()
    )]
    Integrity {
        expected: u64,
        actual: u64,
        temp_path: PathBuf,
    },

    /// The external download accelerator could not be started.
    #[error("Delegated download failed: {0}")]
    Delegate(String),

    /// Custom error message.
    #[error("{0}")]
    Custom(String),
}

impl GfileError {
    /// Whether the error comes from the transport and is worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            GfileError::RequestError(e) => !e.is_builder(),
            GfileError::HttpError(_) | GfileError::IoError(_) | GfileError::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for gfile operations.
pub type Result<T> = std::result::Result<T, GfileError>;
