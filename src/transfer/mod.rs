//! Chunked uploads and streamed downloads.

pub(crate) mod context;
mod download;
pub mod encoder;
mod upload;

pub use download::{delegate_command, sanitize_filename, DownloadOutcome};
pub use encoder::{encode_chunk, ChunkBody, EncodedChunk, TICK_SIZE};
pub use upload::{UploadOutcome, UploadResult};
