//! gigafile.nu wire protocol: endpoints and response typing.

mod endpoints;
mod response;

pub use endpoints::{download_url, extract_server, upload_url, UPLOAD_ENDPOINT};
pub use response::ChunkResponse;
