//! Local file side of a transfer: chunk layout and range copies.

mod chunk;
mod source;

pub use chunk::{Chunk, ChunkPlan};
pub use source::copy_range;
