//! Chunk descriptors.

use crate::error::{GfileError, Result};

/// One contiguous byte range of the source file, sent as one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position in the upload.
    pub index: usize,
    /// Byte offset in the source file.
    pub offset: u64,
    /// Byte length; only the last chunk may be shorter than the chunk size.
    pub len: u64,
    /// Number of chunks in the upload.
    pub total: usize,
}

impl Chunk {
    /// Progress label, 1-based: `"chunk 2/5"`.
    pub fn label(&self) -> String {
        format!("chunk {}/{}", self.index + 1, self.total)
    }
}

/// Splits a file of known size into fixed-size chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    pub fn new(file_size: u64, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(GfileError::InvalidConfig("chunk size must be positive".into()));
        }
        Ok(Self {
            file_size,
            chunk_size,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// `ceil(file_size / chunk_size)`.
    pub fn count(&self) -> usize {
        self.file_size.div_ceil(self.chunk_size) as usize
    }

    /// Descriptor for chunk `index`, or `None` past the end.
    pub fn chunk(&self, index: usize) -> Option<Chunk> {
        let total = self.count();
        if index >= total {
            return None;
        }
        let offset = index as u64 * self.chunk_size;
        Some(Chunk {
            index,
            offset,
            len: self.chunk_size.min(self.file_size - offset),
            total,
        })
    }

    /// All chunks in index order.
    pub fn chunks(&self) -> impl Iterator<Item = Chunk> + '_ {
        (0..self.count()).filter_map(move |index| self.chunk(index))
    }
}
