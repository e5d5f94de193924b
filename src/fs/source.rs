//! Copy a byte range out of a source file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{GfileError, Result};

/// Copy up to `length` bytes starting at `start` from `source` into `out`.
///
/// Copies `min(length, file_size - start)` bytes in increments of at most
/// `copy_buffer_size`, stopping early if the file ends sooner. Every call
/// opens its own read-only handle. Returns the number of bytes copied.
pub fn copy_range<W: Write + ?Sized>(
    source: &Path,
    out: &mut W,
    length: u64,
    start: u64,
    copy_buffer_size: u64,
) -> Result<u64> {
    let mut file = File::open(source)?;
    let file_size = file.metadata()?.len();
    let target = length.min(file_size.saturating_sub(start));
    let buffer_len = copy_buffer_size.clamp(1, target.max(1)) as usize;

    file.seek(SeekFrom::Start(start))?;

    let mut buffer = vec![0u8; buffer_len];
    let mut copied = 0u64;
    loop {
        if copied == target {
            break;
        }
        if copied > target {
            return Err(GfileError::SizeMismatch {
                copied,
                expected: target,
            });
        }
        let want = (target - copied).min(buffer_len as u64) as usize;
        let read = file.read(&mut buffer[..want])?;
        if read == 0 {
            break;
        }
        out.write_all(&buffer[..read])?;
        copied += read as u64;
    }
    Ok(copied)
}
