//! Splitting payloads into upload parts.

use crate::{
    errors::{OssError, OssResult},
    models::multipart::UploadPart,
};

/// Highest part number providers accept.
pub const MAX_PART_COUNT: u64 = 10_000;

/// Cover `[0, total)` with parts of `part_size` bytes; only the last may be shorter.
pub fn split_parts(total: u64, part_size: u64) -> OssResult<Vec<UploadPart>> {
    if total == 0 {
        return Err(OssError::EmptyPayload("cannot split a zero-length payload".into()));
    }
    if part_size == 0 {
        return Err(OssError::InvalidInput("part size must be positive".into()));
    }
    let count = total.div_ceil(part_size);
    if count > MAX_PART_COUNT {
        return Err(OssError::InvalidInput(format!(
            "{total} bytes in {part_size}-byte parts needs {count} parts, limit is {MAX_PART_COUNT}"
        )));
    }

    Ok((0..count)
        .map(|i| {
            let offset = i * part_size;
            UploadPart {
                index: i as usize,
                offset,
                length: part_size.min(total - offset),
                etag: None,
            }
        })
        .collect())
}
