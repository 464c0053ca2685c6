//! Represents multipart upload sessions and parts.

use super::object_key::ObjectKey;
use crate::errors::{OssError, OssResult};

/// One contiguous byte range of a payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadPart {
    /// Zero-based position of the part in the payload.
    pub index: usize,

    /// Byte offset of the first byte of this part.
    pub offset: u64,

    /// Size in bytes.
    pub length: u64,

    /// Completion token (ETag) issued by the provider once uploaded.
    pub etag: Option<String>,
}

impl UploadPart {
    /// Provider part numbers are 1-based.
    pub fn part_number(&self) -> u32 {
        self.index as u32 + 1
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// A part that has been accepted by the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Initiated,
    PartsUploading,
    Composing,
    Completed,
    Aborted,
}

/// A chunked upload in flight.
///
/// Owned by a single orchestration call; never shared between uploads.
#[derive(Clone, Debug)]
pub struct MultipartSession {
    /// Upload ID returned by providers that require explicit initiation.
    pub upload_id: Option<String>,

    /// Object key being uploaded.
    pub key: ObjectKey,

    /// Content type forwarded to the provider.
    pub content_type: Option<String>,

    /// Every planned part, in index order.
    pub parts: Vec<UploadPart>,

    pub status: SessionStatus,
}

impl MultipartSession {
    pub fn new(
        key: ObjectKey,
        upload_id: Option<String>,
        content_type: Option<String>,
        parts: Vec<UploadPart>,
    ) -> Self {
        Self {
            upload_id,
            key,
            content_type,
            parts,
            status: SessionStatus::Initiated,
        }
    }

    /// Upload ID of a natively initiated session.
    pub fn require_upload_id(&self) -> OssResult<&str> {
        self.upload_id
            .as_deref()
            .ok_or_else(|| OssError::provider(format!("no upload id for `{}`", self.key)))
    }

    /// Store the provider's token for the part at `index`.
    pub fn record(&mut self, index: usize, etag: String) {
        if let Some(part) = self.parts.get_mut(index) {
            part.etag = Some(etag);
        }
    }

    /// Parts with a token, ordered by part number.
    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        let mut done: Vec<CompletedPart> = self
            .parts
            .iter()
            .filter_map(|p| {
                p.etag.as_ref().map(|etag| CompletedPart {
                    part_number: p.part_number(),
                    etag: etag.clone(),
                })
            })
            .collect();
        done.sort_by_key(|p| p.part_number);
        done
    }

    /// Indices of planned parts that still lack a token.
    pub fn missing_parts(&self) -> Vec<usize> {
        self.parts
            .iter()
            .filter(|p| p.etag.is_none())
            .map(|p| p.index)
            .collect()
    }
}
