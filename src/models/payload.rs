//! The file a caller hands to a backend.

use crate::errors::{OssError, OssResult};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, SeekFrom},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Source {
    Memory(Bytes),
    File { path: PathBuf, spooled: bool },
}

/// Body of a single-request upload. Memory is sent as is, files are streamed
/// by the transport.
#[derive(Debug, Clone)]
pub enum UploadBody {
    Memory(Bytes),
    File { path: PathBuf, len: u64 },
}

impl UploadBody {
    pub fn len(&self) -> u64 {
        match self {
            UploadBody::Memory(data) => data.len() as u64,
            UploadBody::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Bytes> for UploadBody {
    fn from(data: Bytes) -> Self {
        UploadBody::Memory(data)
    }
}

/// A named byte source with a declared size and optional content type.
///
/// Backed either by memory or by a local file; both support random-access
/// range reads so parts can be read independently of each other.
#[derive(Debug, Clone)]
pub struct FilePayload {
    name: String,
    content_type: Option<String>,
    declared_size: u64,
    source: Source,
}

impl FilePayload {
    pub fn from_bytes(
        name: impl Into<String>,
        content_type: Option<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            content_type,
            declared_size: data.len() as u64,
            source: Source::Memory(data),
        }
    }

    /// Open a local file; the declared size is taken from its metadata.
    pub async fn from_path(path: impl AsRef<Path>, content_type: Option<String>) -> OssResult<Self> {
        let path = path.as_ref();
        let meta = fs::metadata(path)
            .await
            .map_err(|err| OssError::invalid_path(path.display(), err.to_string()))?;
        if !meta.is_file() {
            return Err(OssError::invalid_path(path.display(), "not a regular file"));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            content_type,
            declared_size: meta.len(),
            source: Source::File {
                path: path.to_path_buf(),
                spooled: false,
            },
        })
    }

    /// Stream `body` into a temporary file under `dir`.
    ///
    /// Computes size and MD5 while streaming, fsyncs, and removes the temp file
    /// on any error. Call [`FilePayload::discard`] once the upload is done.
    pub async fn spool<S>(
        dir: &Path,
        name: impl Into<String>,
        content_type: Option<String>,
        body: S,
    ) -> OssResult<Self>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        fs::create_dir_all(dir).await?;
        let tmp_path = dir.join(format!(".spool-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: u64 = 0;
        pin_mut!(body);
        while let Some(chunk_res) = body.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(OssError::Io(err));
                }
            };
            size_bytes += chunk.len() as u64;
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(OssError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(OssError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(OssError::Io(err));
        }

        debug!(path = %tmp_path.display(), size_bytes, "spooled request body");

        Ok(Self {
            name: name.into(),
            content_type,
            declared_size: size_bytes,
            source: Source::File {
                path: tmp_path,
                spooled: true,
            },
        })
    }

    /// Override the size the caller claims the payload has.
    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = size;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.declared_size
    }

    async fn actual_len(&self) -> OssResult<u64> {
        match &self.source {
            Source::Memory(data) => Ok(data.len() as u64),
            Source::File { path, .. } => Ok(fs::metadata(path).await?.len()),
        }
    }

    /// Reject empty payloads and payloads whose declared size is wrong.
    pub async fn ensure_not_empty(&self) -> OssResult<()> {
        if self.declared_size == 0 {
            return Err(OssError::EmptyPayload(format!("`{}` has zero size", self.name)));
        }
        let actual = self.actual_len().await?;
        if actual == 0 {
            return Err(OssError::EmptyPayload(format!("`{}` has no content", self.name)));
        }
        if actual != self.declared_size {
            return Err(OssError::EmptyPayload(format!(
                "`{}` declares {} bytes but holds {}",
                self.name, self.declared_size, actual
            )));
        }
        Ok(())
    }

    /// Read `len` bytes starting at `offset`.
    pub async fn read_range(&self, offset: u64, len: u64) -> OssResult<Bytes> {
        match &self.source {
            Source::Memory(data) => {
                let start = offset as usize;
                let end = start.saturating_add(len as usize);
                if end > data.len() {
                    return Err(OssError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("range {start}..{end} beyond payload of {} bytes", data.len()),
                    )));
                }
                Ok(data.slice(start..end))
            }
            Source::File { path, .. } => {
                let mut file = File::open(path).await?;
                file.seek(SeekFrom::Start(offset)).await?;
                let mut buf = BytesMut::zeroed(len as usize);
                file.read_exact(&mut buf).await?;
                Ok(buf.freeze())
            }
        }
    }

    /// The whole payload as a single-request body; files stay on disk.
    pub fn body(&self) -> UploadBody {
        match &self.source {
            Source::Memory(data) => UploadBody::Memory(data.clone()),
            Source::File { path, .. } => UploadBody::File {
                path: path.clone(),
                len: self.declared_size,
            },
        }
    }

    /// Remove the backing file if this payload was spooled.
    pub async fn discard(&self) {
        if let Source::File {
            path,
            spooled: true,
        } = &self.source
        {
            match fs::remove_file(path).await {
                Ok(_) => debug!("removed spool file {}", path.display()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => debug!("failed to remove spool file {}: {}", path.display(), err),
            }
        }
    }
}

/// Turn an optional caller-supplied file into a payload, treating absence as empty.
pub fn require_payload(file: Option<FilePayload>) -> OssResult<FilePayload> {
    file.ok_or_else(|| OssError::EmptyPayload("no file was supplied".into()))
}
