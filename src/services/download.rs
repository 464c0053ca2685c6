//! Shared download path: validate the destination, resolve the key, and write
//! the object atomically.

use crate::{
    errors::{OssError, OssResult},
    models::object_key::ObjectKey,
    providers::ObjectStream,
    services::url_resolver::UrlResolver,
};
use futures::StreamExt;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use uuid::Uuid;

/// Where a download goes and which object it reads.
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub key: ObjectKey,
    pub path: PathBuf,
}

impl DownloadTarget {
    /// Validate `destination` and turn `reference` (key or public URL) into a key.
    pub async fn prepare(
        resolver: &UrlResolver,
        destination: &Path,
        reference: &str,
    ) -> OssResult<Self> {
        if destination.as_os_str().is_empty() {
            return Err(OssError::invalid_path("", "destination directory is empty"));
        }
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(OssError::invalid_path(
                destination.display(),
                "object reference is empty",
            ));
        }
        match fs::metadata(destination).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(OssError::invalid_path(
                    destination.display(),
                    "not a directory",
                ));
            }
            Err(err) => {
                return Err(OssError::invalid_path(destination.display(), err.to_string()));
            }
        }

        let key = ObjectKey::from_existing(resolver.key_from_ref(reference));
        let file_name = key.file_name();
        if file_name.is_empty() || file_name == "." || file_name == ".." {
            return Err(OssError::InvalidInput(format!(
                "object reference `{reference}` does not name a file"
            )));
        }
        let path = destination.join(file_name);
        Ok(Self { key, path })
    }

    /// Stream `body` into a temp file beside the target, then rename it into place.
    pub async fn write(&self, mut body: ObjectStream) -> OssResult<PathBuf> {
        let parent = self.path.parent().map(Path::to_path_buf).ok_or_else(|| {
            OssError::invalid_path(self.path.display(), "download path missing parent directory")
        })?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        while let Some(chunk_res) = body.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(OssError::Io(err));
                }
            };
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
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &self.path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&self.path).await?;
                fs::rename(&tmp_path, &self.path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(OssError::Io(err));
            }
        }
        Ok(self.path.clone())
    }
}
