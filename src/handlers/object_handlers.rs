//! HTTP handlers for uploads and downloads.
//! Request bodies are streamed to a spool file rather than buffered, then handed
//! to the configured `StorageBackend`.

use crate::{
    errors::AppError,
    models::payload::{FilePayload, require_payload},
    routes::routes::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Query, State},
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::{io, path::Path};
use tracing::debug;

/// Name of the form field carrying the file.
const FILE_FIELD: &str = "file";

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub chunked: bool,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub destination: String,
    pub object: String,
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    pub path: String,
}

/// `POST /files` with a multipart `file` field.
pub async fn upload_file(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut spooled: Option<FilePayload> = None;
    if let Err(err) = spool_file_field(&state.spool_dir, &mut multipart, &mut spooled).await {
        if let Some(payload) = spooled {
            payload.discard().await;
        }
        return Err(err);
    }

    let payload = require_payload(spooled)?;
    let result = if query.chunked {
        state.backend.chunked_upload(&payload).await
    } else {
        state.backend.upload(&payload).await
    };
    payload.discard().await;

    Ok(Json(UploadResponse { url: result? }))
}

/// Read the whole form, spooling the first `file` field into `spooled`.
async fn spool_file_field(
    spool_dir: &Path,
    multipart: &mut Multipart,
    spooled: &mut Option<FilePayload>,
) -> Result<(), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        if field.name() != Some(FILE_FIELD) || spooled.is_some() {
            debug!(field = ?field.name(), "ignoring form field");
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let body = field.map_err(io::Error::other);
        *spooled = Some(FilePayload::spool(spool_dir, name, content_type, body).await?);
    }
    Ok(())
}

/// `POST /files/download` with `{ "destination": ..., "object": ... }`.
pub async fn download_file(
    State(state): State<AppState>,
    Json(req): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>, AppError> {
    let path = state
        .backend
        .download(Path::new(&req.destination), &req.object)
        .await?;
    Ok(Json(DownloadResponse {
        path: path.display().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backends::minio::MinioBackend,
        config::ProviderKind,
        testing::{MemoryStore, test_config},
    };
    use axum::{
        body::Body,
        extract::FromRequest,
        http::{Request, StatusCode, header},
    };
    use std::sync::Arc;

    const BOUNDARY: &str = "X-TEST-BOUNDARY";

    fn state(spool_dir: &Path) -> AppState {
        let config = Arc::new(test_config(ProviderKind::Minio));
        AppState {
            backend: Arc::new(MinioBackend::new(MemoryStore::new(), config)),
            bucket: "media".into(),
            spool_dir: spool_dir.to_path_buf(),
        }
    }

    async fn form(field: &str, file_name: &str, content: &str) -> Multipart {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             {content}\r\n\
             --{BOUNDARY}--\r\n"
        );
        raw_form(body).await
    }

    async fn raw_form(body: String) -> Multipart {
        let req = Request::builder()
            .method("POST")
            .uri("/files")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        Multipart::from_request(req, &()).await.unwrap()
    }

    #[tokio::test]
    async fn upload_then_download_through_handlers() {
        let spool = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let state = state(spool.path());

        let Json(uploaded) = upload_file(
            State(state.clone()),
            Query(UploadQuery::default()),
            form("file", "hello.txt", "hello gateway").await,
        )
        .await
        .unwrap();
        assert!(uploaded.url.ends_with(".txt"));
        assert_eq!(std::fs::read_dir(spool.path()).unwrap().count(), 0);

        let Json(downloaded) = download_file(
            State(state),
            Json(DownloadRequest {
                destination: dest.path().display().to_string(),
                object: uploaded.url,
            }),
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read(downloaded.path).unwrap(), b"hello gateway");
    }

    #[tokio::test]
    async fn missing_file_field_is_bad_request() {
        let spool = tempfile::tempdir().unwrap();
        let err = upload_file(
            State(state(spool.path())),
            Query(UploadQuery { chunked: true }),
            form("attachment", "hello.txt", "hi").await,
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.kind, "empty_payload");
    }

    #[tokio::test]
    async fn download_into_missing_directory_is_bad_request() {
        let spool = tempfile::tempdir().unwrap();
        let err = download_file(
            State(state(spool.path())),
            Json(DownloadRequest {
                destination: "/nonexistent-file-path".into(),
                object: "any-key".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.kind, "invalid_path");
    }

    #[tokio::test]
    async fn truncated_form_after_file_leaves_no_spool_file() {
        let spool = tempfile::tempdir().unwrap();
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             complete file\r\n\
             --{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"note\"\r\n\r\n\
             cut off mid"
        );

        let err = upload_file(
            State(state(spool.path())),
            Query(UploadQuery::default()),
            raw_form(body).await,
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.kind, "bad_request");
        assert_eq!(std::fs::read_dir(spool.path()).unwrap().count(), 0);
    }
}
