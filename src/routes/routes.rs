//! Routes for the upload gateway.
//!
//! - `POST /files`          multipart upload (`file` field), `?chunked=true` for parts
//! - `POST /files/download` fetch an object into a local directory
//! - `GET  /healthz`        liveness
//! - `GET  /readyz`         spool directory probe

use crate::{
    backends::StorageBackend,
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{download_file, upload_file},
    },
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::{path::PathBuf, sync::Arc};

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn StorageBackend>,
    pub bucket: String,
    /// Request bodies are streamed here before upload.
    pub spool_dir: PathBuf,
}

/// Build the gateway router.
///
/// Request bodies are spooled to disk, so axum's in-memory body limit is lifted.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/files", post(upload_file))
        .route("/files/download", post(download_file))
        .layer(DefaultBodyLimit::disable())
}
