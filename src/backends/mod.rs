//! The uniform storage contract and its provider adapters.
//!
//! Every adapter is generic over a provider API trait ([`minio::MinioApi`],
//! [`aliyun::OssApi`], [`qiniu::KodoApi`]) so it can run against the real
//! transport or an in-memory store.

use crate::{
    config::ProviderKind,
    errors::OssResult,
    models::{
        object_key::ObjectKey,
        payload::{FilePayload, UploadBody},
    },
    services::url_resolver::UrlResolver,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub mod aliyun;
pub mod minio;
pub mod qiniu;

/// Upload, download and chunked upload against one provider.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn provider(&self) -> ProviderKind;

    fn resolver(&self) -> &UrlResolver;

    /// Upload `payload` in one request and return its public URL.
    async fn upload(&self, payload: &FilePayload) -> OssResult<String>;

    /// Fetch the object named by `reference` (key or public URL) into
    /// `destination` and return the written file's path.
    async fn download(&self, destination: &Path, reference: &str) -> OssResult<PathBuf>;

    /// Upload `payload` in parts and return its public URL.
    async fn chunked_upload(&self, payload: &FilePayload) -> OssResult<String>;
}

/// A single-request object write.
#[derive(Debug, Clone)]
pub struct PutObjectRequest {
    pub key: String,
    pub content_type: Option<String>,
    pub body: UploadBody,
}

/// Validate `payload` and pick the key it will be stored under.
pub(crate) async fn prepare_upload(payload: &FilePayload) -> OssResult<ObjectKey> {
    payload.ensure_not_empty().await?;
    ObjectKey::generate(payload.name())
}
