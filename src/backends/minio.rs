//! MinIO adapter.
//!
//! MinIO has no resumable session here: every part is written as an ordinary
//! object named `<key>.part<index>`, then composed server-side into the final
//! key, then removed.

use super::{PutObjectRequest, StorageBackend, prepare_upload};
use crate::{
    config::{BackendConfig, ProviderKind},
    errors::{OssError, OssResult},
    models::{
        multipart::{MultipartSession, UploadPart},
        object_key::ObjectKey,
        payload::FilePayload,
    },
    providers::ObjectStream,
    services::{
        compose::CompleteStrategy,
        download::DownloadTarget,
        orchestrator::{MultipartTarget, run_chunked_upload},
        url_resolver::{UrlResolver, UrlStyle},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, instrument};

/// One source object of a server-side compose, in assembly order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeSource {
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct ComposeObjectRequest {
    pub key: String,
    pub content_type: Option<String>,
    pub sources: Vec<ComposeSource>,
}

/// A key the provider refused to delete.
#[derive(Debug, Clone)]
pub struct DeleteError {
    pub key: String,
    pub message: String,
}

/// The MinIO operations the adapter relies on.
#[async_trait]
pub trait MinioApi: Send + Sync {
    /// Returns the stored object's ETag.
    async fn put_object(&self, request: PutObjectRequest) -> OssResult<String>;

    async fn compose_object(&self, request: ComposeObjectRequest) -> OssResult<()>;

    /// Delete `keys`, returning the ones that could not be removed.
    async fn remove_objects(&self, keys: Vec<String>) -> OssResult<Vec<DeleteError>>;

    async fn get_object(&self, key: &str) -> OssResult<ObjectStream>;
}

/// Name of the temporary object holding part `index` of `key`.
pub fn part_key(key: &ObjectKey, index: usize) -> String {
    format!("{key}.part{index}")
}

pub struct MinioBackend<C> {
    api: C,
    config: Arc<BackendConfig>,
    resolver: UrlResolver,
}

impl<C: MinioApi> MinioBackend<C> {
    pub fn new(api: C, config: Arc<BackendConfig>) -> Self {
        let resolver = UrlResolver::new(UrlStyle::PathStyle, &config.endpoint, &config.bucket);
        Self {
            api,
            config,
            resolver,
        }
    }

    pub fn api(&self) -> &C {
        &self.api
    }

    async fn remove_parts(&self, session: &MultipartSession) -> OssResult<()> {
        let keys = session
            .parts
            .iter()
            .map(|p| part_key(&session.key, p.index))
            .collect();
        let failed = self.api.remove_objects(keys).await?;
        if failed.is_empty() {
            return Ok(());
        }
        let detail = failed
            .iter()
            .map(|e| format!("{}: {}", e.key, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(OssError::provider(format!(
            "{} temporary part(s) not removed: {detail}",
            failed.len()
        )))
    }
}

#[async_trait]
impl<C: MinioApi> MultipartTarget for MinioBackend<C> {
    fn strategy(&self) -> CompleteStrategy {
        CompleteStrategy::ComposeAndCleanup
    }

    async fn initiate(&self, _key: &ObjectKey, _content_type: Option<&str>) -> OssResult<Option<String>> {
        Ok(None)
    }

    async fn upload_part(
        &self,
        session: &MultipartSession,
        part: &UploadPart,
        data: Bytes,
    ) -> OssResult<String> {
        self.api
            .put_object(PutObjectRequest {
                key: part_key(&session.key, part.index),
                content_type: None,
                body: data.into(),
            })
            .await
    }

    async fn complete(&self, session: &MultipartSession) -> OssResult<()> {
        let mut parts: Vec<&UploadPart> = session.parts.iter().collect();
        parts.sort_by_key(|p| p.index);
        let sources = parts
            .into_iter()
            .map(|p| ComposeSource {
                key: part_key(&session.key, p.index),
            })
            .collect();
        self.api
            .compose_object(ComposeObjectRequest {
                key: session.key.to_string(),
                content_type: session.content_type.clone(),
                sources,
            })
            .await
    }

    async fn cleanup(&self, session: &MultipartSession) -> OssResult<()> {
        self.remove_parts(session).await
    }

    async fn abort(&self, session: &MultipartSession) -> OssResult<()> {
        self.remove_parts(session).await
    }
}

#[async_trait]
impl<C: MinioApi> StorageBackend for MinioBackend<C> {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Minio
    }

    fn resolver(&self) -> &UrlResolver {
        &self.resolver
    }

    #[instrument(skip(self, payload), fields(provider = "minio", name = payload.name()))]
    async fn upload(&self, payload: &FilePayload) -> OssResult<String> {
        let key = prepare_upload(payload).await?;
        self.api
            .put_object(PutObjectRequest {
                key: key.to_string(),
                content_type: payload.content_type().map(str::to_string),
                body: payload.body(),
            })
            .await?;
        let url = self.resolver.url_for(key.as_str());
        info!(%url, "object uploaded");
        Ok(url)
    }

    #[instrument(skip(self), fields(provider = "minio"))]
    async fn download(&self, destination: &Path, reference: &str) -> OssResult<PathBuf> {
        let target = DownloadTarget::prepare(&self.resolver, destination, reference).await?;
        let body = self.api.get_object(target.key.as_str()).await?;
        let path = target.write(body).await?;
        info!(path = %path.display(), "object downloaded");
        Ok(path)
    }

    #[instrument(skip(self, payload), fields(provider = "minio", name = payload.name()))]
    async fn chunked_upload(&self, payload: &FilePayload) -> OssResult<String> {
        let key = prepare_upload(payload).await?;
        run_chunked_upload(self, payload, key.clone(), &self.config.policy).await?;
        let url = self.resolver.url_for(key.as_str());
        info!(%url, "object uploaded in parts");
        Ok(url)
    }
}
