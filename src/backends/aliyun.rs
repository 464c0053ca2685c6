//! Aliyun OSS adapter, using the provider's native multipart sessions.

use super::{PutObjectRequest, StorageBackend, prepare_upload};
use crate::{
    config::{BackendConfig, ProviderKind},
    errors::OssResult,
    models::{
        multipart::{CompletedPart, MultipartSession, UploadPart},
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

/// The OSS operations the adapter relies on.
#[async_trait]
pub trait OssApi: Send + Sync {
    async fn put_object(&self, request: PutObjectRequest) -> OssResult<String>;

    /// Returns the new upload ID.
    async fn initiate_multipart_upload(&self, key: &str, content_type: Option<&str>) -> OssResult<String>;

    /// Returns the part's ETag.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> OssResult<String>;

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> OssResult<()>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> OssResult<()>;

    async fn get_object(&self, key: &str) -> OssResult<ObjectStream>;
}

pub struct AliyunBackend<C> {
    api: C,
    config: Arc<BackendConfig>,
    resolver: UrlResolver,
}

impl<C: OssApi> AliyunBackend<C> {
    pub fn new(api: C, config: Arc<BackendConfig>) -> Self {
        let resolver = UrlResolver::new(UrlStyle::VirtualHosted, &config.endpoint, &config.bucket);
        Self {
            api,
            config,
            resolver,
        }
    }

    pub fn api(&self) -> &C {
        &self.api
    }
}

#[async_trait]
impl<C: OssApi> MultipartTarget for AliyunBackend<C> {
    fn strategy(&self) -> CompleteStrategy {
        CompleteStrategy::NativeMultipart
    }

    async fn initiate(&self, key: &ObjectKey, content_type: Option<&str>) -> OssResult<Option<String>> {
        let id = self
            .api
            .initiate_multipart_upload(key.as_str(), content_type)
            .await?;
        Ok(Some(id))
    }

    async fn upload_part(
        &self,
        session: &MultipartSession,
        part: &UploadPart,
        data: Bytes,
    ) -> OssResult<String> {
        self.api
            .upload_part(
                session.key.as_str(),
                session.require_upload_id()?,
                part.part_number(),
                data,
            )
            .await
    }

    async fn complete(&self, session: &MultipartSession) -> OssResult<()> {
        self.api
            .complete_multipart_upload(
                session.key.as_str(),
                session.require_upload_id()?,
                &session.completed_parts(),
            )
            .await
    }

    async fn abort(&self, session: &MultipartSession) -> OssResult<()> {
        self.api
            .abort_multipart_upload(session.key.as_str(), session.require_upload_id()?)
            .await
    }
}

#[async_trait]
impl<C: OssApi> StorageBackend for AliyunBackend<C> {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Aliyun
    }

    fn resolver(&self) -> &UrlResolver {
        &self.resolver
    }

    #[instrument(skip(self, payload), fields(provider = "aliyun", name = payload.name()))]
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

    #[instrument(skip(self), fields(provider = "aliyun"))]
    async fn download(&self, destination: &Path, reference: &str) -> OssResult<PathBuf> {
        let target = DownloadTarget::prepare(&self.resolver, destination, reference).await?;
        let body = self.api.get_object(target.key.as_str()).await?;
        let path = target.write(body).await?;
        info!(path = %path.display(), "object downloaded");
        Ok(path)
    }

    #[instrument(skip(self, payload), fields(provider = "aliyun", name = payload.name()))]
    async fn chunked_upload(&self, payload: &FilePayload) -> OssResult<String> {
        let key = prepare_upload(payload).await?;
        run_chunked_upload(self, payload, key.clone(), &self.config.policy).await?;
        let url = self.resolver.url_for(key.as_str());
        info!(%url, "object uploaded in parts");
        Ok(url)
    }
}
