//! Qiniu Kodo adapter. Uploads go through upload tokens and the resumable
//! upload API; downloads fetch the public URL on the bucket domain.

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

/// The Kodo operations the adapter relies on.
#[async_trait]
pub trait KodoApi: Send + Sync {
    /// Single-request form upload; returns the provider's content hash.
    async fn form_upload(&self, request: PutObjectRequest) -> OssResult<String>;

    /// Open a resumable upload for `key`; returns the upload ID.
    async fn init_parts(&self, key: &str) -> OssResult<String>;

    /// Returns the part's etag.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> OssResult<String>;

    async fn complete_parts(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
        content_type: Option<&str>,
    ) -> OssResult<()>;

    async fn abort_parts(&self, key: &str, upload_id: &str) -> OssResult<()>;

    /// GET a public object URL.
    async fn fetch(&self, url: &str) -> OssResult<ObjectStream>;
}

pub struct QiniuBackend<C> {
    api: C,
    config: Arc<BackendConfig>,
    resolver: UrlResolver,
}

impl<C: KodoApi> QiniuBackend<C> {
    pub fn new(api: C, config: Arc<BackendConfig>) -> Self {
        let resolver = UrlResolver::new(UrlStyle::BucketDomain, &config.endpoint, &config.bucket);
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
impl<C: KodoApi> MultipartTarget for QiniuBackend<C> {
    fn strategy(&self) -> CompleteStrategy {
        CompleteStrategy::NativeMultipart
    }

    async fn initiate(&self, key: &ObjectKey, _content_type: Option<&str>) -> OssResult<Option<String>> {
        Ok(Some(self.api.init_parts(key.as_str()).await?))
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
            .complete_parts(
                session.key.as_str(),
                session.require_upload_id()?,
                &session.completed_parts(),
                session.content_type.as_deref(),
            )
            .await
    }

    async fn abort(&self, session: &MultipartSession) -> OssResult<()> {
        self.api
            .abort_parts(session.key.as_str(), session.require_upload_id()?)
            .await
    }
}

#[async_trait]
impl<C: KodoApi> StorageBackend for QiniuBackend<C> {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Qiniu
    }

    fn resolver(&self) -> &UrlResolver {
        &self.resolver
    }

    #[instrument(skip(self, payload), fields(provider = "qiniu", name = payload.name()))]
    async fn upload(&self, payload: &FilePayload) -> OssResult<String> {
        let key = prepare_upload(payload).await?;
        self.api
            .form_upload(PutObjectRequest {
                key: key.to_string(),
                content_type: payload.content_type().map(str::to_string),
                body: payload.body(),
            })
            .await?;
        let url = self.resolver.url_for(key.as_str());
        info!(%url, "object uploaded");
        Ok(url)
    }

    #[instrument(skip(self), fields(provider = "qiniu"))]
    async fn download(&self, destination: &Path, reference: &str) -> OssResult<PathBuf> {
        let target = DownloadTarget::prepare(&self.resolver, destination, reference).await?;
        let body = self.api.fetch(&self.resolver.url_for(target.key.as_str())).await?;
        let path = target.write(body).await?;
        info!(path = %path.display(), "object downloaded");
        Ok(path)
    }

    #[instrument(skip(self, payload), fields(provider = "qiniu", name = payload.name()))]
    async fn chunked_upload(&self, payload: &FilePayload) -> OssResult<String> {
        let key = prepare_upload(payload).await?;
        run_chunked_upload(self, payload, key.clone(), &self.config.policy).await?;
        let url = self.resolver.url_for(key.as_str());
        info!(%url, "object uploaded in parts");
        Ok(url)
    }
}
