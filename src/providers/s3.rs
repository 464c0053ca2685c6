//! S3-protocol transport over `aws-sdk-s3`.
//!
//! MinIO is addressed path-style, Aliyun OSS virtual-hosted through its
//! S3-compatible endpoint. SDK retries are disabled: only part uploads are
//! retried, and the orchestrator owns that.

use super::ObjectStream;
use crate::{
    backends::{
        PutObjectRequest,
        aliyun::OssApi,
        minio::{ComposeObjectRequest, DeleteError, MinioApi},
    },
    config::BackendConfig,
    errors::{OssError, OssResult},
    models::{multipart::CompletedPart, payload::UploadBody},
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{
        BehaviorVersion, Credentials, Region, RequestChecksumCalculation,
        ResponseChecksumValidation, http::HttpResponse, retry::RetryConfig,
        timeout::TimeoutConfig,
    },
    error::{DisplayErrorContext, SdkError},
    operation::get_object::GetObjectError,
    primitives::ByteStream,
    types::{self, CompletedMultipartUpload, Delete, ObjectIdentifier},
};
use bytes::Bytes;
use std::{error::Error as StdError, fmt::Debug, io};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Keys per `DeleteObjects` request.
const DELETE_BATCH: usize = 1000;

#[derive(Clone, Debug)]
pub struct S3Transport {
    client: Client,
    bucket: String,
}

impl S3Transport {
    /// Build a client for `config`; no request is sent until first use.
    pub fn new(config: &BackendConfig, region: String, path_style: bool) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "oss-client",
        );
        // Part attempts are bounded by the orchestrator; whole-object transfers
        // may run as long as they need.
        let timeouts = TimeoutConfig::builder()
            .connect_timeout(config.policy.part_timeout)
            .build();
        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region))
            .endpoint_url(config.endpoint.clone())
            .force_path_style(path_style)
            .timeout_config(timeouts)
            .retry_config(RetryConfig::disabled())
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .build();
        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket.clone(),
        }
    }

    async fn put(&self, request: PutObjectRequest) -> OssResult<String> {
        let len = request.body.len();
        let body = match request.body {
            UploadBody::Memory(data) => ByteStream::from(data),
            UploadBody::File { path, .. } => ByteStream::from_path(&path)
                .await
                .map_err(|err| OssError::Io(io::Error::other(err)))?,
        };
        let out = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&request.key)
            .set_content_type(request.content_type)
            .content_length(len as i64)
            .body(body)
            .send()
            .await
            .map_err(|err| sdk_error("PutObject", err))?;
        Ok(out.e_tag().map(trim_etag).unwrap_or_default())
    }

    async fn get(&self, key: &str) -> OssResult<ObjectStream> {
        match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(out) => Ok(Box::pin(ReaderStream::new(out.body.into_async_read()))),
            Err(err) if is_missing(&err) => Err(OssError::NotFound(key.to_string())),
            Err(err) => Err(sdk_error("GetObject", err)),
        }
    }

    async fn create_upload(&self, key: &str, content_type: Option<&str>) -> OssResult<String> {
        let out = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|err| sdk_error("CreateMultipartUpload", err))?;
        out.upload_id()
            .map(str::to_string)
            .ok_or_else(|| OssError::provider(format!("CreateMultipartUpload for `{key}` returned no upload id")))
    }

    async fn complete_upload(&self, key: &str, upload_id: &str, parts: &[CompletedPart]) -> OssResult<()> {
        let parts = parts
            .iter()
            .map(|p| {
                types::CompletedPart::builder()
                    .part_number(p.part_number as i32)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
            .send()
            .await
            .map_err(|err| sdk_error("CompleteMultipartUpload", err))?;
        Ok(())
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) -> OssResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|err| sdk_error("AbortMultipartUpload", err))?;
        Ok(())
    }
}

#[async_trait]
impl MinioApi for S3Transport {
    async fn put_object(&self, request: PutObjectRequest) -> OssResult<String> {
        self.put(request).await
    }

    /// Server-side concatenation: a multipart upload on the target key with one
    /// `UploadPartCopy` per source.
    async fn compose_object(&self, request: ComposeObjectRequest) -> OssResult<()> {
        let upload_id = self
            .create_upload(&request.key, request.content_type.as_deref())
            .await?;

        let mut copied = Vec::with_capacity(request.sources.len());
        for (i, source) in request.sources.iter().enumerate() {
            let part_number = i as u32 + 1;
            let result = self
                .client
                .upload_part_copy()
                .bucket(&self.bucket)
                .key(&request.key)
                .upload_id(&upload_id)
                .part_number(part_number as i32)
                .copy_source(format!("{}/{}", self.bucket, urlencoding::encode(&source.key)))
                .send()
                .await;
            match result {
                Ok(out) => {
                    let etag = out
                        .copy_part_result()
                        .and_then(|r| r.e_tag())
                        .map(trim_etag)
                        .unwrap_or_default();
                    debug!(source = %source.key, part_number, "source copied");
                    copied.push(CompletedPart { part_number, etag });
                }
                Err(err) => {
                    let err = sdk_error("UploadPartCopy", err);
                    if let Err(abort_err) = self.abort_upload(&request.key, &upload_id).await {
                        warn!(key = %request.key, error = %abort_err, "failed to abort compose upload");
                    }
                    return Err(err);
                }
            }
        }

        if let Err(err) = self.complete_upload(&request.key, &upload_id, &copied).await {
            if let Err(abort_err) = self.abort_upload(&request.key, &upload_id).await {
                warn!(key = %request.key, error = %abort_err, "failed to abort compose upload");
            }
            return Err(err);
        }
        Ok(())
    }

    async fn remove_objects(&self, keys: Vec<String>) -> OssResult<Vec<DeleteError>> {
        let mut failed = Vec::new();
        for batch in keys.chunks(DELETE_BATCH) {
            let ids = batch
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| OssError::provider(format!("building delete request: {err}")))?;
            let delete = Delete::builder()
                .set_objects(Some(ids))
                .quiet(true)
                .build()
                .map_err(|err| OssError::provider(format!("building delete request: {err}")))?;
            let out = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|err| sdk_error("DeleteObjects", err))?;
            failed.extend(out.errors().iter().map(|e| DeleteError {
                key: e.key().unwrap_or_default().to_string(),
                message: e.message().unwrap_or("unknown error").to_string(),
            }));
        }
        Ok(failed)
    }

    async fn get_object(&self, key: &str) -> OssResult<ObjectStream> {
        self.get(key).await
    }
}

#[async_trait]
impl OssApi for S3Transport {
    async fn put_object(&self, request: PutObjectRequest) -> OssResult<String> {
        self.put(request).await
    }

    async fn initiate_multipart_upload(&self, key: &str, content_type: Option<&str>) -> OssResult<String> {
        self.create_upload(key, content_type).await
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> OssResult<String> {
        let out = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| sdk_error("UploadPart", err))?;
        out.e_tag()
            .map(trim_etag)
            .ok_or_else(|| OssError::provider(format!("UploadPart {part_number} returned no ETag")))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> OssResult<()> {
        self.complete_upload(key, upload_id, parts).await
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> OssResult<()> {
        self.abort_upload(key, upload_id).await
    }

    async fn get_object(&self, key: &str) -> OssResult<ObjectStream> {
        self.get(key).await
    }
}

fn sdk_error<E, R>(op: &str, err: SdkError<E, R>) -> OssError
where
    E: StdError + 'static,
    R: Debug,
{
    OssError::provider(format!("{op}: {}", DisplayErrorContext(&err)))
}

/// `NoSuchKey`, or a bare 404 from servers that omit the error body on GET.
fn is_missing(err: &SdkError<GetObjectError, HttpResponse>) -> bool {
    err.as_service_error().is_some_and(GetObjectError::is_no_such_key)
        || err.raw_response().is_some_and(|r| r.status().as_u16() == 404)
}

fn trim_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ProviderKind, testing::test_config};

    #[test]
    fn etags_lose_their_quotes() {
        assert_eq!(trim_etag("\"abc123\""), "abc123");
        assert_eq!(trim_etag("abc123"), "abc123");
    }

    #[tokio::test]
    async fn building_a_transport_does_no_io() {
        let config = test_config(ProviderKind::Minio);
        let transport = S3Transport::new(&config, "us-east-1".into(), true);
        assert_eq!(transport.bucket, "media");
        assert!(transport.client.config().region().is_some());
    }
}
