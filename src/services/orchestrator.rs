//! Drives a chunked upload: plan parts, upload them with bounded concurrency
//! and per-part retries, then hand the session to the compose step.

use crate::{
    config::UploadPolicy,
    errors::{OssError, OssResult},
    models::{
        multipart::{MultipartSession, SessionStatus, UploadPart},
        object_key::ObjectKey,
        payload::FilePayload,
    },
    services::{
        chunker::split_parts,
        compose::{self, CompleteStrategy},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Provider side of a multipart upload.
#[async_trait]
pub trait MultipartTarget: Send + Sync {
    fn strategy(&self) -> CompleteStrategy;

    /// Open a provider session; returns its upload ID when the provider has one.
    async fn initiate(&self, key: &ObjectKey, content_type: Option<&str>) -> OssResult<Option<String>>;

    /// Upload one part and return its completion token.
    async fn upload_part(
        &self,
        session: &MultipartSession,
        part: &UploadPart,
        data: Bytes,
    ) -> OssResult<String>;

    /// Assemble the final object from the session's parts.
    async fn complete(&self, session: &MultipartSession) -> OssResult<()>;

    /// Remove temporary parts left after a successful `complete`.
    async fn cleanup(&self, _session: &MultipartSession) -> OssResult<()> {
        Ok(())
    }

    /// Drop everything the session left on the provider.
    async fn abort(&self, session: &MultipartSession) -> OssResult<()>;
}

/// Upload `payload` under `key` in parts and assemble it.
#[instrument(skip(target, payload, policy), fields(key = %key, size = payload.size()))]
pub async fn run_chunked_upload<T>(
    target: &T,
    payload: &FilePayload,
    key: ObjectKey,
    policy: &UploadPolicy,
) -> OssResult<()>
where
    T: MultipartTarget + ?Sized,
{
    let parts = split_parts(payload.size(), policy.part_size)?;
    let part_count = parts.len();
    let upload_id = target.initiate(&key, payload.content_type()).await?;
    let mut session = MultipartSession::new(
        key,
        upload_id,
        payload.content_type().map(str::to_string),
        parts,
    );

    if let Err(err) = upload_parts(target, payload, &mut session, policy).await {
        compose::abort_session(target, &mut session).await;
        return Err(err);
    }

    compose::finalize(target, &mut session).await?;
    info!(parts = part_count, "chunked upload complete");
    Ok(())
}

/// Upload every planned part of `session`, recording tokens as they arrive.
///
/// Stops at the first part that exhausts its attempts; in-flight siblings are
/// dropped with the stream.
pub async fn upload_parts<T>(
    target: &T,
    payload: &FilePayload,
    session: &mut MultipartSession,
    policy: &UploadPolicy,
) -> OssResult<()>
where
    T: MultipartTarget + ?Sized,
{
    session.status = SessionStatus::PartsUploading;

    let (tokens, failure) = {
        let shared: &MultipartSession = session;
        // Futures are built up front; none is polled until `buffer_unordered` admits it.
        let pending: Vec<_> = shared
            .parts
            .iter()
            .map(|part| upload_with_retry(target, shared, payload, part, policy))
            .collect();
        let mut uploads = stream::iter(pending).buffer_unordered(policy.concurrency.max(1));

        let mut tokens = Vec::with_capacity(shared.parts.len());
        let mut failure = None;
        while let Some(result) = uploads.next().await {
            match result {
                Ok(done) => tokens.push(done),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        (tokens, failure)
    };

    for (index, etag) in tokens {
        session.record(index, etag);
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn upload_with_retry<T>(
    target: &T,
    session: &MultipartSession,
    payload: &FilePayload,
    part: &UploadPart,
    policy: &UploadPolicy,
) -> OssResult<(usize, String)>
where
    T: MultipartTarget + ?Sized,
{
    let data = payload
        .read_range(part.offset, part.length)
        .await
        .map_err(|err| OssError::PartUpload {
            index: part.index,
            attempts: 0,
            source: Box::new(err),
        })?;

    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = match timeout(
            policy.part_timeout,
            target.upload_part(session, part, data.clone()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(OssError::provider(format!(
                "part {} timed out after {:?}",
                part.index, policy.part_timeout
            ))),
        };

        match outcome {
            Ok(etag) => {
                debug!(part = part.index, attempt, bytes = part.length, "part uploaded");
                return Ok((part.index, etag));
            }
            Err(err) if attempt < max_attempts => {
                warn!(part = part.index, attempt, error = %err, "part upload failed, retrying");
            }
            Err(err) => {
                return Err(OssError::PartUpload {
                    index: part.index,
                    attempts: attempt,
                    source: Box::new(err),
                });
            }
        }
    }
}
