//! In-memory provider for adapter tests, with fault injection.

use crate::{
    backends::{
        PutObjectRequest,
        aliyun::OssApi,
        minio::{ComposeObjectRequest, DeleteError, MinioApi},
        qiniu::KodoApi,
    },
    config::{BackendConfig, ProviderKind, UploadPolicy},
    errors::{OssError, OssResult},
    models::{multipart::CompletedPart, payload::UploadBody},
    providers::ObjectStream,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::{
    collections::{BTreeMap, HashMap},
    io,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

pub fn test_config(provider: ProviderKind) -> BackendConfig {
    let endpoint = match provider {
        ProviderKind::Minio => "http://127.0.0.1:9000",
        ProviderKind::Aliyun => "https://oss-cn-hangzhou.aliyuncs.com",
        ProviderKind::Qiniu => "http://cdn.example.com",
    };
    BackendConfig {
        provider,
        access_key: "test-ak".into(),
        secret_key: "test-sk".into(),
        endpoint: endpoint.into(),
        bucket: "media".into(),
        region: None,
        upload_host: None,
        policy: UploadPolicy::default(),
    }
}

struct Session {
    key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<String, Bytes>,
    sessions: HashMap<String, Session>,
    /// Remaining failures per zero-based part index; `None` fails forever.
    part_failures: HashMap<usize, Option<u32>>,
    fail_compose: bool,
    fail_removals: bool,
    next_upload: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    part_calls: AtomicUsize,
    file_bodies: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn etag_of(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Zero-based index encoded in a `<key>.part<index>` object name.
fn part_index_of(key: &str) -> Option<usize> {
    key.rsplit_once(".part")
        .and_then(|(_, index)| index.parse().ok())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every part upload, so timeouts and overlap can be observed.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail part `index` the next `times` attempts, or forever with `None`.
    pub fn fail_part(&self, index: usize, times: Option<u32>) {
        self.lock().part_failures.insert(index, times);
    }

    pub fn fail_compose(&self, fail: bool) {
        self.lock().fail_compose = fail;
    }

    pub fn fail_removals(&self, fail: bool) {
        self.lock().fail_removals = fail;
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.lock().objects.get(key).cloned()
    }

    /// Stored keys in lexical order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn part_calls(&self) -> usize {
        self.part_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Single-request writes that arrived as a file rather than bytes.
    pub fn file_bodies(&self) -> usize {
        self.file_bodies.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Common entry for every part upload attempt.
    async fn part_attempt(&self, index: usize) -> OssResult<InFlight<'_>> {
        self.part_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.lock();
        match state.part_failures.get_mut(&index) {
            Some(None) => Err(OssError::provider(format!("injected failure for part {index}"))),
            Some(Some(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(OssError::provider(format!("injected failure for part {index}")))
            }
            _ => Ok(guard),
        }
    }

    async fn put(&self, request: PutObjectRequest) -> OssResult<String> {
        let data = match request.body {
            UploadBody::Memory(data) => data,
            UploadBody::File { path, len } => {
                self.file_bodies.fetch_add(1, Ordering::SeqCst);
                let data = Bytes::from(tokio::fs::read(&path).await?);
                assert_eq!(data.len() as u64, len, "declared length of {}", path.display());
                data
            }
        };
        let etag = etag_of(&data);
        self.lock().objects.insert(request.key, data);
        Ok(etag)
    }

    fn stream_of(&self, key: &str) -> OssResult<ObjectStream> {
        let data = self
            .object(key)
            .ok_or_else(|| OssError::NotFound(key.to_string()))?;
        // Split into two chunks so writers see more than one frame.
        let mid = data.len() / 2;
        let chunks: Vec<io::Result<Bytes>> = vec![Ok(data.slice(..mid)), Ok(data.slice(mid..))];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    fn open_session(&self, key: &str) -> String {
        let mut state = self.lock();
        state.next_upload += 1;
        let id = format!("upload-{}", state.next_upload);
        state.sessions.insert(
            id.clone(),
            Session {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        id
    }

    async fn store_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> OssResult<String> {
        let _guard = self.part_attempt(part_number as usize - 1).await?;
        let etag = etag_of(&data);
        let mut state = self.lock();
        let session = state
            .sessions
            .get_mut(upload_id)
            .filter(|s| s.key == key)
            .ok_or_else(|| OssError::provider(format!("no such upload {upload_id}")))?;
        session.parts.insert(part_number, (etag.clone(), data));
        Ok(etag)
    }

    fn finish_session(&self, key: &str, upload_id: &str, parts: &[CompletedPart]) -> OssResult<()> {
        let mut state = self.lock();
        if state.fail_compose {
            return Err(OssError::provider("injected complete failure"));
        }
        let session = state
            .sessions
            .get(upload_id)
            .filter(|s| s.key == key)
            .ok_or_else(|| OssError::provider(format!("no such upload {upload_id}")))?;
        let mut body = BytesMut::new();
        let mut last = 0;
        for part in parts {
            if part.part_number <= last {
                return Err(OssError::provider("parts out of order"));
            }
            last = part.part_number;
            match session.parts.get(&part.part_number) {
                Some((etag, data)) if *etag == part.etag => body.extend_from_slice(data),
                _ => {
                    return Err(OssError::provider(format!(
                        "part {} missing or etag mismatch",
                        part.part_number
                    )));
                }
            }
        }
        state.sessions.remove(upload_id);
        state.objects.insert(key.to_string(), body.freeze());
        Ok(())
    }

    fn drop_session(&self, upload_id: &str) {
        self.lock().sessions.remove(upload_id);
    }
}

#[async_trait]
impl MinioApi for MemoryStore {
    async fn put_object(&self, request: PutObjectRequest) -> OssResult<String> {
        if let Some(index) = part_index_of(&request.key) {
            let _guard = self.part_attempt(index).await?;
            return self.put(request).await;
        }
        self.put(request).await
    }

    async fn compose_object(&self, request: ComposeObjectRequest) -> OssResult<()> {
        let mut state = self.lock();
        if state.fail_compose {
            return Err(OssError::provider("injected compose failure"));
        }
        let mut body = BytesMut::new();
        for source in &request.sources {
            let data = state
                .objects
                .get(&source.key)
                .ok_or_else(|| OssError::NotFound(source.key.clone()))?;
            body.extend_from_slice(data);
        }
        state.objects.insert(request.key, body.freeze());
        Ok(())
    }

    async fn remove_objects(&self, keys: Vec<String>) -> OssResult<Vec<DeleteError>> {
        let mut state = self.lock();
        if state.fail_removals {
            return Ok(keys
                .into_iter()
                .map(|key| DeleteError {
                    key,
                    message: "injected removal failure".into(),
                })
                .collect());
        }
        for key in keys {
            state.objects.remove(&key);
        }
        Ok(Vec::new())
    }

    async fn get_object(&self, key: &str) -> OssResult<ObjectStream> {
        self.stream_of(key)
    }
}

#[async_trait]
impl OssApi for MemoryStore {
    async fn put_object(&self, request: PutObjectRequest) -> OssResult<String> {
        self.put(request).await
    }

    async fn initiate_multipart_upload(&self, key: &str, _content_type: Option<&str>) -> OssResult<String> {
        Ok(self.open_session(key))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> OssResult<String> {
        self.store_part(key, upload_id, part_number, data).await
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> OssResult<()> {
        self.finish_session(key, upload_id, parts)
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> OssResult<()> {
        self.drop_session(upload_id);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> OssResult<ObjectStream> {
        self.stream_of(key)
    }
}

#[async_trait]
impl KodoApi for MemoryStore {
    async fn form_upload(&self, request: PutObjectRequest) -> OssResult<String> {
        self.put(request).await
    }

    async fn init_parts(&self, key: &str) -> OssResult<String> {
        Ok(self.open_session(key))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> OssResult<String> {
        self.store_part(key, upload_id, part_number, data).await
    }

    async fn complete_parts(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
        _content_type: Option<&str>,
    ) -> OssResult<()> {
        self.finish_session(key, upload_id, parts)
    }

    async fn abort_parts(&self, _key: &str, upload_id: &str) -> OssResult<()> {
        self.drop_session(upload_id);
        Ok(())
    }

    async fn fetch(&self, url: &str) -> OssResult<ObjectStream> {
        let path = url
            .split_once("://")
            .and_then(|(_, rest)| rest.split_once('/'))
            .map(|(_, path)| path)
            .ok_or_else(|| OssError::InvalidInput(format!("not an object url: {url}")))?;
        self.stream_of(path)
    }
}
