//! Qiniu Kodo transport: upload tokens, form upload, resumable upload v2, and
//! plain GETs against the bucket domain.

use super::ObjectStream;
use crate::{
    backends::{PutObjectRequest, qiniu::KodoApi},
    config::{BackendConfig, DEFAULT_QINIU_UPLOAD_HOST},
    errors::{OssError, OssResult},
    models::{multipart::CompletedPart, payload::UploadBody},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use bytes::Bytes;
use chrono::Utc;
use futures::TryStreamExt;
use hmac::{Hmac, Mac};
use reqwest::{
    Body, Client, RequestBuilder, Response, StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE},
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha1::Sha1;
use std::{io, time::Duration};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

type HmacSha1 = Hmac<Sha1>;

/// Upload tokens stay valid this long.
const TOKEN_TTL_SECS: i64 = 3600;

#[derive(Clone)]
pub struct KodoTransport {
    http: Client,
    access_key: String,
    secret_key: String,
    bucket: String,
    up_host: String,
    part_timeout: Duration,
}

#[derive(Deserialize)]
struct FormUploadResponse {
    hash: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitPartsResponse {
    upload_id: String,
}

#[derive(Deserialize)]
struct UploadPartResponse {
    etag: String,
    md5: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletePart<'a> {
    etag: &'a str,
    part_number: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletePartsRequest<'a> {
    parts: Vec<CompletePart<'a>>,
    fname: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<&'a str>,
}

impl KodoTransport {
    pub fn new(config: &BackendConfig) -> OssResult<Self> {
        let http = Client::builder()
            .connect_timeout(config.policy.part_timeout)
            .build()
            .map_err(|err| OssError::provider(format!("building http client: {err}")))?;
        let up_host = config
            .upload_host
            .as_deref()
            .unwrap_or(DEFAULT_QINIU_UPLOAD_HOST)
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            http,
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            bucket: config.bucket.clone(),
            up_host,
            part_timeout: config.policy.part_timeout,
        })
    }

    /// Token authorizing an upload to `key`, valid for an hour.
    pub fn upload_token(&self, key: &str) -> OssResult<String> {
        self.upload_token_until(key, Utc::now().timestamp() + TOKEN_TTL_SECS)
    }

    fn upload_token_until(&self, key: &str, deadline: i64) -> OssResult<String> {
        let policy = json!({
            "scope": format!("{}:{}", self.bucket, key),
            "deadline": deadline,
        });
        let encoded_policy = URL_SAFE.encode(policy.to_string());
        let mut mac = HmacSha1::new_from_slice(self.secret_key.as_bytes())
            .map_err(|err| OssError::provider(format!("signing upload token: {err}")))?;
        mac.update(encoded_policy.as_bytes());
        let sign = URL_SAFE.encode(mac.finalize().into_bytes());
        Ok(format!("{}:{sign}:{encoded_policy}", self.access_key))
    }

    fn uploads_url(&self, key: &str) -> String {
        format!(
            "{}/buckets/{}/objects/{}/uploads",
            self.up_host,
            self.bucket,
            URL_SAFE.encode(key)
        )
    }

    fn auth_header(&self, key: &str) -> OssResult<String> {
        Ok(format!("UpToken {}", self.upload_token(key)?))
    }

    /// A part PUT; only part calls carry a whole-request deadline.
    fn part_request(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
        md5: &str,
    ) -> OssResult<RequestBuilder> {
        Ok(self
            .http
            .put(format!("{}/{upload_id}/{part_number}", self.uploads_url(key)))
            .timeout(self.part_timeout)
            .header(AUTHORIZATION, self.auth_header(key)?)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header("Content-MD5", md5)
            .body(data))
    }
}

/// Turn a non-2xx response into a provider error carrying the body.
async fn checked(op: &str, resp: Response) -> OssResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(OssError::provider(format!("{op}: {status}: {body}")))
}

fn http_error(op: &str, err: reqwest::Error) -> OssError {
    OssError::provider(format!("{op}: {err}"))
}

#[async_trait]
impl KodoApi for KodoTransport {
    async fn form_upload(&self, request: PutObjectRequest) -> OssResult<String> {
        let len = request.body.len();
        let body = match request.body {
            UploadBody::Memory(data) => Body::from(data),
            UploadBody::File { path, .. } => {
                Body::wrap_stream(ReaderStream::new(File::open(&path).await?))
            }
        };
        let mut file = Part::stream_with_length(body, len).file_name(request.key.clone());
        if let Some(ct) = request.content_type.as_deref() {
            file = file
                .mime_str(ct)
                .map_err(|err| OssError::InvalidInput(format!("content type `{ct}`: {err}")))?;
        }
        let form = Form::new()
            .text("token", self.upload_token(&request.key)?)
            .text("key", request.key.clone())
            .part("file", file);

        let resp = self
            .http
            .post(&self.up_host)
            .multipart(form)
            .send()
            .await
            .map_err(|err| http_error("form upload", err))?;
        let body: FormUploadResponse = checked("form upload", resp)
            .await?
            .json()
            .await
            .map_err(|err| http_error("form upload", err))?;
        Ok(body.hash)
    }

    async fn init_parts(&self, key: &str) -> OssResult<String> {
        let resp = self
            .http
            .post(self.uploads_url(key))
            .header(AUTHORIZATION, self.auth_header(key)?)
            .send()
            .await
            .map_err(|err| http_error("init parts", err))?;
        let body: InitPartsResponse = checked("init parts", resp)
            .await?
            .json()
            .await
            .map_err(|err| http_error("init parts", err))?;
        debug!(key, upload_id = %body.upload_id, "resumable upload opened");
        Ok(body.upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> OssResult<String> {
        let expected_md5 = format!("{:x}", md5::compute(&data));
        let resp = self
            .part_request(key, upload_id, part_number, data, &expected_md5)?
            .send()
            .await
            .map_err(|err| http_error("upload part", err))?;
        let body: UploadPartResponse = checked("upload part", resp)
            .await?
            .json()
            .await
            .map_err(|err| http_error("upload part", err))?;
        if let Some(md5) = body.md5.as_deref() {
            if md5 != expected_md5 {
                return Err(OssError::provider(format!(
                    "part {part_number} md5 mismatch: sent {expected_md5}, stored {md5}"
                )));
            }
        }
        Ok(body.etag)
    }

    async fn complete_parts(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
        content_type: Option<&str>,
    ) -> OssResult<()> {
        let request = CompletePartsRequest {
            parts: parts
                .iter()
                .map(|p| CompletePart {
                    etag: &p.etag,
                    part_number: p.part_number,
                })
                .collect(),
            fname: key,
            mime_type: content_type,
        };
        let resp = self
            .http
            .post(format!("{}/{upload_id}", self.uploads_url(key)))
            .header(AUTHORIZATION, self.auth_header(key)?)
            .json(&request)
            .send()
            .await
            .map_err(|err| http_error("complete parts", err))?;
        checked("complete parts", resp).await?;
        Ok(())
    }

    async fn abort_parts(&self, key: &str, upload_id: &str) -> OssResult<()> {
        let resp = self
            .http
            .delete(format!("{}/{upload_id}", self.uploads_url(key)))
            .header(AUTHORIZATION, self.auth_header(key)?)
            .send()
            .await
            .map_err(|err| http_error("abort parts", err))?;
        checked("abort parts", resp).await?;
        Ok(())
    }

    async fn fetch(&self, url: &str) -> OssResult<ObjectStream> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| http_error("fetch", err))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(OssError::NotFound(url.to_string()));
        }
        let resp = checked("fetch", resp).await?;
        Ok(Box::pin(resp.bytes_stream().map_err(io::Error::other)))
    }
}
