//! Picks and wires the storage backend for the configured provider.

use crate::{
    backends::{StorageBackend, aliyun::AliyunBackend, minio::MinioBackend, qiniu::QiniuBackend},
    config::{BackendConfig, ProviderKind},
    errors::OssResult,
    providers::{kodo::KodoTransport, s3::S3Transport},
};
use std::sync::Arc;
use tracing::info;

/// Region MinIO signs with when none is configured.
const MINIO_DEFAULT_REGION: &str = "us-east-1";

/// Construct the backend for `config.provider`. Sends no requests.
pub fn new_backend(config: Arc<BackendConfig>) -> OssResult<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config.provider {
        ProviderKind::Minio => {
            let region = config
                .region
                .clone()
                .unwrap_or_else(|| MINIO_DEFAULT_REGION.to_string());
            let transport = S3Transport::new(&config, region, true);
            Arc::new(MinioBackend::new(transport, config.clone()))
        }
        ProviderKind::Aliyun => {
            let region = config
                .region
                .clone()
                .unwrap_or_else(|| aliyun_region(&config.endpoint));
            let transport = S3Transport::new(&config, region, false);
            Arc::new(AliyunBackend::new(transport, config.clone()))
        }
        ProviderKind::Qiniu => {
            let transport = KodoTransport::new(&config)?;
            Arc::new(QiniuBackend::new(transport, config.clone()))
        }
    };
    info!(provider = %config.provider, bucket = %config.bucket, "storage backend ready");
    Ok(backend)
}

/// `https://oss-cn-hangzhou.aliyuncs.com` signs as `cn-hangzhou`.
fn aliyun_region(endpoint: &str) -> String {
    let host = endpoint
        .split_once("://")
        .map_or(endpoint, |(_, rest)| rest);
    let first_label = host.split(['.', '/', ':']).next().unwrap_or_default();
    let region = first_label
        .strip_prefix("oss-")
        .unwrap_or(first_label)
        .trim_end_matches("-internal");
    if region.is_empty() {
        "cn-hangzhou".to_string()
    } else {
        region.to_string()
    }
}
