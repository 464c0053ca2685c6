//! Backend-agnostic object storage client for MinIO, Aliyun OSS and Qiniu Kodo.
//!
//! Callers select a provider once through [`services::factory::new_backend`] and
//! then use the [`backends::StorageBackend`] trait for upload, download and
//! chunked upload.

pub mod backends;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod providers;
pub mod routes;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

pub use backends::StorageBackend;
pub use config::{BackendConfig, ProviderKind, UploadPolicy};
pub use errors::{OssError, OssResult};
pub use models::{object_key::ObjectKey, payload::FilePayload};
pub use services::factory::new_backend;
