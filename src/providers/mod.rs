//! Wire transports for the provider API traits.
//!
//! - [`s3::S3Transport`] speaks the S3 protocol and serves MinIO and Aliyun OSS.
//! - [`kodo::KodoTransport`] speaks Qiniu Kodo's native upload API.

use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;

pub mod kodo;
pub mod s3;

/// Object body as it arrives from a provider.
pub type ObjectStream = BoxStream<'static, io::Result<Bytes>>;
