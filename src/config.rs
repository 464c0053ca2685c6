use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};
use tracing::warn;

/// Smallest part size every provider accepts for non-final parts.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Default part size: 13 MiB splits into 5 MiB + 5 MiB + 3 MiB.
pub const DEFAULT_PART_SIZE: u64 = 5 * 1024 * 1024;

pub const DEFAULT_CONCURRENCY: usize = 2;
pub const MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_QINIU_UPLOAD_HOST: &str = "https://up.qiniup.com";

/// Which storage provider the process talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    #[default]
    Minio,
    Aliyun,
    Qiniu,
}

impl ProviderKind {
    /// Map a configuration value to a provider.
    ///
    /// Unknown values fall back to MinIO so older configuration files keep working.
    pub fn from_setting(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "minio" => ProviderKind::Minio,
            "aliyun" => ProviderKind::Aliyun,
            "qiniu" => ProviderKind::Qiniu,
            other => {
                warn!(
                    value = other,
                    "unrecognized provider type, falling back to minio"
                );
                ProviderKind::Minio
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Minio => "minio",
            ProviderKind::Aliyun => "aliyun",
            ProviderKind::Qiniu => "qiniu",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning for chunked uploads.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub part_size: u64,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub part_timeout: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            part_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Provider connection settings, loaded once and shared read-only.
#[derive(Clone)]
pub struct BackendConfig {
    pub provider: ProviderKind,
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: String,
    pub bucket: String,
    pub region: Option<String>,
    pub upload_host: Option<String>,
    pub policy: UploadPolicy,
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("provider", &self.provider)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("upload_host", &self.upload_host)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Settings for the `serve` gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub spool_dir: PathBuf,
}

impl GatewayConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Backend-agnostic object storage client")]
pub struct Args {
    /// Provider type: minio, aliyun or qiniu (overrides OSS_CLIENT_TYPE)
    #[arg(long, global = true)]
    pub provider: Option<String>,

    /// Access key (overrides OSS_CLIENT_ACCESS_KEY)
    #[arg(long, global = true)]
    pub access_key: Option<String>,

    /// Secret key (overrides OSS_CLIENT_SECRET_KEY)
    #[arg(long, global = true)]
    pub secret_key: Option<String>,

    /// Provider endpoint URL (overrides OSS_CLIENT_ENDPOINT)
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Bucket name (overrides OSS_CLIENT_BUCKET)
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// Signing region (overrides OSS_CLIENT_REGION)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Qiniu upload host (overrides OSS_CLIENT_UPLOAD_HOST)
    #[arg(long, global = true)]
    pub upload_host: Option<String>,

    /// Part size in bytes for chunked uploads (overrides OSS_CLIENT_PART_SIZE)
    #[arg(long, global = true)]
    pub part_size: Option<u64>,

    /// Concurrent part uploads (overrides OSS_CLIENT_CONCURRENCY)
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Attempts per part before giving up (overrides OSS_CLIENT_MAX_ATTEMPTS)
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Per-request timeout in seconds (overrides OSS_CLIENT_TIMEOUT_SECS)
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload a local file and print its public URL
    Upload {
        path: PathBuf,
        /// Use the multipart upload path
        #[arg(long)]
        chunked: bool,
        /// Content type sent to the provider
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Download an object (key or public URL) into a local directory
    Download {
        object: String,
        #[arg(long, default_value = ".")]
        dest: PathBuf,
    },
    /// Run the HTTP upload gateway
    Serve {
        /// Host to bind to (overrides OSS_CLIENT_HOST)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to (overrides OSS_CLIENT_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Directory for spooled request bodies (overrides OSS_CLIENT_SPOOL_DIR)
        #[arg(long)]
        spool_dir: Option<PathBuf>,
    },
}

impl BackendConfig {
    /// Merge CLI args over environment variables over defaults.
    pub fn from_env_and_args(args: &Args) -> Result<Self> {
        Self::from_lookup(args, |name| env::var(name).ok())
    }

    fn from_lookup(args: &Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let pick = |flag: &Option<String>, name: &str| flag.clone().or_else(|| lookup(name));

        let provider = pick(&args.provider, "OSS_CLIENT_TYPE")
            .map(|value| ProviderKind::from_setting(&value))
            .unwrap_or_default();
        let access_key = required(pick(&args.access_key, "OSS_CLIENT_ACCESS_KEY"), "access key")?;
        let secret_key = required(pick(&args.secret_key, "OSS_CLIENT_SECRET_KEY"), "secret key")?;
        let endpoint = required(pick(&args.endpoint, "OSS_CLIENT_ENDPOINT"), "endpoint")?
            .trim_end_matches('/')
            .to_string();
        let bucket = required(pick(&args.bucket, "OSS_CLIENT_BUCKET"), "bucket")?;

        let part_size = merged(args.part_size, &lookup, "OSS_CLIENT_PART_SIZE")?
            .unwrap_or(DEFAULT_PART_SIZE);
        if part_size < MIN_PART_SIZE {
            bail!("part size {part_size} is below the provider minimum of {MIN_PART_SIZE} bytes");
        }
        let concurrency = merged(args.concurrency, &lookup, "OSS_CLIENT_CONCURRENCY")?
            .unwrap_or(DEFAULT_CONCURRENCY)
            .clamp(1, MAX_CONCURRENCY);
        let max_attempts = merged(args.max_attempts, &lookup, "OSS_CLIENT_MAX_ATTEMPTS")?
            .unwrap_or(DEFAULT_MAX_ATTEMPTS)
            .max(1);
        let timeout_secs = merged(args.timeout_secs, &lookup, "OSS_CLIENT_TIMEOUT_SECS")?
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Ok(Self {
            provider,
            access_key,
            secret_key,
            endpoint,
            bucket,
            region: pick(&args.region, "OSS_CLIENT_REGION"),
            upload_host: pick(&args.upload_host, "OSS_CLIENT_UPLOAD_HOST"),
            policy: UploadPolicy {
                part_size,
                concurrency,
                max_attempts,
                part_timeout: Duration::from_secs(timeout_secs),
            },
        })
    }
}

impl GatewayConfig {
    pub fn from_env_and_args(
        host: Option<String>,
        port: Option<u16>,
        spool_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let lookup = |name: &str| env::var(name).ok();
        let env_host = lookup("OSS_CLIENT_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = merged(None, &lookup, "OSS_CLIENT_PORT")?.unwrap_or(3000);
        let env_spool = lookup("OSS_CLIENT_SPOOL_DIR").unwrap_or_else(|| "./data/spool".into());

        Ok(Self {
            host: host.unwrap_or(env_host),
            port: port.unwrap_or(env_port),
            spool_dir: spool_dir.unwrap_or_else(|| PathBuf::from(env_spool)),
        })
    }
}

fn required(value: Option<String>, what: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("missing {what}: set the flag or its OSS_CLIENT_* variable"),
    }
}

fn merged<T>(flag: Option<T>, lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if flag.is_some() {
        return Ok(flag);
    }
    match lookup(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {name} value `{value}`")),
        None => Ok(None),
    }
}
