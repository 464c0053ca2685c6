use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Every failure the storage client can surface to a caller.
#[derive(Debug, Error)]
pub enum OssError {
    #[error("payload is empty: {0}")]
    EmptyPayload(String),
    #[error("invalid local path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("part {index} failed after {attempts} attempt(s): {source}")]
    PartUpload {
        index: usize,
        attempts: u32,
        #[source]
        source: Box<OssError>,
    },
    #[error("failed to assemble `{key}`: {source}")]
    Compose {
        key: String,
        #[source]
        source: Box<OssError>,
    },
    #[error("provider request failed: {0}")]
    Provider(String),
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type OssResult<T> = Result<T, OssError>;

impl OssError {
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn invalid_path(path: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable, machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            OssError::EmptyPayload(_) => "empty_payload",
            OssError::InvalidPath { .. } => "invalid_path",
            OssError::InvalidInput(_) => "invalid_input",
            OssError::PartUpload { .. } => "part_upload",
            OssError::Compose { .. } => "compose",
            OssError::Provider(_) => "provider",
            OssError::NotFound(_) => "not_found",
            OssError::Io(_) => "io",
        }
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl AppError {
    /// A 400 for requests that never reach the storage client.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "bad_request",
            message: msg.into(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "kind": self.kind,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<OssError> for AppError {
    fn from(err: OssError) -> Self {
        let status = match &err {
            OssError::EmptyPayload(_) | OssError::InvalidPath { .. } | OssError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            OssError::NotFound(_) => StatusCode::NOT_FOUND,
            OssError::PartUpload { .. } | OssError::Compose { .. } | OssError::Provider(_) => {
                StatusCode::BAD_GATEWAY
            }
            OssError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
