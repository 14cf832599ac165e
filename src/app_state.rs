use std::error::Error;
use std::fmt::Display;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tokio_util::sync::CancellationToken;

use crate::debrid::{DebridError, DebridService, ErrorCode};
use crate::metadata::MetadataService;
use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: &'static Orchestrator,
    pub metadata_service: &'static Arc<MetadataService>,
    pub cancellation_token: CancellationToken,
}

impl AppState {
    pub fn service(&self, id: &str) -> Option<&Arc<dyn DebridService>> {
        self.orchestrator.services().iter().find(|s| s.id() == id)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AppError {
    pub message: String,
    #[serde(skip)]
    pub kind: AppErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppErrorKind {
    InternalError,
    NotFound,
    BadRequest,
    Unauthorized,
    UpstreamTimeout,
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: AppErrorKind::NotFound,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: AppErrorKind::BadRequest,
        }
    }
}

impl Error for AppError {}

impl Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            AppErrorKind::InternalError => write!(f, "Internal Error: {}", self.message),
            AppErrorKind::NotFound => write!(f, "Not Found Error: {}", self.message),
            AppErrorKind::BadRequest => write!(f, "Bad Request: {}", self.message),
            AppErrorKind::Unauthorized => write!(f, "Unauthorized: {}", self.message),
            AppErrorKind::UpstreamTimeout => write!(f, "Upstream Timeout: {}", self.message),
        }
    }
}

impl From<AppErrorKind> for StatusCode {
    fn from(val: AppErrorKind) -> Self {
        match val {
            AppErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            AppErrorKind::NotFound => StatusCode::NOT_FOUND,
            AppErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            AppErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            AppErrorKind::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            kind: AppErrorKind::InternalError,
        }
    }
}

impl From<DebridError> for AppError {
    fn from(err: DebridError) -> Self {
        let kind = match err.code {
            ErrorCode::Unauthorized | ErrorCode::Forbidden => AppErrorKind::Unauthorized,
            ErrorCode::NotFound => AppErrorKind::NotFound,
            ErrorCode::BadRequest | ErrorCode::NoMatchingFile => AppErrorKind::BadRequest,
            ErrorCode::LockTimeout | ErrorCode::Unknown => AppErrorKind::UpstreamTimeout,
            _ => AppErrorKind::InternalError,
        };
        Self {
            message: err.to_string(),
            kind,
        }
    }
}

impl From<crate::user_data::ConfigError> for AppError {
    fn from(err: crate::user_data::ConfigError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<crate::metadata::MetadataError> for AppError {
    fn from(err: crate::metadata::MetadataError) -> Self {
        match err {
            crate::metadata::MetadataError::NotFound => Self::not_found("METADATA_NOT_FOUND"),
            other => Self {
                message: other.to_string(),
                kind: AppErrorKind::InternalError,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status: StatusCode = self.kind.clone().into();
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debrid_error_status_mapping() {
        let err: AppError = DebridError::unauthorized("nope").into();
        assert_eq!(err.kind, AppErrorKind::Unauthorized);
        let err: AppError = DebridError::unknown("timeout").into();
        assert_eq!(err.kind, AppErrorKind::UpstreamTimeout);
        let err: AppError = DebridError::no_matching_file("nothing").into();
        assert_eq!(err.kind, AppErrorKind::BadRequest);
    }
}
