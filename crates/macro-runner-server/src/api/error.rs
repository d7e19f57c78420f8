use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use excel_macro_runner::MacroError;

use super::dto::ErrorBody;
use crate::service::ServiceError;

/// Everything a handler can fail with. Rendered as `{"detail", "kind"}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("{detail}")]
    Request { status: StatusCode, detail: String },
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        ApiError::Request {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Request { status, .. } => (*status, request_kind(*status)),
            ApiError::Service(ServiceError::Macro(e)) => match e {
                MacroError::FileNotFound(_) => (StatusCode::NOT_FOUND, "file_not_found"),
                MacroError::MacroNotFound(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "macro_not_found")
                }
                MacroError::MacroFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "macro_failed"),
                MacroError::SaveFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "save_failed"),
                MacroError::LaunchFailed(_) => (StatusCode::SERVICE_UNAVAILABLE, "launch_failed"),
                MacroError::Automation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "automation"),
            },
            ApiError::Service(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

fn request_kind(status: StatusCode) -> &'static str {
    match status {
        StatusCode::PAYLOAD_TOO_LARGE => "payload_too_large",
        StatusCode::UNSUPPORTED_MEDIA_TYPE => "unsupported_media_type",
        StatusCode::UNPROCESSABLE_ENTITY => "invalid_body",
        _ => "bad_request",
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Request {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::Request {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::Request {
            status: err.status(),
            detail: err.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            tracing::error!(error = %self, kind, "request failed");
        } else {
            tracing::info!(error = %self, kind, "request rejected");
        }
        let body = ErrorBody {
            detail: self.to_string(),
            kind: kind.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn status_of(err: MacroError) -> StatusCode {
        ApiError::from(ServiceError::from(err)).status_and_kind().0
    }

    #[test]
    fn each_failure_kind_gets_its_own_status() {
        assert_eq!(
            status_of(MacroError::FileNotFound(PathBuf::from("/x.xlsm"))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(MacroError::MacroNotFound("m".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(MacroError::LaunchFailed("wine".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(MacroError::SaveFailed("locked".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn request_errors_are_tagged_by_status() {
        let kind = |status| {
            ApiError::Request {
                status,
                detail: String::new(),
            }
            .status_and_kind()
            .1
        };
        assert_eq!(kind(StatusCode::BAD_REQUEST), "bad_request");
        assert_eq!(kind(StatusCode::PAYLOAD_TOO_LARGE), "payload_too_large");
        assert_eq!(kind(StatusCode::UNSUPPORTED_MEDIA_TYPE), "unsupported_media_type");
        assert_eq!(kind(StatusCode::UNPROCESSABLE_ENTITY), "invalid_body");
    }
}
