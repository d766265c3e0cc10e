//! 统一的 API 错误类型，全部以 JSON 形式返回。

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use std::io::ErrorKind;
use tracing::error;

use crate::storage::StorageError;

const INTERNAL_FALLBACK: &str = "Internal server error";

#[derive(Debug)]
pub enum ApiError {
    /// 缺少必需的请求参数，`status` 字段为 `fail`。
    MissingInput(String),
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    PayloadTooLarge(String),
    RangeNotSatisfiable(u64),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
}

impl ApiError {
    pub fn access_denied() -> Self {
        ApiError::Forbidden("Access denied.".into())
    }

    pub fn file_not_found() -> Self {
        ApiError::NotFound("File not found.".into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingInput(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut headers = HeaderMap::new();
        let (kind, message) = match self {
            ApiError::MissingInput(msg) => ("fail", msg),
            ApiError::BadRequest(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::PayloadTooLarge(msg) => ("error", msg),
            ApiError::RangeNotSatisfiable(size) => {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    headers.insert(header::CONTENT_RANGE, value);
                }
                ("error", "Range not satisfiable.".to_string())
            }
            ApiError::Internal(msg) => {
                error!(error = %msg, "internal error");
                let msg = if msg.trim().is_empty() {
                    INTERNAL_FALLBACK.to_string()
                } else {
                    msg
                };
                ("error", msg)
            }
        };

        (
            status,
            headers,
            Json(ErrorBody {
                status: kind,
                message,
            }),
        )
            .into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Forbidden => ApiError::access_denied(),
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::file_not_found(),
                _ => ApiError::Internal(err.to_string()),
            },
        }
    }
}
