//! 请求处理错误类型与 HTTP 响应转换。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::io;
use tracing::{debug, error};

use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound,
    PayloadTooLarge(u64),
    DirectoryRead(io::Error),
    UploadIo(io::Error),
    Render(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "404 page not found").into_response(),
            ApiError::PayloadTooLarge(limit) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("upload exceeds the limit of {limit} bytes"),
            )
                .into_response(),
            ApiError::DirectoryRead(err) => {
                error!(error = %err, "error listing files in directory");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
            ApiError::UploadIo(err) => {
                error!(error = %err, "error writing uploaded file");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
            ApiError::Render(msg) => {
                error!(error = %msg, "error rendering index page");
                (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
            }
        }
    }
}

/// 请求路径解析失败（越界、不存在、名称非法等）一律视为不存在。
impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        if let StorageError::Io(err) = &error {
            debug!(error = %err, "path lookup failed");
        }
        ApiError::NotFound
    }
}
