use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::{error, warn};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::RetrievalError;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// 错误响应
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// 错误代码
    pub code: String,
    /// 错误信息
    pub message: String,
}

/// API错误类型
#[derive(Debug)]
pub enum AppError {
    /// 检索核心返回的错误
    Retrieval(RetrievalError),
    /// 请求参数错误
    BadRequest(String),
    /// 其它内部错误
    Internal(anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Retrieval(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            Self::Retrieval(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Retrieval(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorResponse {
        let (code, message) = match self {
            Self::Retrieval(e) => (e.code(), e.to_string()),
            Self::BadRequest(message) => ("bad_request", message.clone()),
            Self::Internal(e) => ("internal", e.to_string()),
        };
        ErrorResponse { code: code.to_string(), message }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = self.body();
        match status.is_server_error() {
            true => error!("{}: {}", body.code, body.message),
            false => warn!("{}: {}", body.code, body.message),
        }
        (status, Json(body)).into_response()
    }
}

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        Self::Retrieval(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}
