use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::RepositoryError;
use services::services::{preorder::PreOrderError, referral_commission::ReferralError};
use thiserror::Error;
use tracing::error;
use utils::response::{ApiResponse, ErrorCode, HasErrorCode};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Referral(#[from] ReferralError),
    #[error(transparent)]
    PreOrder(#[from] PreOrderError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("{0}")]
    BadRequest(String),
}

impl HasErrorCode for ApiError {
    fn error_code(&self) -> ErrorCode {
        match self {
            ApiError::Referral(e) => e.error_code(),
            ApiError::PreOrder(e) => e.error_code(),
            ApiError::Repository(e) => e.code(),
            ApiError::BadRequest(_) => ErrorCode::ValidationError,
        }
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::DuplicateEntry => StatusCode::CONFLICT,
        ErrorCode::NetworkError => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.error_code();
        let status = status_for(code);
        if status.is_server_error() {
            error!(error = %self, %code, "Request failed");
        }
        let body: ApiResponse<()> = ApiResponse::error(self.to_string(), code);
        (status, Json(body)).into_response()
    }
}
