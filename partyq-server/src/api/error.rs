//! HTTP mapping of the error taxonomy

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use partyq_common::Error;
use serde_json::json;
use tracing::debug;

/// Error returned by every API handler
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound(_) | Error::NoDeviceAvailable(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) => StatusCode::CONFLICT,
            Error::InvalidFormat(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InvalidValue(_) => StatusCode::BAD_REQUEST,
            Error::AccessDenied(_) => StatusCode::FORBIDDEN,
            Error::CredentialExpired(_) | Error::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::NotInitialized(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Config(_) | Error::Io(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::InvalidFormat(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(Error::InvalidFormat(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        debug!("Request failed ({}): {}", status, self.0);
        let body = Json(json!({
            "status": status.as_u16(),
            "error": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
