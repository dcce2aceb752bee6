//! Error translation at the REST edge.
//!
//! Handlers return [`ApiError`]; the response body is the structured form
//! `{error: true, errorNum, errorMessage, code}` with the HTTP status derived
//! from the error kind (400 bad parameter, 404 not found, 409 conflict,
//! 503 shutdown, 500 otherwise).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use coral_core::{CoralError, ErrorCode};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorBody {
    pub error: bool,
    #[serde(rename = "errorNum")]
    pub error_num: i32,
    #[serde(rename = "errorMessage")]
    pub error_message: String,
    pub code: u16,
}

#[derive(Debug, Clone)]
pub struct ApiError(pub CoralError);

impl ApiError {
    pub fn bad_parameter(message: impl Into<String>) -> Self {
        Self(CoralError::bad_parameter(message))
    }

    pub fn not_found(code: ErrorCode, message: impl Into<String>) -> Self {
        Self(CoralError::new(code, message))
    }
}

impl From<CoralError> for ApiError {
    fn from(err: CoralError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.code.http_status();
        let body = ApiErrorBody {
            error: true,
            error_num: self.0.code.as_i32(),
            error_message: self.0.message.clone(),
            code: status,
        };
        (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(body),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_shape() {
        let err = ApiError::from(CoralError::from_code(ErrorCode::DocumentNotFound));
        let body = serde_json::to_value(ApiErrorBody {
            error: true,
            error_num: err.0.code.as_i32(),
            error_message: err.0.message.clone(),
            code: err.0.code.http_status(),
        })
        .expect("serialize");
        assert_eq!(body["error"], true);
        assert_eq!(body["errorNum"], 1202);
        assert_eq!(body["code"], 404);
    }
}
