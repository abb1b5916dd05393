//! API error handling
//!
//! Every handler returns `ApiResult<T>`; failures are rendered as a
//! `{"success": false, "error": ..., "code": ...}` body with a status
//! derived from the underlying billing error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use yogvaidya_billing::BillingError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub(crate) fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Billing(e) => match e {
                BillingError::Validation(_) | BillingError::InvalidRequest(_) => {
                    StatusCode::BAD_REQUEST
                }
                BillingError::NotFound(_) | BillingError::UserNotFound(_) => StatusCode::NOT_FOUND,
                BillingError::WebhookSignatureInvalid => StatusCode::UNAUTHORIZED,
                BillingError::GatewayAuth(_) | BillingError::Gateway { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                BillingError::Database(_) | BillingError::Config(_) | BillingError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    pub(crate) fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Billing(e) => e.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "request rejected");
        }

        let body = json!({
            "success": false,
            "error": self.to_string(),
            "code": self.code(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (BillingError::Validation("bad".into()), 400),
            (BillingError::UserNotFound("u1".into()), 404),
            (BillingError::WebhookSignatureInvalid, 401),
            (BillingError::GatewayAuth("401".into()), 502),
            (BillingError::Database("down".into()), 500),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::Billing(error).status().as_u16(), expected);
        }
    }
}
