//! Billing history endpoint.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingHistoryRequest {
    pub user_email: String,
}

/// POST /api/v1/billing/history
///
/// Returns the caller's payment history, strictly scoped to the given
/// email. Validation failures surface as 400 before any gateway call.
/// Failures keep the `history` field present and empty so clients can
/// always iterate it.
pub async fn billing_history(
    State(state): State<AppState>,
    Json(request): Json<BillingHistoryRequest>,
) -> Response {
    match state
        .billing
        .history
        .get_billing_history(&request.user_email)
        .await
    {
        Ok(history) => Json(json!({
            "success": true,
            "count": history.len(),
            "history": history,
        }))
        .into_response(),
        Err(e) => {
            let error = ApiError::from(e);
            tracing::debug!(error = %error, code = error.code(), "billing history lookup failed");
            (error.status(), Json(failure_body(&error))).into_response()
        }
    }
}

fn failure_body(error: &ApiError) -> serde_json::Value {
    json!({
        "success": false,
        "error": error.to_string(),
        "code": error.code(),
        "count": 0,
        "history": [],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use sqlx::postgres::PgPoolOptions;

    use crate::config::Config;

    async fn state() -> AppState {
        std::env::set_var("RAZORPAY_KEY_ID", "rzp_test_key");
        std::env::set_var("RAZORPAY_KEY_SECRET", "secret");
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/yogvaidya_test")
            .unwrap();
        let config = Config {
            database_url: "postgres://localhost/yogvaidya_test".to_string(),
            bind_address: "127.0.0.1:0".to_string(),
            redis_url: None,
        };
        AppState::new(pool, config).await.unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_malformed_email_returns_empty_history_with_400() {
        let state = state().await;
        let response = billing_history(
            State(state),
            Json(BillingHistoryRequest {
                user_email: "not-an-email".to_string(),
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["count"], json!(0));
        assert!(body["history"].as_array().unwrap().is_empty());
        assert!(body["error"].as_str().unwrap().contains("email"));
    }
}
