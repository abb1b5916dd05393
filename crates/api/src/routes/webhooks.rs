//! Razorpay webhook endpoint.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use yogvaidya_billing::BillingError;

use crate::error::{ApiError, ApiResult};
use crate::routes::success;
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "x-razorpay-signature";

/// POST /api/v1/webhooks/razorpay
///
/// The raw body is handed to the billing layer untouched: the HMAC
/// must cover exactly the bytes Razorpay sent.
pub async fn razorpay(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Billing(BillingError::WebhookSignatureInvalid))?;

    let outcome = state
        .billing
        .webhooks
        .handle_event(&body, signature)
        .await?;
    Ok(success(outcome))
}
