//! Razorpay webhook handling
//!
//! Verifies the `X-Razorpay-Signature` HMAC before anything else is
//! read out of the payload. Handled events update the local
//! subscription row and drop the affected user's cached billing
//! history; everything else is acknowledged and ignored so Razorpay
//! does not retry.

use std::sync::Arc;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use yogvaidya_shared::SubscriptionStatus;

use crate::error::{BillingError, BillingResult};
use crate::history::BillingHistoryService;
use crate::store::{SubscriptionPatch, UserStore};

type HmacSha256 = Hmac<Sha256>;

/// What a webhook delivery did, echoed back in the HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// payment.captured: payment recorded against a user.
    PaymentRecorded { user_id: Option<String> },
    /// subscription.cancelled / subscription.completed: local row
    /// downgraded.
    SubscriptionDeactivated { user_id: String },
    /// Event verified but not one we act on.
    Ignored { event: String },
}

/// Verify a hex-encoded HMAC-SHA256 signature over the raw payload.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> BillingResult<()> {
    let expected = hex::decode(signature.trim()).map_err(|_| {
        tracing::warn!("webhook signature is not valid hex");
        BillingError::WebhookSignatureInvalid
    })?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(payload);
    mac.verify_slice(&expected).map_err(|_| {
        tracing::warn!("webhook signature mismatch");
        BillingError::WebhookSignatureInvalid
    })
}

pub struct WebhookHandler {
    webhook_secret: String,
    store: Arc<dyn UserStore>,
    history: Arc<BillingHistoryService>,
}

impl WebhookHandler {
    pub fn new(
        webhook_secret: String,
        store: Arc<dyn UserStore>,
        history: Arc<BillingHistoryService>,
    ) -> Self {
        Self {
            webhook_secret,
            store,
            history,
        }
    }

    /// Verify and dispatch one webhook delivery. `payload` is the raw
    /// request body; the signature must cover it byte for byte.
    pub async fn handle_event(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> BillingResult<WebhookOutcome> {
        verify_signature(&self.webhook_secret, payload, signature)?;

        let body: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| BillingError::Validation(format!("malformed webhook payload: {e}")))?;
        let event = body
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        match event.as_str() {
            "payment.captured" => self.on_payment_captured(&body).await,
            "subscription.cancelled" | "subscription.completed" => {
                self.on_subscription_ended(&event, &body).await
            }
            _ => {
                tracing::debug!(event = %event, "ignoring webhook event");
                Ok(WebhookOutcome::Ignored { event })
            }
        }
    }

    /// Record the captured payment on the user's row and invalidate
    /// their cached billing history. The user is resolved from the
    /// `user_id` note stamped on the payment at checkout; a payment
    /// without one still gets its cache invalidation by email.
    ///
    /// An unknown user id is acknowledged (redelivery cannot fix it);
    /// a store failure propagates so the gateway retries the delivery
    /// instead of the payment facts being lost.
    async fn on_payment_captured(&self, body: &serde_json::Value) -> BillingResult<WebhookOutcome> {
        let entity = &body["payload"]["payment"]["entity"];
        let payment_id = entity.get("id").and_then(|v| v.as_str()).unwrap_or("?");
        let amount_paise = entity.get("amount").and_then(|v| v.as_i64()).unwrap_or(0);
        let amount_rupees = (amount_paise as f64 / 100.0).round() as i64;
        let user_id = entity["notes"]
            .get("user_id")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let email = entity
            .get("email")
            .and_then(|v| v.as_str())
            .or_else(|| entity["notes"].get("email").and_then(|v| v.as_str()));

        if let Some(user_id) = &user_id {
            let patch = SubscriptionPatch {
                last_payment_date: Some(Some(Utc::now())),
                payment_amount: Some(amount_rupees),
                ..Default::default()
            };
            match self.store.update_subscription(user_id, &patch).await {
                Ok(_) => {
                    tracing::info!(
                        user_id = %user_id,
                        payment_id = %payment_id,
                        amount = amount_rupees,
                        "payment captured"
                    );
                }
                Err(BillingError::UserNotFound(_)) => {
                    tracing::warn!(
                        user_id = %user_id,
                        payment_id = %payment_id,
                        "captured payment references unknown user"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        user_id = %user_id,
                        payment_id = %payment_id,
                        error = %e,
                        "failed to record captured payment"
                    );
                    return Err(e);
                }
            }
        } else {
            tracing::warn!(payment_id = %payment_id, "captured payment has no user_id note");
        }

        if let Some(email) = email {
            self.history.invalidate_for_user(email).await?;
        }

        Ok(WebhookOutcome::PaymentRecorded { user_id })
    }

    /// The gateway ended the subscription; mirror it locally. This is
    /// the push-side counterpart of the lazy reconciliation on read.
    async fn on_subscription_ended(
        &self,
        event: &str,
        body: &serde_json::Value,
    ) -> BillingResult<WebhookOutcome> {
        let entity = &body["payload"]["subscription"]["entity"];
        let subscription_id = entity.get("id").and_then(|v| v.as_str()).unwrap_or("?");
        let Some(user_id) = entity["notes"].get("user_id").and_then(|v| v.as_str()) else {
            tracing::warn!(
                event = %event,
                subscription_id = %subscription_id,
                "subscription event has no user_id note"
            );
            return Ok(WebhookOutcome::Ignored {
                event: event.to_string(),
            });
        };

        let patch = SubscriptionPatch {
            status: Some(SubscriptionStatus::Inactive),
            auto_renewal: Some(false),
            ..Default::default()
        };
        self.store.update_subscription(user_id, &patch).await?;
        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription_id,
            event = %event,
            "subscription deactivated by gateway event"
        );

        Ok(WebhookOutcome::SubscriptionDeactivated {
            user_id: user_id.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_valid_signature_accepted() {
        let payload = br#"{"event":"payment.captured"}"#;
        let signature = sign("whsec", payload);
        assert!(verify_signature("whsec", payload, &signature).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let signature = sign("whsec", br#"{"event":"payment.captured"}"#);
        let result = verify_signature("whsec", br#"{"event":"payment.refunded"}"#, &signature);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = br#"{"event":"payment.captured"}"#;
        let signature = sign("other-secret", payload);
        let result = verify_signature("whsec", payload, &signature);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[test]
    fn test_non_hex_signature_rejected() {
        let result = verify_signature("whsec", b"{}", "not hex at all");
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }
}
