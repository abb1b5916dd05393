//! Razorpay gateway client
//!
//! Thin adapter over the Razorpay REST API. Every failure is
//! classified here (HTTP 400 -> invalid request, 401 -> auth failure,
//! 404 -> not found, anything else -> gateway error carrying the code
//! from Razorpay's error envelope) so callers never see a raw
//! transport error. Amounts are paise on the wire.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use yogvaidya_shared::{BillingPeriod, SubscriptionPlan};

use crate::error::{BillingError, BillingResult};

const DEFAULT_API_BASE: &str = "https://api.razorpay.com/v1";

/// Razorpay caps list endpoints at 100 records per request.
const MAX_PAGE_SIZE: usize = 100;

/// Stop paginating past this many records; prevents unbounded scans
/// when a caller asks for more than the account holds.
const PAGINATION_SAFETY_CAP: usize = 1000;

/// Gateway credentials and the pre-provisioned plan id table.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub api_base: String,
    /// Razorpay plan ids provisioned per (plan, billing period).
    plan_ids: HashMap<(SubscriptionPlan, BillingPeriod), String>,
}

impl GatewayConfig {
    /// Load from `RAZORPAY_KEY_ID`, `RAZORPAY_KEY_SECRET`,
    /// `RAZORPAY_WEBHOOK_SECRET` and `{PLAN}_{PERIOD}_PLAN_ID` vars
    /// (e.g. `BLOOM_MONTHLY_PLAN_ID`).
    pub fn from_env() -> BillingResult<Self> {
        let key_id = std::env::var("RAZORPAY_KEY_ID")
            .map_err(|_| BillingError::Config("RAZORPAY_KEY_ID not set".to_string()))?;
        let key_secret = std::env::var("RAZORPAY_KEY_SECRET")
            .map_err(|_| BillingError::Config("RAZORPAY_KEY_SECRET not set".to_string()))?;
        let webhook_secret = std::env::var("RAZORPAY_WEBHOOK_SECRET").unwrap_or_default();

        let mut plan_ids = HashMap::new();
        for plan in SubscriptionPlan::all() {
            for period in [BillingPeriod::Monthly, BillingPeriod::Annual] {
                let var = format!(
                    "{}_{}_PLAN_ID",
                    plan.as_str(),
                    period.as_str().to_ascii_uppercase()
                );
                match std::env::var(&var) {
                    Ok(id) if !id.is_empty() => {
                        plan_ids.insert((plan, period), id);
                    }
                    _ => {
                        tracing::warn!(var = %var, "missing Razorpay plan id in environment");
                    }
                }
            }
        }

        Ok(Self {
            key_id,
            key_secret,
            webhook_secret,
            api_base: DEFAULT_API_BASE.to_string(),
            plan_ids,
        })
    }

    pub fn plan_id_for(&self, plan: SubscriptionPlan, period: BillingPeriod) -> Option<&str> {
        self.plan_ids.get(&(plan, period)).map(String::as_str)
    }

    #[cfg(test)]
    pub fn for_tests(api_base: String) -> Self {
        Self {
            key_id: "rzp_test_key".to_string(),
            key_secret: "secret".to_string(),
            webhook_secret: "whsec".to_string(),
            api_base,
            plan_ids: HashMap::new(),
        }
    }
}

/// A payment as Razorpay reports it. Amounts are paise.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    /// Epoch seconds.
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub contact: Option<serde_json::Value>,
    /// Razorpay serializes empty notes as `[]`, populated notes as an
    /// object; keep the raw value and read fields through `note()`.
    #[serde(default)]
    pub notes: serde_json::Value,
}

impl PaymentRecord {
    /// Read a string field out of the notes object, if present.
    pub fn note(&self, key: &str) -> Option<&str> {
        self.notes.get(key).and_then(|v| v.as_str())
    }
}

/// Gateway-side subscription object. The gateway is the source of
/// truth for cancellation/renewal state.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySubscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Epoch seconds of the current cycle end, when the gateway
    /// reports one.
    #[serde(default)]
    pub current_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanHandle {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderHandle {
    pub id: String,
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub receipt: Option<String>,
}

/// Payment gateway operations used by the billing core.
///
/// The trait seam keeps the subscription manager and history service
/// testable without network access.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Fetch up to `limit` most recent payments, paginating gateway-side.
    async fn list_payments(&self, limit: usize) -> BillingResult<Vec<PaymentRecord>>;

    async fn fetch_payment(&self, payment_id: &str) -> BillingResult<PaymentRecord>;

    async fn create_subscription(
        &self,
        plan_id: &str,
        period: BillingPeriod,
        notes: serde_json::Value,
    ) -> BillingResult<GatewaySubscription>;

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_cycle_end: bool,
    ) -> BillingResult<GatewaySubscription>;

    async fn fetch_subscription(&self, subscription_id: &str)
        -> BillingResult<GatewaySubscription>;

    async fn update_subscription(
        &self,
        subscription_id: &str,
        new_plan_id: &str,
    ) -> BillingResult<GatewaySubscription>;

    /// Plans are immutable priced objects on the gateway; changing a
    /// price means minting a new plan.
    async fn create_plan(
        &self,
        name: &str,
        amount_minor_units: i64,
        currency: &str,
        period: BillingPeriod,
    ) -> BillingResult<PlanHandle>;

    /// One-off order, used to collect a prorated upgrade charge.
    async fn create_order(
        &self,
        amount_minor_units: i64,
        receipt: &str,
        notes: serde_json::Value,
    ) -> BillingResult<OrderHandle>;
}

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Live Razorpay client.
pub struct RazorpayClient {
    http: reqwest::Client,
    config: Arc<GatewayConfig>,
}

impl RazorpayClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(GatewayConfig::from_env()?))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base, path)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> BillingResult<T> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| BillingError::Gateway {
                code: "BAD_RESPONSE".to_string(),
                message: format!("failed to parse gateway response: {e}"),
            });
        }

        let body = response.text().await.unwrap_or_default();
        let envelope: Option<ErrorBody> = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .and_then(|e| e.error);
        let code = envelope
            .as_ref()
            .and_then(|e| e.code.clone())
            .unwrap_or_else(|| status.as_u16().to_string());
        let message = envelope
            .and_then(|e| e.description)
            .unwrap_or_else(|| body.chars().take(200).collect());

        Err(match status.as_u16() {
            400 => BillingError::InvalidRequest(message),
            401 => BillingError::GatewayAuth(message),
            404 => BillingError::NotFound(message),
            _ => BillingError::Gateway { code, message },
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> BillingResult<T> {
        let response = self
            .http
            .get(self.url(path))
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .send()
            .await
            .map_err(|e| BillingError::Gateway {
                code: "NETWORK_ERROR".to_string(),
                message: e.to_string(),
            })?;
        Self::parse_response(response).await
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> BillingResult<T> {
        let response = self
            .http
            .post(self.url(path))
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(body)
            .send()
            .await
            .map_err(|e| BillingError::Gateway {
                code: "NETWORK_ERROR".to_string(),
                message: e.to_string(),
            })?;
        Self::parse_response(response).await
    }

    async fn patch<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> BillingResult<T> {
        let response = self
            .http
            .patch(self.url(path))
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(body)
            .send()
            .await
            .map_err(|e| BillingError::Gateway {
                code: "NETWORK_ERROR".to_string(),
                message: e.to_string(),
            })?;
        Self::parse_response(response).await
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    async fn list_payments(&self, limit: usize) -> BillingResult<Vec<PaymentRecord>> {
        let mut payments: Vec<PaymentRecord> = Vec::new();
        let mut skip = 0usize;

        while payments.len() < limit && skip < PAGINATION_SAFETY_CAP {
            let count = MAX_PAGE_SIZE.min(limit - payments.len());
            let page: ListEnvelope<PaymentRecord> = self
                .get(&format!("/payments?count={count}&skip={skip}"))
                .await?;

            let fetched = page.items.len();
            payments.extend(page.items);
            skip += fetched;

            if fetched < count {
                break;
            }
        }

        Ok(payments)
    }

    async fn fetch_payment(&self, payment_id: &str) -> BillingResult<PaymentRecord> {
        self.get(&format!("/payments/{payment_id}")).await
    }

    async fn create_subscription(
        &self,
        plan_id: &str,
        period: BillingPeriod,
        notes: serde_json::Value,
    ) -> BillingResult<GatewaySubscription> {
        let now = chrono::Utc::now().timestamp();
        let expire_by = now
            + match period {
                BillingPeriod::Annual => 31_536_000,
                BillingPeriod::Monthly => 2_592_000,
            };
        let body = json!({
            "plan_id": plan_id,
            "customer_notify": 1,
            "total_count": if period == BillingPeriod::Annual { 12 } else { 1 },
            "expire_by": expire_by,
            "notes": notes,
        });
        self.post("/subscriptions", &body).await
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_cycle_end: bool,
    ) -> BillingResult<GatewaySubscription> {
        let body = json!({ "cancel_at_cycle_end": if at_cycle_end { 1 } else { 0 } });
        self.post(&format!("/subscriptions/{subscription_id}/cancel"), &body)
            .await
    }

    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<GatewaySubscription> {
        self.get(&format!("/subscriptions/{subscription_id}")).await
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        new_plan_id: &str,
    ) -> BillingResult<GatewaySubscription> {
        let body = json!({ "plan_id": new_plan_id });
        self.patch(&format!("/subscriptions/{subscription_id}"), &body)
            .await
    }

    async fn create_plan(
        &self,
        name: &str,
        amount_minor_units: i64,
        currency: &str,
        period: BillingPeriod,
    ) -> BillingResult<PlanHandle> {
        let body = json!({
            "period": match period {
                BillingPeriod::Annual => "yearly",
                BillingPeriod::Monthly => "monthly",
            },
            "interval": 1,
            "item": {
                "name": name,
                "amount": amount_minor_units,
                "currency": currency,
                "description": format!("{name} subscription plan"),
            },
        });
        #[derive(Deserialize)]
        struct PlanEnvelope {
            id: String,
        }
        let plan: PlanEnvelope = self.post("/plans", &body).await?;
        Ok(PlanHandle { id: plan.id })
    }

    async fn create_order(
        &self,
        amount_minor_units: i64,
        receipt: &str,
        notes: serde_json::Value,
    ) -> BillingResult<OrderHandle> {
        let body = json!({
            "amount": amount_minor_units,
            "currency": "INR",
            "receipt": receipt,
            "payment_capture": 1,
            "notes": notes,
        });
        self.post("/orders", &body).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_record_notes_object_and_array() {
        let with_notes: PaymentRecord = serde_json::from_value(json!({
            "id": "pay_1",
            "amount": 199900,
            "created_at": 1700000000,
            "notes": { "email": "a@b.com" },
        }))
        .unwrap();
        assert_eq!(with_notes.note("email"), Some("a@b.com"));

        // Razorpay sends `[]` for empty notes.
        let empty_notes: PaymentRecord = serde_json::from_value(json!({
            "id": "pay_2",
            "amount": 0,
            "created_at": 0,
            "notes": [],
        }))
        .unwrap();
        assert_eq!(empty_notes.note("email"), None);
    }

    #[test]
    fn test_payment_record_missing_fields_default() {
        let record: PaymentRecord =
            serde_json::from_value(json!({ "id": "pay_3" })).unwrap();
        assert_eq!(record.amount, 0);
        assert!(record.method.is_none());
        assert!(record.email.is_none());
    }

    #[test]
    fn test_error_envelope_parsing() {
        let body = r#"{"error":{"code":"BAD_REQUEST_ERROR","description":"amount required"}}"#;
        let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap();
        let error = envelope.error.unwrap();
        assert_eq!(error.code.as_deref(), Some("BAD_REQUEST_ERROR"));
        assert_eq!(error.description.as_deref(), Some("amount required"));
    }
}
