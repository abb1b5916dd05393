//! Billing history service
//!
//! Fetches a user's payments from the gateway, filtered strictly by
//! verified email. The email validation here is the security boundary:
//! an empty, malformed, or missing email must yield zero records -
//! never the full payment list, never another user's records. The
//! gateway API cannot filter by email server-side, so we over-fetch
//! and filter locally.

use std::sync::Arc;
use std::sync::LazyLock;

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cache::{cache_key, keys, ttl, CacheService};
use crate::client::{PaymentGateway, PaymentRecord};
use crate::error::{BillingError, BillingResult};

/// How many records the billing screen shows.
const HISTORY_LIMIT: usize = 20;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)] // Pattern is a compile-time constant
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex")
});

/// Trim and shape-check an email. Fails before any I/O happens.
pub fn validate_email(raw: &str) -> BillingResult<String> {
    let clean = raw.trim();
    if clean.is_empty() {
        tracing::warn!("billing history requested without an email");
        return Err(BillingError::Validation(
            "Valid user email is required".to_string(),
        ));
    }
    if !EMAIL_RE.is_match(clean) {
        tracing::warn!(email = %clean, "billing history requested with malformed email");
        return Err(BillingError::Validation("Invalid email format".to_string()));
    }
    Ok(clean.to_string())
}

/// One row of the billing screen, derived per request from gateway
/// payments. Amounts are display units (rupees).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingItem {
    pub id: String,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub method: String,
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub order_id: Option<String>,
    pub plan_name: String,
    pub plan_type: String,
    pub payment_method: String,
    pub formatted_status: String,
    pub razorpay_payment_id: String,
}

pub struct BillingHistoryService {
    gateway: Arc<dyn PaymentGateway>,
    cache: CacheService,
}

impl BillingHistoryService {
    pub fn new(gateway: Arc<dyn PaymentGateway>, cache: CacheService) -> Self {
        Self { gateway, cache }
    }

    /// Billing history for one verified email, cached per user.
    pub async fn get_billing_history(&self, user_email: &str) -> BillingResult<Vec<BillingItem>> {
        let clean_email = validate_email(user_email)?;
        let key = cache_key(keys::BILLING_HISTORY, &[&clean_email.to_lowercase()]);

        self.cache
            .with_cache(&key, ttl::MEDIUM, || self.fetch_history(clean_email.clone()))
            .await
    }

    /// Drop the cached history for one user. Called by the
    /// payment-captured webhook so the dashboard reflects the new
    /// payment; there is no implicit invalidation.
    pub async fn invalidate_for_user(&self, user_email: &str) -> BillingResult<()> {
        let key = cache_key(keys::BILLING_HISTORY, &[&user_email.trim().to_lowercase()]);
        self.cache.invalidate(&key).await
    }

    async fn fetch_history(&self, clean_email: String) -> BillingResult<Vec<BillingItem>> {
        // Over-fetch: the gateway cannot filter by email, and most
        // records will belong to other users.
        let batch = (HISTORY_LIMIT * 2).max(100);
        let payments = self.gateway.list_payments(batch).await.map_err(|e| {
            tracing::error!(error = %e, "failed to fetch payments from gateway");
            e
        })?;

        let target = clean_email.to_lowercase();
        let mut items: Vec<BillingItem> = payments
            .iter()
            .filter(|payment| payment_matches_email(payment, &target))
            .map(billing_item_from_payment)
            .collect();

        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(HISTORY_LIMIT);

        tracing::debug!(count = items.len(), "billing history assembled");
        Ok(items)
    }
}

/// Exact email equality against the payment's top-level email or the
/// common note fields. Anything else is someone else's payment.
fn payment_matches_email(payment: &PaymentRecord, target_lower: &str) -> bool {
    if let Some(email) = &payment.email {
        if email.trim().to_lowercase() == target_lower {
            return true;
        }
    }
    for note_field in ["email", "customer_email", "user_email"] {
        if let Some(value) = payment.note(note_field) {
            if value.trim().to_lowercase() == target_lower {
                return true;
            }
        }
    }
    false
}

/// Map one gateway payment to a display row. Missing fields get safe
/// fallbacks so a single malformed record never aborts the batch.
fn billing_item_from_payment(payment: &PaymentRecord) -> BillingItem {
    let amount = payment.amount as f64 / 100.0;
    let status = payment
        .status
        .clone()
        .unwrap_or_else(|| "unknown".to_string());
    let method = payment
        .method
        .clone()
        .unwrap_or_else(|| "unknown".to_string());
    let created_at = Utc
        .timestamp_opt(payment.created_at, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let description = payment
        .description
        .clone()
        .unwrap_or_else(|| format!("{method} Payment"));

    BillingItem {
        id: payment.id.clone(),
        amount,
        currency: payment.currency.clone().unwrap_or_else(|| "INR".to_string()),
        status: status.clone(),
        method: method.clone(),
        created_at,
        description,
        order_id: payment.order_id.clone(),
        plan_name: plan_name_from_description(payment.description.as_deref()),
        plan_type: plan_type_from_amount(amount),
        payment_method: format_payment_method(&method),
        formatted_status: format_payment_status(&status),
        razorpay_payment_id: payment.id.clone(),
    }
}

fn plan_name_from_description(description: Option<&str>) -> String {
    let description = match description {
        Some(d) if !d.is_empty() => d,
        _ => return "Subscription Payment".to_string(),
    };
    let lower = description.to_lowercase();
    if lower.contains("bloom") {
        "Bloom Plan".to_string()
    } else if lower.contains("flourish") {
        "Flourish Plan".to_string()
    } else if lower.contains("seed") {
        "Seed Plan".to_string()
    } else {
        description.to_string()
    }
}

/// Classify the plan tier from the amount, matching the three pricing
/// bands (display units).
fn plan_type_from_amount(amount: f64) -> String {
    if amount >= 3000.0 {
        "FLOURISH".to_string()
    } else if amount >= 1500.0 {
        "BLOOM".to_string()
    } else if amount >= 500.0 {
        "SEED".to_string()
    } else {
        "UNKNOWN".to_string()
    }
}

fn format_payment_method(method: &str) -> String {
    match method.to_lowercase().as_str() {
        "card" => "Credit/Debit Card".to_string(),
        "netbanking" => "Net Banking".to_string(),
        "wallet" => "Wallet".to_string(),
        "upi" => "UPI".to_string(),
        "unknown" => "Unknown Method".to_string(),
        other => capitalize(other),
    }
}

fn format_payment_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "captured" => "Successful".to_string(),
        "authorized" => "Authorized".to_string(),
        "failed" => "Failed".to_string(),
        "refunded" => "Refunded".to_string(),
        "created" => "Pending".to_string(),
        "unknown" => "Unknown".to_string(),
        other => capitalize(other),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payment(value: serde_json::Value) -> PaymentRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_validate_email_rejects_garbage() {
        for bad in ["", "   ", "not-an-email", "a@b", "a b@c.com", "@d.com"] {
            assert!(validate_email(bad).is_err(), "accepted: {bad:?}");
        }
    }

    #[test]
    fn test_validate_email_trims() {
        assert_eq!(validate_email("  user@example.com ").unwrap(), "user@example.com");
    }

    #[test]
    fn test_email_match_top_level_and_notes() {
        let by_email = payment(json!({
            "id": "pay_1", "amount": 199900, "created_at": 1, "email": "User@Example.com"
        }));
        assert!(payment_matches_email(&by_email, "user@example.com"));

        let by_note = payment(json!({
            "id": "pay_2", "amount": 199900, "created_at": 1,
            "notes": { "customer_email": "user@example.com" }
        }));
        assert!(payment_matches_email(&by_note, "user@example.com"));

        let other = payment(json!({
            "id": "pay_3", "amount": 199900, "created_at": 1, "email": "other@example.com"
        }));
        assert!(!payment_matches_email(&other, "user@example.com"));

        let no_email = payment(json!({ "id": "pay_4", "amount": 199900, "created_at": 1 }));
        assert!(!payment_matches_email(&no_email, "user@example.com"));
    }

    #[test]
    fn test_plan_type_bands() {
        assert_eq!(plan_type_from_amount(4999.0), "FLOURISH");
        assert_eq!(plan_type_from_amount(1999.0), "BLOOM");
        assert_eq!(plan_type_from_amount(999.0), "SEED");
        assert_eq!(plan_type_from_amount(100.0), "UNKNOWN");
    }

    #[test]
    fn test_missing_method_gets_fallback() {
        let record = payment(json!({
            "id": "pay_5", "amount": 499900, "created_at": 1700000000,
            "email": "u@e.com", "status": "captured"
        }));
        let item = billing_item_from_payment(&record);
        assert_eq!(item.method, "unknown");
        assert_eq!(item.payment_method, "Unknown Method");
        assert_eq!(item.formatted_status, "Successful");
        assert_eq!(item.amount, 4999.0);
        assert_eq!(item.plan_type, "FLOURISH");
    }

    #[test]
    fn test_plan_name_from_description() {
        assert_eq!(plan_name_from_description(Some("BLOOM Plan (monthly)")), "Bloom Plan");
        assert_eq!(plan_name_from_description(Some("Flourish upgrade")), "Flourish Plan");
        assert_eq!(plan_name_from_description(None), "Subscription Payment");
        assert_eq!(plan_name_from_description(Some("Donation")), "Donation");
    }

    #[test]
    fn test_format_payment_method_known_and_unknown() {
        assert_eq!(format_payment_method("card"), "Credit/Debit Card");
        assert_eq!(format_payment_method("upi"), "UPI");
        assert_eq!(format_payment_method("emi"), "Emi");
    }

    #[test]
    fn test_format_payment_status() {
        assert_eq!(format_payment_status("captured"), "Successful");
        assert_eq!(format_payment_status("created"), "Pending");
        assert_eq!(format_payment_status("disputed"), "Disputed");
    }
}
