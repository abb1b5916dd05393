//! User subscription store
//!
//! Subscription state lives on the `users` row; it is never
//! hard-deleted, only transitioned. The `UserStore` trait is the
//! dependency-injection seam that keeps the lifecycle manager and
//! history service testable with an in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, QueryBuilder, Row};
use yogvaidya_shared::{BillingPeriod, SubscriptionPlan, SubscriptionStatus};

use crate::error::{BillingError, BillingResult};

/// Subscription fields embedded in the user entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub plan: Option<SubscriptionPlan>,
    pub status: Option<SubscriptionStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub billing_period: Option<BillingPeriod>,
    pub razorpay_subscription_id: Option<String>,
    pub razorpay_customer_id: Option<String>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub next_billing_date: Option<DateTime<Utc>>,
    /// Whole currency units (rupees), not paise.
    pub payment_amount: Option<i64>,
    pub is_trial_active: Option<bool>,
    pub trial_end_date: Option<DateTime<Utc>>,
    pub auto_renewal: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub subscription: SubscriptionRecord,
}

/// A user's subscription state without identity fields, for analytics
/// and invariant scans.
#[derive(Debug, Clone)]
pub struct SubscriptionSnapshot {
    pub user_id: String,
    pub subscription: SubscriptionRecord,
}

/// Partial update of subscription fields. Outer `None` leaves the
/// column untouched; for nullable columns, `Some(None)` writes NULL.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionPatch {
    pub plan: Option<SubscriptionPlan>,
    pub status: Option<SubscriptionStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub billing_period: Option<BillingPeriod>,
    pub razorpay_subscription_id: Option<Option<String>>,
    pub razorpay_customer_id: Option<Option<String>>,
    pub last_payment_date: Option<Option<DateTime<Utc>>>,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub payment_amount: Option<i64>,
    pub is_trial_active: Option<bool>,
    pub trial_end_date: Option<Option<DateTime<Utc>>>,
    pub auto_renewal: Option<bool>,
}

impl SubscriptionPatch {
    pub fn is_empty(&self) -> bool {
        self.plan.is_none()
            && self.status.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
            && self.billing_period.is_none()
            && self.razorpay_subscription_id.is_none()
            && self.razorpay_customer_id.is_none()
            && self.last_payment_date.is_none()
            && self.next_billing_date.is_none()
            && self.payment_amount.is_none()
            && self.is_trial_active.is_none()
            && self.trial_end_date.is_none()
            && self.auto_renewal.is_none()
    }

    /// Apply to an in-memory record (shared by the test store and the
    /// Postgres implementation's returned row).
    pub fn apply(&self, record: &mut SubscriptionRecord) {
        if let Some(plan) = self.plan {
            record.plan = Some(plan);
        }
        if let Some(status) = self.status {
            record.status = Some(status);
        }
        if let Some(start) = self.start_date {
            record.start_date = Some(start);
        }
        if let Some(end) = self.end_date {
            record.end_date = Some(end);
        }
        if let Some(period) = self.billing_period {
            record.billing_period = Some(period);
        }
        if let Some(ref sub_id) = self.razorpay_subscription_id {
            record.razorpay_subscription_id = sub_id.clone();
        }
        if let Some(ref cust_id) = self.razorpay_customer_id {
            record.razorpay_customer_id = cust_id.clone();
        }
        if let Some(last_payment) = self.last_payment_date {
            record.last_payment_date = last_payment;
        }
        if let Some(next_billing) = self.next_billing_date {
            record.next_billing_date = Some(next_billing);
        }
        if let Some(amount) = self.payment_amount {
            record.payment_amount = Some(amount);
        }
        if let Some(trial) = self.is_trial_active {
            record.is_trial_active = Some(trial);
        }
        if let Some(trial_end) = self.trial_end_date {
            record.trial_end_date = trial_end;
        }
        if let Some(auto_renewal) = self.auto_renewal {
            record.auto_renewal = Some(auto_renewal);
        }
    }
}

/// Data access for user subscription state.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, user_id: &str) -> BillingResult<Option<UserRecord>>;

    /// Apply a partial update; fails with `UserNotFound` when the row
    /// does not exist. Last write wins between concurrent updates.
    async fn update_subscription(
        &self,
        user_id: &str,
        patch: &SubscriptionPatch,
    ) -> BillingResult<UserRecord>;

    async fn list_subscription_snapshots(&self) -> BillingResult<Vec<SubscriptionSnapshot>>;

    /// Completed, paid one-off session bookings - the pay-per-session
    /// access fallback.
    async fn count_paid_session_bookings(&self, user_id: &str) -> BillingResult<i64>;
}

const SUBSCRIPTION_COLUMNS: &str = "id, email, name, subscription_plan, subscription_status, \
     subscription_start_date, subscription_end_date, billing_period, \
     razorpay_subscription_id, razorpay_customer_id, last_payment_date, \
     next_billing_date, payment_amount, is_trial_active, trial_end_date, auto_renewal";

fn record_from_row(row: &sqlx::postgres::PgRow) -> BillingResult<UserRecord> {
    let plan: Option<String> = row.try_get("subscription_plan")?;
    let status: Option<String> = row.try_get("subscription_status")?;
    let billing_period: Option<String> = row.try_get("billing_period")?;

    Ok(UserRecord {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        subscription: SubscriptionRecord {
            plan: plan.as_deref().and_then(|p| p.parse().ok()),
            status: status.as_deref().and_then(|s| s.parse().ok()),
            start_date: row.try_get("subscription_start_date")?,
            end_date: row.try_get("subscription_end_date")?,
            billing_period: billing_period.as_deref().and_then(|p| p.parse().ok()),
            razorpay_subscription_id: row.try_get("razorpay_subscription_id")?,
            razorpay_customer_id: row.try_get("razorpay_customer_id")?,
            last_payment_date: row.try_get("last_payment_date")?,
            next_billing_date: row.try_get("next_billing_date")?,
            payment_amount: row.try_get("payment_amount")?,
            is_trial_active: row.try_get("is_trial_active")?,
            trial_end_date: row.try_get("trial_end_date")?,
            auto_renewal: row.try_get("auto_renewal")?,
        },
    })
}

/// Postgres-backed store.
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_user(&self, user_id: &str) -> BillingResult<Option<UserRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn update_subscription(
        &self,
        user_id: &str,
        patch: &SubscriptionPatch,
    ) -> BillingResult<UserRecord> {
        let mut qb: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("UPDATE users SET updated_at = NOW()");

        if let Some(plan) = patch.plan {
            qb.push(", subscription_plan = ").push_bind(plan.as_str());
        }
        if let Some(status) = patch.status {
            qb.push(", subscription_status = ").push_bind(status.as_str());
        }
        if let Some(start) = patch.start_date {
            qb.push(", subscription_start_date = ").push_bind(start);
        }
        if let Some(end) = patch.end_date {
            qb.push(", subscription_end_date = ").push_bind(end);
        }
        if let Some(period) = patch.billing_period {
            qb.push(", billing_period = ").push_bind(period.as_str());
        }
        if let Some(ref sub_id) = patch.razorpay_subscription_id {
            qb.push(", razorpay_subscription_id = ").push_bind(sub_id.clone());
        }
        if let Some(ref cust_id) = patch.razorpay_customer_id {
            qb.push(", razorpay_customer_id = ").push_bind(cust_id.clone());
        }
        if let Some(last_payment) = patch.last_payment_date {
            qb.push(", last_payment_date = ").push_bind(last_payment);
        }
        if let Some(next_billing) = patch.next_billing_date {
            qb.push(", next_billing_date = ").push_bind(next_billing);
        }
        if let Some(amount) = patch.payment_amount {
            qb.push(", payment_amount = ").push_bind(amount);
        }
        if let Some(trial) = patch.is_trial_active {
            qb.push(", is_trial_active = ").push_bind(trial);
        }
        if let Some(trial_end) = patch.trial_end_date {
            qb.push(", trial_end_date = ").push_bind(trial_end);
        }
        if let Some(auto_renewal) = patch.auto_renewal {
            qb.push(", auto_renewal = ").push_bind(auto_renewal);
        }

        qb.push(" WHERE id = ").push_bind(user_id);
        qb.push(format!(" RETURNING {SUBSCRIPTION_COLUMNS}"));

        let row = qb.build().fetch_optional(&self.pool).await?;
        match row {
            Some(row) => record_from_row(&row),
            None => Err(BillingError::UserNotFound(user_id.to_string())),
        }
    }

    async fn list_subscription_snapshots(&self) -> BillingResult<Vec<SubscriptionSnapshot>> {
        let rows = sqlx::query(&format!("SELECT {SUBSCRIPTION_COLUMNS} FROM users"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                record_from_row(row).map(|record| SubscriptionSnapshot {
                    user_id: record.id,
                    subscription: record.subscription,
                })
            })
            .collect()
    }

    async fn count_paid_session_bookings(&self, user_id: &str) -> BillingResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM session_bookings \
             WHERE user_id = $1 AND payment_status = 'COMPLETED' AND status != 'CANCELLED'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_apply_partial() {
        let mut record = SubscriptionRecord {
            plan: Some(SubscriptionPlan::Bloom),
            status: Some(SubscriptionStatus::Active),
            auto_renewal: Some(true),
            ..Default::default()
        };

        let patch = SubscriptionPatch {
            auto_renewal: Some(false),
            ..Default::default()
        };
        patch.apply(&mut record);

        assert_eq!(record.auto_renewal, Some(false));
        assert_eq!(record.plan, Some(SubscriptionPlan::Bloom));
        assert_eq!(record.status, Some(SubscriptionStatus::Active));
    }

    #[test]
    fn test_patch_apply_explicit_null() {
        let mut record = SubscriptionRecord {
            is_trial_active: Some(true),
            trial_end_date: Some(Utc::now()),
            ..Default::default()
        };

        let patch = SubscriptionPatch {
            is_trial_active: Some(false),
            trial_end_date: Some(None),
            ..Default::default()
        };
        patch.apply(&mut record);

        assert_eq!(record.is_trial_active, Some(false));
        assert!(record.trial_end_date.is_none());
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(SubscriptionPatch::default().is_empty());
        let patch = SubscriptionPatch {
            payment_amount: Some(1999),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }
}
