//! Subscription lifecycle manager
//!
//! State machine over the per-user subscription row: trial start,
//! paid activation, cancel-at-cycle-end, partial updates with gateway
//! re-pointing, and lazy reconciliation against the gateway on read.
//!
//! Failure policy: the local row is the durable record of intent.
//! Gateway calls are best-effort on every mutation; a gateway failure
//! is logged with the user id and operation but never blocks the local
//! state change. Divergence heals on the next `get_user_subscription`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use yogvaidya_shared::{BillingPeriod, SubscriptionPlan, SubscriptionStatus};

use crate::client::{GatewayConfig, PaymentGateway};
use crate::error::{BillingError, BillingResult};
use crate::store::{SubscriptionPatch, SubscriptionRecord, UserRecord, UserStore};

/// Plan pricing in whole rupees.
pub mod pricing {
    use yogvaidya_shared::{BillingPeriod, SubscriptionPlan};

    pub const TRIAL_PERIOD_DAYS: i64 = 7;

    pub fn monthly_price(plan: SubscriptionPlan) -> i64 {
        match plan {
            SubscriptionPlan::Seed => 1999,
            SubscriptionPlan::Bloom => 1999,
            SubscriptionPlan::Flourish => 4999,
        }
    }

    /// Annual price carries a 20% discount over twelve monthly cycles.
    pub fn annual_price(plan: SubscriptionPlan) -> i64 {
        (monthly_price(plan) as f64 * 12.0 * 0.8).round() as i64
    }

    pub fn price(plan: SubscriptionPlan, period: BillingPeriod) -> i64 {
        match period {
            BillingPeriod::Monthly => monthly_price(plan),
            BillingPeriod::Annual => annual_price(plan),
        }
    }
}

/// Inputs for activating a paid subscription. The gateway subscription
/// is created by the checkout flow; this records its outcome.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    pub user_id: String,
    pub plan: SubscriptionPlan,
    pub billing_period: BillingPeriod,
    #[serde(default)]
    pub razorpay_subscription_id: Option<String>,
    /// Overrides the pricing-table amount when set (admin comp, promo).
    #[serde(default)]
    pub payment_amount: Option<i64>,
    #[serde(default)]
    pub auto_renewal: Option<bool>,
}

/// Subscription state as returned to callers, with absent DB fields
/// normalized and the live gateway status attached when available.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub plan: Option<SubscriptionPlan>,
    pub status: SubscriptionStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub billing_period: Option<BillingPeriod>,
    pub razorpay_subscription_id: Option<String>,
    pub razorpay_customer_id: Option<String>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub payment_amount: Option<i64>,
    pub is_trial_active: bool,
    pub trial_end_date: Option<DateTime<Utc>>,
    pub auto_renewal: bool,
    /// Live status reported by the gateway, when it could be fetched.
    pub razorpay_status: Option<String>,
}

/// An upgrade quote plus the gateway order collecting the charge,
/// when there is anything to charge.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeOrder {
    pub quote: UpgradeQuote,
    pub order: Option<crate::client::OrderHandle>,
}

/// Result of an upgrade price calculation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeQuote {
    pub upgrade_price: i64,
    pub is_plan_switch: bool,
    pub current_plan: SubscriptionPlan,
    pub new_plan: SubscriptionPlan,
    pub billing_period: BillingPeriod,
    pub unused_credit: i64,
    pub remaining_days: i64,
    pub current_plan_daily_rate: i64,
    pub new_plan_daily_rate: i64,
    pub full_new_plan_price: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BillingPeriodBreakdown {
    pub monthly: u64,
    pub annual: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionAnalytics {
    pub total_active_subscriptions: u64,
    /// plan -> status -> count, pre-seeded with zeros for every
    /// plan/status pair so dashboards get stable shapes.
    pub plan_breakdown: BTreeMap<String, BTreeMap<String, u64>>,
    pub billing_period_breakdown: BillingPeriodBreakdown,
    /// Percentage of active users subscribed for over a month,
    /// rounded to two decimals.
    pub retention_rate: f64,
}

/// Statuses the analytics breakdown is seeded with.
const BREAKDOWN_STATUSES: [SubscriptionStatus; 5] = [
    SubscriptionStatus::Active,
    SubscriptionStatus::Inactive,
    SubscriptionStatus::Cancelled,
    SubscriptionStatus::Expired,
    SubscriptionStatus::Pending,
];

pub struct SubscriptionService {
    store: Arc<dyn UserStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: Arc<GatewayConfig>,
    /// Gateway plans are immutable priced objects; re-pointing a
    /// subscription at the same (plan, period, amount) must reuse the
    /// plan minted last time instead of leaking a new one per call.
    minted_plans: Mutex<HashMap<(SubscriptionPlan, BillingPeriod, i64), String>>,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn UserStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
            minted_plans: Mutex::new(HashMap::new()),
        }
    }

    /// Start a 7-day trial. The row becomes ACTIVE with a zero payment
    /// amount; the trial flag is what distinguishes it from a paid row.
    pub async fn start_trial(
        &self,
        user_id: &str,
        plan: SubscriptionPlan,
    ) -> BillingResult<UserRecord> {
        let now = Utc::now();
        let trial_end = now + Duration::days(pricing::TRIAL_PERIOD_DAYS);

        let patch = SubscriptionPatch {
            plan: Some(plan),
            status: Some(SubscriptionStatus::Active),
            start_date: Some(now),
            end_date: Some(trial_end),
            billing_period: Some(BillingPeriod::Monthly),
            last_payment_date: Some(None),
            next_billing_date: Some(trial_end),
            payment_amount: Some(0),
            is_trial_active: Some(true),
            trial_end_date: Some(Some(trial_end)),
            auto_renewal: Some(true),
            ..Default::default()
        };

        let user = self.store.update_subscription(user_id, &patch).await?;
        tracing::info!(user_id = %user_id, plan = %plan, trial_end = %trial_end, "trial started");
        Ok(user)
    }

    /// Activate a paid subscription, clearing any trial state. The
    /// customer id is pulled from the gateway subscription when one is
    /// referenced; a fetch failure leaves it unset rather than failing
    /// the activation.
    pub async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> BillingResult<UserRecord> {
        let now = Utc::now();
        let end_date = now
            .checked_add_months(Months::new(request.billing_period.months()))
            .ok_or_else(|| BillingError::Internal("subscription end date overflow".to_string()))?;

        let payment_amount = request
            .payment_amount
            .unwrap_or_else(|| pricing::price(request.plan, request.billing_period));

        let customer_id = match &request.razorpay_subscription_id {
            Some(subscription_id) => {
                match self.gateway.fetch_subscription(subscription_id).await {
                    Ok(remote) => remote.customer_id,
                    Err(e) => {
                        tracing::error!(
                            user_id = %request.user_id,
                            subscription_id = %subscription_id,
                            error = %e,
                            "could not fetch gateway subscription during activation"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        let patch = SubscriptionPatch {
            plan: Some(request.plan),
            status: Some(SubscriptionStatus::Active),
            start_date: Some(now),
            end_date: Some(end_date),
            billing_period: Some(request.billing_period),
            razorpay_subscription_id: Some(request.razorpay_subscription_id.clone()),
            razorpay_customer_id: Some(customer_id),
            last_payment_date: Some(Some(now)),
            next_billing_date: Some(end_date),
            payment_amount: Some(payment_amount),
            is_trial_active: Some(false),
            trial_end_date: Some(None),
            auto_renewal: Some(request.auto_renewal.unwrap_or(true)),
        };

        let user = self.store.update_subscription(&request.user_id, &patch).await?;
        tracing::info!(
            user_id = %request.user_id,
            plan = %request.plan,
            period = %request.billing_period,
            amount = payment_amount,
            "subscription activated"
        );
        Ok(user)
    }

    /// Cancel at the end of the current billing cycle. The stored
    /// status deliberately stays ACTIVE with `auto_renewal = false`;
    /// access checks compare dates instead of looking for a CANCELLED
    /// status. The gateway cancel is best-effort.
    pub async fn cancel_subscription(&self, user_id: &str) -> BillingResult<UserRecord> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))?;

        if let Some(subscription_id) = &user.subscription.razorpay_subscription_id {
            match self.gateway.cancel_subscription(subscription_id, true).await {
                Ok(remote) => {
                    tracing::info!(
                        user_id = %user_id,
                        subscription_id = %subscription_id,
                        gateway_status = %remote.status,
                        "gateway subscription will cancel at cycle end"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        user_id = %user_id,
                        subscription_id = %subscription_id,
                        error = %e,
                        "gateway cancel failed, proceeding with local cancellation"
                    );
                }
            }
        }

        let patch = SubscriptionPatch {
            status: Some(SubscriptionStatus::Active),
            auto_renewal: Some(false),
            ..Default::default()
        };
        let user = self.store.update_subscription(user_id, &patch).await?;
        tracing::info!(user_id = %user_id, "subscription cancelled at cycle end");
        Ok(user)
    }

    /// Apply a partial update. When the plan or amount changes and the
    /// gateway subscription is live, the gateway plan is re-pointed at
    /// a matching priced plan first; a gateway failure there is logged
    /// and the local update proceeds regardless.
    pub async fn update_subscription(
        &self,
        user_id: &str,
        patch: &SubscriptionPatch,
    ) -> BillingResult<UserRecord> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))?;

        let plan_changed = patch
            .plan
            .is_some_and(|new_plan| Some(new_plan) != user.subscription.plan);
        let amount_changed = patch
            .payment_amount
            .is_some_and(|amount| Some(amount) != user.subscription.payment_amount);

        if plan_changed || amount_changed {
            if let Some(subscription_id) = &user.subscription.razorpay_subscription_id {
                if let Err(e) = self
                    .repoint_gateway_plan(user_id, subscription_id, &user.subscription, patch)
                    .await
                {
                    tracing::error!(
                        user_id = %user_id,
                        subscription_id = %subscription_id,
                        error = %e,
                        "gateway plan re-point failed, applying local update anyway"
                    );
                }
            }
        }

        self.store.update_subscription(user_id, patch).await
    }

    async fn repoint_gateway_plan(
        &self,
        user_id: &str,
        subscription_id: &str,
        current: &SubscriptionRecord,
        patch: &SubscriptionPatch,
    ) -> BillingResult<()> {
        let remote = self.gateway.fetch_subscription(subscription_id).await?;
        if remote.status != "active" {
            tracing::debug!(
                user_id = %user_id,
                gateway_status = %remote.status,
                "gateway subscription not active, skipping plan re-point"
            );
            return Ok(());
        }

        let plan = patch
            .plan
            .or(current.plan)
            .ok_or_else(|| BillingError::InvalidRequest("no plan to re-point to".to_string()))?;
        let period = patch
            .billing_period
            .or(current.billing_period)
            .unwrap_or(BillingPeriod::Monthly);
        let amount = patch
            .payment_amount
            .or(current.payment_amount)
            .unwrap_or_else(|| pricing::price(plan, period));

        let plan_id = self.ensure_plan(plan, period, amount).await?;
        self.gateway
            .update_subscription(subscription_id, &plan_id)
            .await?;
        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription_id,
            plan = %plan,
            amount = amount,
            "gateway subscription re-pointed"
        );
        Ok(())
    }

    /// Resolve a gateway plan id for (plan, period, amount): the
    /// pre-provisioned id when the amount matches the pricing table,
    /// otherwise a minted plan, reused across calls with the same key.
    async fn ensure_plan(
        &self,
        plan: SubscriptionPlan,
        period: BillingPeriod,
        amount: i64,
    ) -> BillingResult<String> {
        if amount == pricing::price(plan, period) {
            if let Some(id) = self.config.plan_id_for(plan, period) {
                return Ok(id.to_string());
            }
        }

        let key = (plan, period, amount);
        {
            let minted = self
                .minted_plans
                .lock()
                .map_err(|_| BillingError::Internal("plan cache lock poisoned".to_string()))?;
            if let Some(id) = minted.get(&key) {
                return Ok(id.clone());
            }
        }

        let name = format!("{} Plan ({})", plan.as_str(), period.as_str());
        let handle = self
            .gateway
            .create_plan(&name, amount * 100, "INR", period)
            .await?;
        tracing::info!(plan = %plan, period = %period, amount = amount, plan_id = %handle.id, "minted gateway plan");

        self.minted_plans
            .lock()
            .map_err(|_| BillingError::Internal("plan cache lock poisoned".to_string()))?
            .insert(key, handle.id.clone());
        Ok(handle.id)
    }

    /// Read the subscription, reconciling against the gateway: when the
    /// gateway reports the referenced subscription cancelled or expired
    /// and the local row disagrees, the row is downgraded to INACTIVE
    /// as a side effect. Repeating the read is a no-op once the row
    /// already says INACTIVE. A gateway fetch failure degrades to the
    /// local view.
    pub async fn get_user_subscription(&self, user_id: &str) -> BillingResult<SubscriptionView> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))?;

        let mut subscription = user.subscription.clone();
        let mut razorpay_status = None;

        if let Some(subscription_id) = subscription.razorpay_subscription_id.clone() {
            match self.gateway.fetch_subscription(&subscription_id).await {
                Ok(remote) => {
                    let remote_dead = remote.status == "cancelled" || remote.status == "expired";
                    razorpay_status = Some(remote.status);
                    if remote_dead && subscription.status != Some(SubscriptionStatus::Inactive) {
                        tracing::info!(
                            user_id = %user_id,
                            subscription_id = %subscription_id,
                            "gateway reports subscription ended, downgrading local row"
                        );
                        let patch = SubscriptionPatch {
                            status: Some(SubscriptionStatus::Inactive),
                            ..Default::default()
                        };
                        let updated = self.store.update_subscription(user_id, &patch).await?;
                        subscription = updated.subscription;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        subscription_id = %subscription_id,
                        error = %e,
                        "gateway status fetch failed, serving local view"
                    );
                }
            }
        }

        Ok(SubscriptionView {
            user_id: user.id,
            email: user.email,
            name: user.name,
            plan: subscription.plan,
            status: subscription.status.unwrap_or(SubscriptionStatus::Inactive),
            start_date: subscription.start_date,
            end_date: subscription.end_date,
            billing_period: subscription.billing_period,
            razorpay_subscription_id: subscription.razorpay_subscription_id,
            razorpay_customer_id: subscription.razorpay_customer_id,
            last_payment_date: subscription.last_payment_date,
            next_billing_date: subscription.next_billing_date,
            payment_amount: subscription.payment_amount,
            is_trial_active: subscription.is_trial_active.unwrap_or(false),
            trial_end_date: subscription.trial_end_date,
            auto_renewal: subscription.auto_renewal.unwrap_or(true),
            razorpay_status,
        })
    }

    /// Price an upgrade. SEED<->BLOOM is a free plan switch; only
    /// moves to a strictly higher tier are priced; downgrades are
    /// rejected.
    pub async fn calculate_upgrade_price(
        &self,
        user_id: &str,
        new_plan: SubscriptionPlan,
    ) -> BillingResult<UpgradeQuote> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))?;
        let subscription = &user.subscription;

        let current_plan = subscription
            .plan
            .ok_or_else(|| BillingError::Validation("No subscription plan found".to_string()))?;
        if subscription.status != Some(SubscriptionStatus::Active) {
            return Err(BillingError::Validation(
                "Subscription is not active".to_string(),
            ));
        }

        let period = subscription.billing_period.unwrap_or(BillingPeriod::Monthly);

        if current_plan.tier() == new_plan.tier() {
            return Ok(UpgradeQuote {
                upgrade_price: 0,
                is_plan_switch: true,
                current_plan,
                new_plan,
                billing_period: period,
                unused_credit: 0,
                remaining_days: 0,
                current_plan_daily_rate: 0,
                new_plan_daily_rate: 0,
                full_new_plan_price: pricing::price(new_plan, period),
            });
        }
        if new_plan.tier() < current_plan.tier() {
            return Err(BillingError::Validation(
                "Can only upgrade to a higher plan".to_string(),
            ));
        }

        let end_date = subscription
            .end_date
            .ok_or_else(|| BillingError::Validation("No active subscription found".to_string()))?;

        Ok(upgrade_quote(current_plan, new_plan, period, end_date, Utc::now()))
    }

    /// Quote an upgrade and open a gateway order for the prorated
    /// charge. Free outcomes (plan switch, expired cycle) skip the
    /// gateway entirely. Unlike the mutations above this propagates
    /// gateway failures: no local state changes here, and an upgrade
    /// cannot be collected without the order.
    pub async fn create_upgrade_order(
        &self,
        user_id: &str,
        new_plan: SubscriptionPlan,
    ) -> BillingResult<UpgradeOrder> {
        let quote = self.calculate_upgrade_price(user_id, new_plan).await?;
        if quote.upgrade_price <= 0 {
            return Ok(UpgradeOrder { quote, order: None });
        }

        let receipt = format!("upg_{}_{}", user_id, Utc::now().timestamp());
        let notes = serde_json::json!({
            "user_id": user_id,
            "upgrade_to": new_plan.as_str(),
        });
        let order = self
            .gateway
            .create_order(quote.upgrade_price * 100, &receipt, notes)
            .await?;
        tracing::info!(
            user_id = %user_id,
            order_id = %order.id,
            amount = quote.upgrade_price,
            "upgrade order created"
        );
        Ok(UpgradeOrder {
            quote,
            order: Some(order),
        })
    }

    /// Access-eligibility check backing session and mentor listings.
    /// A cancelled-intent row keeps access until the boundary date;
    /// completed paid one-off bookings grant access regardless of
    /// subscription state.
    pub async fn has_active_access(&self, user_id: &str) -> BillingResult<bool> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))?;
        let subscription = &user.subscription;
        let now = Utc::now();

        match subscription.status {
            Some(SubscriptionStatus::Active) => {
                if subscription.end_date.is_none_or(|end| end > now) {
                    return Ok(true);
                }
            }
            Some(SubscriptionStatus::Cancelled) | Some(SubscriptionStatus::ActiveUntilEnd) => {
                let boundary = subscription.next_billing_date.or(subscription.end_date);
                if boundary.is_some_and(|date| date > now) {
                    return Ok(true);
                }
            }
            _ => {}
        }

        let paid_bookings = self.store.count_paid_session_bookings(user_id).await?;
        Ok(paid_bookings > 0)
    }

    /// Extend a trial by `days`, admin/moderator surface. The clock
    /// starts from the later of now and the current trial end so an
    /// expired trial is revived, not back-dated.
    pub async fn extend_trial(&self, user_id: &str, days: i64) -> BillingResult<UserRecord> {
        if days <= 0 {
            return Err(BillingError::Validation(
                "Extension days must be positive".to_string(),
            ));
        }

        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))?;

        let now = Utc::now();
        let base = user
            .subscription
            .trial_end_date
            .filter(|end| *end > now)
            .unwrap_or(now);
        let new_end = base + Duration::days(days);

        let patch = SubscriptionPatch {
            status: Some(SubscriptionStatus::Active),
            end_date: Some(new_end),
            next_billing_date: Some(new_end),
            payment_amount: Some(0),
            is_trial_active: Some(true),
            trial_end_date: Some(Some(new_end)),
            ..Default::default()
        };
        let user = self.store.update_subscription(user_id, &patch).await?;
        tracing::info!(user_id = %user_id, days = days, trial_end = %new_end, "trial extended");
        Ok(user)
    }

    /// Aggregate counts for the admin dashboard.
    pub async fn subscription_analytics(&self) -> BillingResult<SubscriptionAnalytics> {
        let snapshots = self.store.list_subscription_snapshots().await?;
        let now = Utc::now();
        let one_month_ago = now
            .checked_sub_months(Months::new(1))
            .unwrap_or(now - Duration::days(30));

        let mut plan_breakdown: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
        for plan in SubscriptionPlan::all() {
            let statuses = BREAKDOWN_STATUSES
                .iter()
                .map(|status| (status.as_str().to_string(), 0u64))
                .collect();
            plan_breakdown.insert(plan.as_str().to_string(), statuses);
        }

        let mut total_active = 0u64;
        let mut retained = 0u64;
        let mut periods = BillingPeriodBreakdown::default();

        for snapshot in &snapshots {
            let subscription = &snapshot.subscription;

            if let (Some(plan), Some(status)) = (subscription.plan, subscription.status) {
                *plan_breakdown
                    .entry(plan.as_str().to_string())
                    .or_default()
                    .entry(status.as_str().to_string())
                    .or_insert(0) += 1;
            }

            if subscription.status == Some(SubscriptionStatus::Active) {
                total_active += 1;
                match subscription.billing_period {
                    Some(BillingPeriod::Monthly) => periods.monthly += 1,
                    Some(BillingPeriod::Annual) => periods.annual += 1,
                    None => {}
                }
                if subscription.start_date.is_some_and(|start| start < one_month_ago) {
                    retained += 1;
                }
            }
        }

        let retention_rate = if total_active > 0 {
            ((retained as f64 / total_active as f64) * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        Ok(SubscriptionAnalytics {
            total_active_subscriptions: total_active,
            plan_breakdown,
            billing_period_breakdown: periods,
            retention_rate,
        })
    }
}

/// Static per-plan feature table.
pub fn has_feature_access(plan: SubscriptionPlan, feature: &str) -> bool {
    const SEED: &[&str] = &["basic_yoga", "online_support"];
    const BLOOM: &[&str] = &[
        "basic_yoga",
        "online_support",
        "live_sessions",
        "general_diet",
        "ai_chat",
    ];
    const FLOURISH: &[&str] = &[
        "basic_yoga",
        "online_support",
        "live_sessions",
        "general_diet",
        "ai_chat",
        "individual_sessions",
        "personalized_diet",
        "priority_support",
    ];

    let features = match plan {
        SubscriptionPlan::Seed => SEED,
        SubscriptionPlan::Bloom => BLOOM,
        SubscriptionPlan::Flourish => FLOURISH,
    };
    features.contains(&feature)
}

/// Prorated upgrade pricing over daily rates. The cycle is a fixed
/// 30 or 365 days; remaining days are rounded up, clamped at zero.
fn upgrade_quote(
    current_plan: SubscriptionPlan,
    new_plan: SubscriptionPlan,
    period: BillingPeriod,
    end_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> UpgradeQuote {
    let total_days = period.cycle_days();
    let remaining_seconds = (end_date - now).num_seconds();
    let days_remaining = if remaining_seconds <= 0 {
        0
    } else {
        (remaining_seconds + 86_399) / 86_400
    };

    let current_amount = pricing::price(current_plan, period) as f64;
    let new_amount = pricing::price(new_plan, period) as f64;
    let current_daily_rate = current_amount / total_days as f64;
    let new_daily_rate = new_amount / total_days as f64;

    let unused_credit = current_daily_rate * days_remaining as f64;
    let prorated_new_cost = new_daily_rate * days_remaining as f64;
    let upgrade_price = (prorated_new_cost - unused_credit).round().max(0.0) as i64;

    UpgradeQuote {
        upgrade_price,
        is_plan_switch: false,
        current_plan,
        new_plan,
        billing_period: period,
        unused_credit: unused_credit.round() as i64,
        remaining_days: days_remaining,
        current_plan_daily_rate: current_daily_rate.round() as i64,
        new_plan_daily_rate: new_daily_rate.round() as i64,
        full_new_plan_price: new_amount as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pricing_table() {
        assert_eq!(pricing::monthly_price(SubscriptionPlan::Seed), 1999);
        assert_eq!(pricing::monthly_price(SubscriptionPlan::Bloom), 1999);
        assert_eq!(pricing::monthly_price(SubscriptionPlan::Flourish), 4999);
        // 20% off twelve months, rounded.
        assert_eq!(pricing::annual_price(SubscriptionPlan::Bloom), 19190);
        assert_eq!(pricing::annual_price(SubscriptionPlan::Flourish), 47990);
    }

    #[test]
    fn test_upgrade_quote_proration() {
        let now = Utc::now();
        let quote = upgrade_quote(
            SubscriptionPlan::Bloom,
            SubscriptionPlan::Flourish,
            BillingPeriod::Monthly,
            now + Duration::days(15),
            now,
        );
        // (4999/30 - 1999/30) * 15 = 1500, rounded.
        assert_eq!(quote.remaining_days, 15);
        assert_eq!(quote.upgrade_price, 1500);
        assert!(!quote.is_plan_switch);
        assert_eq!(quote.full_new_plan_price, 4999);
    }

    #[test]
    fn test_upgrade_quote_monotonic_in_days_remaining() {
        let now = Utc::now();
        let mut last = 0;
        for days in 1..=30 {
            let quote = upgrade_quote(
                SubscriptionPlan::Seed,
                SubscriptionPlan::Flourish,
                BillingPeriod::Monthly,
                now + Duration::days(days),
                now,
            );
            assert!(
                quote.upgrade_price >= last,
                "price decreased at {days} days remaining"
            );
            last = quote.upgrade_price;
        }
    }

    #[test]
    fn test_upgrade_quote_expired_cycle_is_free() {
        let now = Utc::now();
        let quote = upgrade_quote(
            SubscriptionPlan::Bloom,
            SubscriptionPlan::Flourish,
            BillingPeriod::Monthly,
            now - Duration::days(1),
            now,
        );
        assert_eq!(quote.remaining_days, 0);
        assert_eq!(quote.upgrade_price, 0);
    }

    #[test]
    fn test_feature_table_is_cumulative() {
        assert!(has_feature_access(SubscriptionPlan::Seed, "basic_yoga"));
        assert!(!has_feature_access(SubscriptionPlan::Seed, "live_sessions"));
        assert!(has_feature_access(SubscriptionPlan::Bloom, "ai_chat"));
        assert!(!has_feature_access(SubscriptionPlan::Bloom, "priority_support"));
        assert!(has_feature_access(SubscriptionPlan::Flourish, "priority_support"));
        assert!(!has_feature_access(SubscriptionPlan::Flourish, "bespoke_retreats"));
    }
}
