//! Subscription lifecycle endpoints.
//!
//! These back the admin/moderator subscription-management UI. Mutations
//! return the updated user row; reads return the normalized view with
//! the live gateway status attached when it was reachable.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use yogvaidya_shared::{BillingPeriod, SubscriptionPlan, SubscriptionStatus};

use crate::error::ApiResult;
use crate::routes::success;
use crate::state::AppState;
use yogvaidya_billing::{CreateSubscriptionRequest, SubscriptionPatch};

/// GET /api/v1/subscription/{user_id}
///
/// Reading a subscription reconciles it against the gateway first, so
/// a remotely-cancelled subscription comes back already downgraded.
pub async fn get_subscription(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let view = state
        .billing
        .subscriptions
        .get_user_subscription(&user_id)
        .await?;
    Ok(success(view))
}

/// POST /api/v1/subscription
pub async fn activate(
    State(state): State<AppState>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = state
        .billing
        .subscriptions
        .create_subscription(request)
        .await?;
    Ok(success(user))
}

#[derive(Debug, Deserialize)]
pub struct StartTrialRequest {
    pub plan: SubscriptionPlan,
}

/// POST /api/v1/subscription/{user_id}/trial
pub async fn start_trial(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<StartTrialRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = state
        .billing
        .subscriptions
        .start_trial(&user_id, request.plan)
        .await?;
    Ok(success(user))
}

#[derive(Debug, Deserialize)]
pub struct ExtendTrialRequest {
    pub days: i64,
}

/// POST /api/v1/subscription/{user_id}/trial/extend
pub async fn extend_trial(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<ExtendTrialRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = state
        .billing
        .subscriptions
        .extend_trial(&user_id, request.days)
        .await?;
    Ok(success(user))
}

/// POST /api/v1/subscription/{user_id}/cancel
///
/// Cancel-at-cycle-end: the row stays ACTIVE with auto-renewal off,
/// and access runs until the period the user already paid for ends.
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = state
        .billing
        .subscriptions
        .cancel_subscription(&user_id)
        .await?;
    Ok(success(user))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePriceRequest {
    pub new_plan: SubscriptionPlan,
}

/// POST /api/v1/subscription/{user_id}/upgrade-price
pub async fn upgrade_price(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<UpgradePriceRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let quote = state
        .billing
        .subscriptions
        .calculate_upgrade_price(&user_id, request.new_plan)
        .await?;
    Ok(success(quote))
}

/// POST /api/v1/subscription/{user_id}/upgrade-order
///
/// Quote the upgrade and open the gateway order collecting the
/// prorated charge. Free outcomes carry no order.
pub async fn upgrade_order(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<UpgradePriceRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let order = state
        .billing
        .subscriptions
        .create_upgrade_order(&user_id, request.new_plan)
        .await?;
    Ok(success(order))
}

/// PATCH body. Absent fields are left untouched; present fields
/// overwrite. Clearing a nullable column is not exposed here.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSubscriptionRequest {
    pub plan: Option<SubscriptionPlan>,
    pub status: Option<SubscriptionStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub billing_period: Option<BillingPeriod>,
    pub razorpay_subscription_id: Option<String>,
    pub razorpay_customer_id: Option<String>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub payment_amount: Option<i64>,
    pub is_trial_active: Option<bool>,
    pub trial_end_date: Option<DateTime<Utc>>,
    pub auto_renewal: Option<bool>,
}

impl UpdateSubscriptionRequest {
    fn into_patch(self) -> SubscriptionPatch {
        SubscriptionPatch {
            plan: self.plan,
            status: self.status,
            start_date: self.start_date,
            end_date: self.end_date,
            billing_period: self.billing_period,
            razorpay_subscription_id: self.razorpay_subscription_id.map(Some),
            razorpay_customer_id: self.razorpay_customer_id.map(Some),
            last_payment_date: self.last_payment_date.map(Some),
            next_billing_date: self.next_billing_date,
            payment_amount: self.payment_amount,
            is_trial_active: self.is_trial_active,
            trial_end_date: self.trial_end_date.map(Some),
            auto_renewal: self.auto_renewal,
        }
    }
}

/// PATCH /api/v1/subscription/{user_id}
///
/// Plan or amount changes are mirrored to the gateway best-effort
/// before the local row is written.
pub async fn update_subscription(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<UpdateSubscriptionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let patch = request.into_patch();
    let user = state
        .billing
        .subscriptions
        .update_subscription(&user_id, &patch)
        .await?;
    Ok(success(user))
}

/// GET /api/v1/subscription/{user_id}/access
pub async fn check_access(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let has_access = state
        .billing
        .subscriptions
        .has_active_access(&user_id)
        .await?;
    Ok(Json(json!({
        "success": true,
        "data": { "hasAccess": has_access },
    })))
}
