//! Admin endpoints: analytics and invariant checks.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiResult;
use crate::routes::success;
use crate::state::AppState;
use yogvaidya_billing::InvariantChecker;

/// GET /api/v1/admin/subscription-analytics
pub async fn subscription_analytics(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let analytics = state.billing.subscriptions.subscription_analytics().await?;
    Ok(success(analytics))
}

#[derive(Debug, Deserialize)]
pub struct InvariantsQuery {
    /// Run a single named check instead of the full suite.
    pub check: Option<String>,
}

/// GET /api/v1/admin/invariants
pub async fn invariants(
    State(state): State<AppState>,
    Query(query): Query<InvariantsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    match query.check {
        Some(name) => {
            let violations = state.billing.invariants.run_check(&name).await?;
            Ok(Json(json!({
                "success": true,
                "data": {
                    "check": name,
                    "violations": violations,
                    "available_checks": InvariantChecker::available_checks(),
                },
            })))
        }
        None => {
            let summary = state.billing.invariants.run_all_checks().await?;
            Ok(success(summary))
        }
    }
}
