//! Billing invariants
//!
//! Runnable consistency checks over the subscription rows. Run after
//! webhook replays or bulk admin edits to confirm the system is in a
//! valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: each invariant scans real rows, not assumptions
//! 2. **Explanatory**: violations carry enough context to debug
//! 3. **Non-destructive**: checks only read, never write

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BillingResult;
use crate::store::{SubscriptionSnapshot, UserStore};
use yogvaidya_shared::SubscriptionStatus;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Users affected
    pub user_ids: Vec<String>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - users may be charged incorrectly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: DateTime<Utc>,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    store: Arc<dyn UserStore>,
}

impl InvariantChecker {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = Utc::now();
        let snapshots = self.store.list_subscription_snapshots().await?;

        let mut violations = Vec::new();
        violations.extend(check_trial_zero_amount(&snapshots));
        violations.extend(check_active_has_plan(&snapshots));
        violations.extend(check_cancelled_has_end_date(&snapshots));
        violations.extend(check_trial_has_end_date(&snapshots));

        let checks_run = Self::available_checks().len();
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        let snapshots = self.store.list_subscription_snapshots().await?;
        Ok(match name {
            "trial_zero_amount" => check_trial_zero_amount(&snapshots),
            "active_has_plan" => check_active_has_plan(&snapshots),
            "cancelled_has_end_date" => check_cancelled_has_end_date(&snapshots),
            "trial_has_end_date" => check_trial_has_end_date(&snapshots),
            _ => vec![],
        })
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "trial_zero_amount",
            "active_has_plan",
            "cancelled_has_end_date",
            "trial_has_end_date",
        ]
    }
}

/// Invariant 1: A trial never coexists with a non-zero payment amount.
///
/// A trial row carrying a charge means someone was billed during a
/// period sold as free.
fn check_trial_zero_amount(snapshots: &[SubscriptionSnapshot]) -> Vec<InvariantViolation> {
    snapshots
        .iter()
        .filter(|s| {
            s.subscription.is_trial_active == Some(true)
                && s.subscription.payment_amount.is_some_and(|amount| amount != 0)
        })
        .map(|s| InvariantViolation {
            invariant: "trial_zero_amount".to_string(),
            user_ids: vec![s.user_id.clone()],
            description: format!(
                "Trial subscription has non-zero payment amount ({})",
                s.subscription.payment_amount.unwrap_or_default()
            ),
            context: serde_json::json!({
                "payment_amount": s.subscription.payment_amount,
                "trial_end_date": s.subscription.trial_end_date,
            }),
            severity: ViolationSeverity::Critical,
        })
        .collect()
}

/// Invariant 2: An ACTIVE row names a plan.
///
/// Access checks and pricing both key off the plan; an ACTIVE row
/// without one grants undefined entitlements.
fn check_active_has_plan(snapshots: &[SubscriptionSnapshot]) -> Vec<InvariantViolation> {
    snapshots
        .iter()
        .filter(|s| {
            s.subscription.status == Some(SubscriptionStatus::Active)
                && s.subscription.plan.is_none()
        })
        .map(|s| InvariantViolation {
            invariant: "active_has_plan".to_string(),
            user_ids: vec![s.user_id.clone()],
            description: "ACTIVE subscription has no plan".to_string(),
            context: serde_json::json!({
                "status": s.subscription.status,
                "payment_amount": s.subscription.payment_amount,
            }),
            severity: ViolationSeverity::High,
        })
        .collect()
}

/// Invariant 3: A cancelled-intent row has an access-end boundary.
///
/// Cancellation keeps access until a date; without `next_billing_date`
/// or `end_date` there is no way to know when to revoke it. Cancelled
/// intent is either an explicit CANCELLED/ACTIVE_UNTIL_END status or
/// an ACTIVE row with `auto_renewal = false`.
fn check_cancelled_has_end_date(snapshots: &[SubscriptionSnapshot]) -> Vec<InvariantViolation> {
    snapshots
        .iter()
        .filter(|s| {
            let sub = &s.subscription;
            let cancelled_intent = matches!(
                sub.status,
                Some(SubscriptionStatus::Cancelled) | Some(SubscriptionStatus::ActiveUntilEnd)
            ) || (sub.status == Some(SubscriptionStatus::Active)
                && sub.auto_renewal == Some(false));
            cancelled_intent && sub.next_billing_date.is_none() && sub.end_date.is_none()
        })
        .map(|s| InvariantViolation {
            invariant: "cancelled_has_end_date".to_string(),
            user_ids: vec![s.user_id.clone()],
            description: "Cancelled subscription has no access-end date".to_string(),
            context: serde_json::json!({
                "status": s.subscription.status,
                "auto_renewal": s.subscription.auto_renewal,
            }),
            severity: ViolationSeverity::High,
        })
        .collect()
}

/// Invariant 4: An active trial has a trial end date.
fn check_trial_has_end_date(snapshots: &[SubscriptionSnapshot]) -> Vec<InvariantViolation> {
    snapshots
        .iter()
        .filter(|s| {
            s.subscription.is_trial_active == Some(true)
                && s.subscription.trial_end_date.is_none()
        })
        .map(|s| InvariantViolation {
            invariant: "trial_has_end_date".to_string(),
            user_ids: vec![s.user_id.clone()],
            description: "Active trial has no trial end date".to_string(),
            context: serde_json::json!({
                "plan": s.subscription.plan,
                "end_date": s.subscription.end_date,
            }),
            severity: ViolationSeverity::Medium,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SubscriptionRecord;
    use yogvaidya_shared::SubscriptionPlan;

    fn snapshot(user_id: &str, subscription: SubscriptionRecord) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            user_id: user_id.to_string(),
            subscription,
        }
    }

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 4);
        assert!(checks.contains(&"trial_zero_amount"));
        assert!(checks.contains(&"cancelled_has_end_date"));
    }

    #[test]
    fn test_trial_with_charge_is_critical() {
        let snapshots = vec![
            snapshot(
                "user_1",
                SubscriptionRecord {
                    is_trial_active: Some(true),
                    payment_amount: Some(1999),
                    trial_end_date: Some(Utc::now()),
                    ..Default::default()
                },
            ),
            snapshot(
                "user_2",
                SubscriptionRecord {
                    is_trial_active: Some(true),
                    payment_amount: Some(0),
                    trial_end_date: Some(Utc::now()),
                    ..Default::default()
                },
            ),
        ];

        let violations = check_trial_zero_amount(&snapshots);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].user_ids, vec!["user_1".to_string()]);
        assert_eq!(violations[0].severity, ViolationSeverity::Critical);
    }

    #[test]
    fn test_active_without_plan_flagged() {
        let snapshots = vec![
            snapshot(
                "user_1",
                SubscriptionRecord {
                    status: Some(SubscriptionStatus::Active),
                    plan: None,
                    ..Default::default()
                },
            ),
            snapshot(
                "user_2",
                SubscriptionRecord {
                    status: Some(SubscriptionStatus::Active),
                    plan: Some(SubscriptionPlan::Bloom),
                    ..Default::default()
                },
            ),
            snapshot(
                "user_3",
                SubscriptionRecord {
                    status: Some(SubscriptionStatus::Inactive),
                    plan: None,
                    ..Default::default()
                },
            ),
        ];

        let violations = check_active_has_plan(&snapshots);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].user_ids, vec!["user_1".to_string()]);
    }

    #[test]
    fn test_cancelled_intent_needs_boundary_date() {
        // ACTIVE with auto_renewal=false is the normal cancel encoding.
        let dateless = snapshot(
            "user_1",
            SubscriptionRecord {
                status: Some(SubscriptionStatus::Active),
                auto_renewal: Some(false),
                ..Default::default()
            },
        );
        let with_date = snapshot(
            "user_2",
            SubscriptionRecord {
                status: Some(SubscriptionStatus::Cancelled),
                next_billing_date: Some(Utc::now()),
                ..Default::default()
            },
        );
        let renewing = snapshot(
            "user_3",
            SubscriptionRecord {
                status: Some(SubscriptionStatus::Active),
                auto_renewal: Some(true),
                ..Default::default()
            },
        );

        let violations = check_cancelled_has_end_date(&[dateless, with_date, renewing]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].user_ids, vec!["user_1".to_string()]);
    }

    #[test]
    fn test_trial_without_end_date_flagged() {
        let snapshots = vec![snapshot(
            "user_1",
            SubscriptionRecord {
                is_trial_active: Some(true),
                trial_end_date: None,
                ..Default::default()
            },
        )];

        let violations = check_trial_has_end_date(&snapshots);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, ViolationSeverity::Medium);
    }
}
