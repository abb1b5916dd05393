//! Subscription domain enums
//!
//! These mirror the columns stored on the `users` table. The string
//! encodings (`SCREAMING_CASE` for plan/status, lowercase for billing
//! period) match what the webhooks and the dashboard clients exchange.

use serde::{Deserialize, Serialize};

/// Subscription plan tiers.
///
/// SEED and BLOOM sit on the same pricing tier; FLOURISH is the only
/// higher tier. Moving between SEED and BLOOM is a "plan switch" (free),
/// moving to FLOURISH is an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionPlan {
    Seed,
    Bloom,
    Flourish,
}

impl SubscriptionPlan {
    /// Tier level used for upgrade validation. SEED and BLOOM are equal.
    pub fn tier(&self) -> u8 {
        match self {
            SubscriptionPlan::Seed | SubscriptionPlan::Bloom => 0,
            SubscriptionPlan::Flourish => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionPlan::Seed => "SEED",
            SubscriptionPlan::Bloom => "BLOOM",
            SubscriptionPlan::Flourish => "FLOURISH",
        }
    }

    pub fn all() -> [SubscriptionPlan; 3] {
        [
            SubscriptionPlan::Seed,
            SubscriptionPlan::Bloom,
            SubscriptionPlan::Flourish,
        ]
    }
}

impl std::fmt::Display for SubscriptionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SubscriptionPlan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SEED" => Ok(SubscriptionPlan::Seed),
            "BLOOM" => Ok(SubscriptionPlan::Bloom),
            "FLOURISH" => Ok(SubscriptionPlan::Flourish),
            other => Err(format!("unknown subscription plan: {other}")),
        }
    }
}

/// Subscription lifecycle status.
///
/// Note: cancellation keeps the stored status at `Active` with
/// `auto_renewal = false`; access checks rely on date comparisons.
/// `ActiveUntilEnd` exists for rows written by admin tooling and is
/// honored by the access-eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    ActiveUntilEnd,
    Cancelled,
    Expired,
    Inactive,
    Pending,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::ActiveUntilEnd => "ACTIVE_UNTIL_END",
            SubscriptionStatus::Cancelled => "CANCELLED",
            SubscriptionStatus::Expired => "EXPIRED",
            SubscriptionStatus::Inactive => "INACTIVE",
            SubscriptionStatus::Pending => "PENDING",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(SubscriptionStatus::Active),
            "ACTIVE_UNTIL_END" => Ok(SubscriptionStatus::ActiveUntilEnd),
            "CANCELLED" => Ok(SubscriptionStatus::Cancelled),
            "EXPIRED" => Ok(SubscriptionStatus::Expired),
            "INACTIVE" => Ok(SubscriptionStatus::Inactive),
            "PENDING" => Ok(SubscriptionStatus::Pending),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

/// Billing cycle length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    Annual,
}

impl BillingPeriod {
    /// Billing cycle length in months.
    pub fn months(&self) -> u32 {
        match self {
            BillingPeriod::Monthly => 1,
            BillingPeriod::Annual => 12,
        }
    }

    /// Day count used for daily-rate proration.
    pub fn cycle_days(&self) -> i64 {
        match self {
            BillingPeriod::Monthly => 30,
            BillingPeriod::Annual => 365,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Annual => "annual",
        }
    }
}

impl std::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BillingPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "monthly" => Ok(BillingPeriod::Monthly),
            "annual" => Ok(BillingPeriod::Annual),
            other => Err(format!("unknown billing period: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_tier_ordering() {
        assert_eq!(
            SubscriptionPlan::Seed.tier(),
            SubscriptionPlan::Bloom.tier()
        );
        assert!(SubscriptionPlan::Flourish.tier() > SubscriptionPlan::Bloom.tier());
    }

    #[test]
    fn test_plan_parse_roundtrip() {
        for plan in SubscriptionPlan::all() {
            let parsed: SubscriptionPlan = plan.as_str().parse().unwrap();
            assert_eq!(parsed, plan);
        }
        assert!("PLATINUM".parse::<SubscriptionPlan>().is_err());
    }

    #[test]
    fn test_billing_period_cycle() {
        assert_eq!(BillingPeriod::Monthly.months(), 1);
        assert_eq!(BillingPeriod::Annual.months(), 12);
        assert_eq!(BillingPeriod::Monthly.cycle_days(), 30);
        assert_eq!(BillingPeriod::Annual.cycle_days(), 365);
    }
}
