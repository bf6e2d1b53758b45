/// Access tiers and the plan catalog
///
/// A user's tier is derived from the Stripe price they pay for and the end of
/// the period they paid for. Prices are configured per tier, never hard-coded.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::configuration::PlanSettings;
use crate::error::{BillingError, ConfigError};

/// Renewal webhooks can land after the period end; keep access for a day.
const GRACE_PERIOD_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessTier {
    Free,
    Pro,
    Business,
}

impl AccessTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessTier::Free => "free",
            AccessTier::Pro => "pro",
            AccessTier::Business => "business",
        }
    }

    pub fn is_paid(&self) -> bool {
        *self != AccessTier::Free
    }
}

impl fmt::Display for AccessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessTier {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(AccessTier::Free),
            "pro" => Ok(AccessTier::Pro),
            "business" => Ok(AccessTier::Business),
            other => Err(BillingError::UnknownPlan(other.to_string())),
        }
    }
}

/// Paid tiers and their Stripe prices
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    plans: Vec<(AccessTier, String)>,
}

impl PlanCatalog {
    pub fn from_settings(settings: &[PlanSettings]) -> Result<Self, ConfigError> {
        let mut plans: Vec<(AccessTier, String)> = Vec::with_capacity(settings.len());

        for plan in settings {
            let tier: AccessTier = plan
                .tier
                .parse()
                .map_err(|e: BillingError| ConfigError::InvalidValue(e.to_string()))?;

            if !tier.is_paid() {
                return Err(ConfigError::InvalidValue(
                    "the free tier cannot have a Stripe price".to_string(),
                ));
            }
            if plan.price_id.trim().is_empty() {
                return Err(ConfigError::MissingRequired(format!("price_id for tier {}", tier)));
            }
            if plans.iter().any(|(t, p)| *t == tier || *p == plan.price_id) {
                return Err(ConfigError::InvalidValue(format!(
                    "duplicate plan entry for tier {} / price {}",
                    tier, plan.price_id
                )));
            }

            plans.push((tier, plan.price_id.clone()));
        }

        Ok(Self { plans })
    }

    /// Stripe price for a paid tier
    pub fn price_for(&self, tier: AccessTier) -> Result<&str, BillingError> {
        self.plans
            .iter()
            .find(|(t, _)| *t == tier)
            .map(|(_, price)| price.as_str())
            .ok_or_else(|| BillingError::UnknownPlan(tier.to_string()))
    }

    pub fn tier_for_price(&self, price_id: &str) -> Option<AccessTier> {
        self.plans
            .iter()
            .find(|(_, p)| p == price_id)
            .map(|(tier, _)| *tier)
    }
}

/// Tier a subscriber is entitled to at `now`.
///
/// `Free` unless the price is in the catalog and the paid period (plus grace)
/// has not ended.
pub fn effective_tier(
    catalog: &PlanCatalog,
    price_id: Option<&str>,
    current_period_end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> AccessTier {
    match (price_id, current_period_end) {
        (Some(price), Some(period_end))
            if period_end + Duration::hours(GRACE_PERIOD_HOURS) > now =>
        {
            catalog.tier_for_price(price).unwrap_or(AccessTier::Free)
        }
        _ => AccessTier::Free,
    }
}
