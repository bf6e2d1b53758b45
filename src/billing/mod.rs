/// Billing module
///
/// Stripe is the source of truth for subscriptions and amounts. This module
/// calls Stripe and persists the identifiers it returns on the user row.

mod events;
mod stripe;
mod webhook;

pub use events::{apply_event, sync_subscription};
pub use stripe::{CheckoutSession, ProrationPreview, StripeClient, StripeSubscription};
pub use webhook::{parse_event, verify_signature, BillingEvent};

use crate::configuration::StripeSettings;
use crate::error::{AppError, BillingError};

/// Billing dependencies shared with request handlers
///
/// Stripe is optional so the service can run (auth only) without keys.
pub struct BillingState {
    stripe: Option<(StripeClient, StripeSettings)>,
    pub base_url: String,
}

impl BillingState {
    pub fn new(settings: Option<StripeSettings>, base_url: String) -> Self {
        Self {
            stripe: settings.map(|s| (StripeClient::new(&s), s)),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn stripe(&self) -> Result<(&StripeClient, &StripeSettings), AppError> {
        self.stripe
            .as_ref()
            .map(|(client, settings)| (client, settings))
            .ok_or(AppError::Billing(BillingError::NotConfigured))
    }
}
