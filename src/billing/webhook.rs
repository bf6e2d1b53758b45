//! Stripe webhook signature verification and event parsing.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::billing::stripe::StripeSubscription;
use crate::error::{AppError, BillingError, ValidationError};

type HmacSha256 = Hmac<Sha256>;

/// Clock skew allowed for timestamps from the future
const FUTURE_TOLERANCE_SECS: i64 = 60;

/// Verify a `Stripe-Signature` header (`t=<ts>,v1=<hex>[,v1=<hex>]`).
///
/// The signed payload is `"{t}.{body}"`; any `v1` entry may match (Stripe
/// sends several while a secret is being rolled).
pub fn verify_signature(
    payload: &[u8],
    signature_header: &str,
    webhook_secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), AppError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in signature_header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(s) = part.strip_prefix("v1=") {
            signatures.push(s);
        }
    }

    let timestamp_str = timestamp.ok_or(BillingError::InvalidSignature)?;
    if signatures.is_empty() {
        return Err(BillingError::InvalidSignature.into());
    }

    let timestamp: i64 = timestamp_str
        .parse()
        .map_err(|_| BillingError::InvalidSignature)?;

    let age = now - timestamp;
    if age > tolerance_secs {
        tracing::warn!(age = age, max = tolerance_secs, "Stripe webhook timestamp too old");
        return Err(BillingError::InvalidSignature.into());
    }
    if age < -FUTURE_TOLERANCE_SECS {
        tracing::warn!(age = age, "Stripe webhook timestamp in the future");
        return Err(BillingError::InvalidSignature.into());
    }

    let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())
        .map_err(|_| AppError::Internal("Invalid webhook secret".to_string()))?;
    mac.update(timestamp_str.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    // Lengths are public (64 hex chars); only the contents are compared in constant time
    let matched = signatures.iter().any(|candidate| {
        candidate.len() == expected.len()
            && bool::from(expected.as_bytes().ct_eq(candidate.as_bytes()))
    });

    if matched {
        Ok(())
    } else {
        Err(BillingError::InvalidSignature.into())
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    mode: Option<String>,
    customer: Option<String>,
    subscription: Option<String>,
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: CheckoutMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct CheckoutMetadata {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceObject {
    subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeletedSubscriptionObject {
    id: String,
}

/// Billing events the service acts on
#[derive(Debug)]
pub enum BillingEvent {
    CheckoutCompleted {
        user_id: String,
        customer_id: String,
        subscription_id: String,
    },
    InvoicePaid {
        subscription_id: String,
    },
    SubscriptionUpdated(StripeSubscription),
    SubscriptionDeleted {
        subscription_id: String,
    },
    Ignored(String),
}

/// Parse a verified webhook body; returns the event id and the event
pub fn parse_event(payload: &[u8]) -> Result<(String, BillingEvent), AppError> {
    let raw: RawEvent = serde_json::from_slice(payload).map_err(|e| {
        tracing::warn!("Failed to parse Stripe webhook: {}", e);
        ValidationError::InvalidFormat("webhook payload".to_string())
    })?;

    let event = match raw.event_type.as_str() {
        "checkout.session.completed" => {
            let session: CheckoutSessionObject = object(raw.data.object)?;
            let user_id = session.client_reference_id.or(session.metadata.user_id);

            match (session.mode.as_deref(), user_id, session.customer, session.subscription) {
                (Some("subscription"), Some(user_id), Some(customer_id), Some(subscription_id)) => {
                    BillingEvent::CheckoutCompleted {
                        user_id,
                        customer_id,
                        subscription_id,
                    }
                }
                _ => BillingEvent::Ignored(raw.event_type),
            }
        }
        "invoice.paid" | "invoice.payment_succeeded" => {
            let invoice: InvoiceObject = object(raw.data.object)?;
            match invoice.subscription {
                Some(subscription_id) => BillingEvent::InvoicePaid { subscription_id },
                None => BillingEvent::Ignored(raw.event_type),
            }
        }
        "customer.subscription.updated" => {
            BillingEvent::SubscriptionUpdated(object(raw.data.object)?)
        }
        "customer.subscription.deleted" => {
            let subscription: DeletedSubscriptionObject = object(raw.data.object)?;
            BillingEvent::SubscriptionDeleted {
                subscription_id: subscription.id,
            }
        }
        _ => BillingEvent::Ignored(raw.event_type),
    };

    Ok((raw.id, event))
}

fn object<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(value).map_err(|e| {
        tracing::warn!("Unexpected Stripe webhook object: {}", e);
        AppError::Validation(ValidationError::InvalidFormat("webhook object".to_string()))
    })
}
