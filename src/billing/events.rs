use sqlx::PgPool;
use uuid::Uuid;

use crate::billing::stripe::{StripeClient, StripeSubscription};
use crate::billing::webhook::BillingEvent;
use crate::db::{users, SubscriptionUpdate};
use crate::error::AppError;

/// Copy a Stripe subscription's price and period end onto its subscriber.
///
/// Returns the number of users updated (0 when nobody holds the subscription).
pub async fn sync_subscription(
    pool: &PgPool,
    subscription: &StripeSubscription,
) -> Result<u64, AppError> {
    users::update_subscription_by_stripe_id(
        pool,
        &subscription.id,
        subscription.price_id()?,
        subscription.period_end()?,
    )
    .await
}

/// Apply a verified webhook event to the user table.
///
/// Events that reference unknown users or subscriptions are logged and
/// acknowledged; Stripe would otherwise retry them for days.
pub async fn apply_event(
    pool: &PgPool,
    client: &StripeClient,
    event: BillingEvent,
) -> Result<(), AppError> {
    match event {
        BillingEvent::CheckoutCompleted {
            user_id,
            customer_id,
            subscription_id,
        } => {
            let user_id = match Uuid::parse_str(&user_id) {
                Ok(id) => id,
                Err(_) => {
                    tracing::warn!(user_id = %user_id, "Checkout completed with a malformed user id");
                    return Ok(());
                }
            };

            let subscription = client.retrieve_subscription(&subscription_id).await?;
            let update = SubscriptionUpdate {
                customer_id,
                subscription_id: subscription.id.clone(),
                price_id: subscription.price_id()?.to_string(),
                current_period_end: subscription.period_end()?,
            };

            let updated = users::update_subscription(pool, user_id, &update).await?;
            if updated == 0 {
                tracing::warn!(user_id = %user_id, "Checkout completed for unknown user");
            } else {
                tracing::info!(
                    user_id = %user_id,
                    subscription_id = %update.subscription_id,
                    price_id = %update.price_id,
                    "Subscription started"
                );
            }
        }

        BillingEvent::InvoicePaid { subscription_id } => {
            let subscription = client.retrieve_subscription(&subscription_id).await?;
            if sync_subscription(pool, &subscription).await? == 0 {
                tracing::warn!(subscription_id = %subscription_id, "Invoice paid for unknown subscription");
            } else {
                tracing::info!(subscription_id = %subscription_id, "Subscription renewed");
            }
        }

        BillingEvent::SubscriptionUpdated(subscription) => {
            let subscriber = users::find_by_stripe_subscription(pool, &subscription.id).await?;
            let user = match subscriber {
                Some(user) => user,
                None => {
                    tracing::debug!(subscription_id = %subscription.id, "Update for unknown subscription");
                    return Ok(());
                }
            };

            sync_subscription(pool, &subscription).await?;
            tracing::info!(
                user_id = %user.id,
                subscription_id = %subscription.id,
                status = %subscription.status,
                "Subscription updated"
            );
        }

        BillingEvent::SubscriptionDeleted { subscription_id } => {
            let subscriber = users::find_by_stripe_subscription(pool, &subscription_id).await?;
            let user = match subscriber {
                Some(user) => user,
                None => {
                    tracing::debug!(subscription_id = %subscription_id, "Deletion for unknown subscription");
                    return Ok(());
                }
            };

            users::clear_subscription(pool, &subscription_id).await?;
            tracing::info!(
                user_id = %user.id,
                subscription_id = %subscription_id,
                "Subscription ended"
            );
        }

        BillingEvent::Ignored(event_type) => {
            tracing::debug!(event_type = %event_type, "Ignoring Stripe event");
        }
    }

    Ok(())
}
