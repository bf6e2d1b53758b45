/// Billing Routes
///
/// Checkout, billing portal, plan changes and cancellation. All amounts come
/// from Stripe; after each change the returned subscription is persisted.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::auth::Claims;
use crate::billing::{sync_subscription, BillingState, StripeSubscription};
use crate::db::{users, User};
use crate::error::{AppError, BillingError, DatabaseError, ErrorContext};
use crate::plans::{AccessTier, PlanCatalog};

#[derive(Deserialize)]
pub struct PlanRequest {
    pub tier: String,
}

#[derive(Deserialize)]
pub struct ChangePlanRequest {
    pub tier: String,
    /// From a previous preview, so the charge matches what was shown
    pub proration_date: Option<i64>,
}

#[derive(Serialize)]
pub struct UrlResponse {
    pub url: String,
}

#[derive(Serialize)]
pub struct SubscriptionResponse {
    pub tier: AccessTier,
    pub price_id: Option<String>,
    pub current_period_end: Option<String>,
    pub is_active: bool,
    pub cancel_at_period_end: bool,
}

impl SubscriptionResponse {
    fn from_user(user: &User, catalog: &PlanCatalog, cancel_at_period_end: bool) -> Self {
        let tier = user.tier(catalog);
        Self {
            tier,
            price_id: user.stripe_price_id.clone(),
            current_period_end: user.stripe_current_period_end.map(|t| t.to_rfc3339()),
            is_active: tier.is_paid(),
            cancel_at_period_end,
        }
    }
}

async fn load_user(pool: &PgPool, claims: &Claims) -> Result<User, AppError> {
    users::find_by_id(pool, claims.user_id()?)
        .await?
        .ok_or_else(|| DatabaseError::NotFound("User not found".to_string()).into())
}

fn paid_tier(tier: &str) -> Result<AccessTier, AppError> {
    let tier: AccessTier = tier.parse()?;
    if !tier.is_paid() {
        return Err(BillingError::UnknownPlan(tier.to_string()).into());
    }
    Ok(tier)
}

/// The user's live subscription as Stripe sees it
async fn current_subscription(
    state: &BillingState,
    user: &User,
) -> Result<StripeSubscription, AppError> {
    let (client, _) = state.stripe()?;
    let subscription_id = user
        .stripe_subscription_id
        .as_deref()
        .ok_or(BillingError::NoSubscription)?;

    let subscription = client.retrieve_subscription(subscription_id).await?;
    if !subscription.is_active() {
        return Err(BillingError::NoSubscription.into());
    }
    Ok(subscription)
}

/// GET /api/account/billing/subscription
pub async fn get_subscription(
    claims: web::ReqData<Claims>,
    pool: web::Data<PgPool>,
    catalog: web::Data<PlanCatalog>,
    state: web::Data<BillingState>,
) -> Result<HttpResponse, AppError> {
    let user = load_user(pool.get_ref(), &claims).await?;

    // Only paid users need the live cancellation flag from Stripe
    let cancel_at_period_end = match (&user.stripe_subscription_id, state.stripe()) {
        (Some(subscription_id), Ok((client, _))) if user.tier(catalog.get_ref()).is_paid() => {
            client
                .retrieve_subscription(subscription_id)
                .await?
                .cancel_at_period_end
        }
        _ => false,
    };

    Ok(HttpResponse::Ok().json(SubscriptionResponse::from_user(
        &user,
        catalog.get_ref(),
        cancel_at_period_end,
    )))
}

/// POST /api/account/billing/checkout
///
/// Creates the Stripe customer on first use and returns a hosted checkout URL.
///
/// # Errors
/// - 400: unknown or free tier
/// - 409: already on a paid plan (use change-plan or the portal)
pub async fn create_checkout(
    claims: web::ReqData<Claims>,
    form: web::Json<PlanRequest>,
    pool: web::Data<PgPool>,
    catalog: web::Data<PlanCatalog>,
    state: web::Data<BillingState>,
) -> Result<HttpResponse, AppError> {
    let (client, _) = state.stripe()?;
    let user = load_user(pool.get_ref(), &claims).await?;
    let context = ErrorContext::new("create_checkout").with_user_id(user.id.to_string());

    let tier = paid_tier(&form.tier)?;
    let price_id = catalog.price_for(tier)?;

    if user.tier(catalog.get_ref()).is_paid() {
        return Err(BillingError::AlreadySubscribed.into());
    }

    let customer_id = match &user.stripe_customer_id {
        Some(id) => id.clone(),
        None => {
            let id = client
                .create_customer(&user.email, &user.name, &user.id.to_string())
                .await?;
            users::set_stripe_customer(pool.get_ref(), user.id, &id).await?;
            id
        }
    };

    let success_url = format!("{}/dashboard/billing?checkout=success", state.base_url);
    let cancel_url = format!("{}/dashboard/billing?checkout=cancelled", state.base_url);
    let session = client
        .create_checkout_session(
            &customer_id,
            price_id,
            &user.id.to_string(),
            &success_url,
            &cancel_url,
        )
        .await?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %user.id,
        tier = %tier,
        checkout_session = %session.id,
        "Checkout session created"
    );

    Ok(HttpResponse::Ok().json(UrlResponse { url: session.url }))
}

/// POST /api/account/billing/portal
pub async fn create_portal(
    claims: web::ReqData<Claims>,
    pool: web::Data<PgPool>,
    state: web::Data<BillingState>,
) -> Result<HttpResponse, AppError> {
    let (client, _) = state.stripe()?;
    let user = load_user(pool.get_ref(), &claims).await?;
    let customer_id = user
        .stripe_customer_id
        .as_deref()
        .ok_or(BillingError::NoSubscription)?;

    let return_url = format!("{}/dashboard/billing", state.base_url);
    let url = client.create_portal_session(customer_id, &return_url).await?;

    Ok(HttpResponse::Ok().json(UrlResponse { url }))
}

/// POST /api/account/billing/preview
///
/// Returns Stripe's `amount_due` for switching to `tier` now.
pub async fn preview_plan_change(
    claims: web::ReqData<Claims>,
    form: web::Json<PlanRequest>,
    pool: web::Data<PgPool>,
    catalog: web::Data<PlanCatalog>,
    state: web::Data<BillingState>,
) -> Result<HttpResponse, AppError> {
    let (client, _) = state.stripe()?;
    let user = load_user(pool.get_ref(), &claims).await?;
    let new_price = catalog.price_for(paid_tier(&form.tier)?)?;

    let subscription = current_subscription(&state, &user).await?;
    let preview = client
        .preview_price_change(
            &subscription.customer,
            &subscription,
            new_price,
            Utc::now().timestamp(),
        )
        .await?;

    Ok(HttpResponse::Ok().json(preview))
}

/// POST /api/account/billing/change-plan
pub async fn change_plan(
    claims: web::ReqData<Claims>,
    form: web::Json<ChangePlanRequest>,
    pool: web::Data<PgPool>,
    catalog: web::Data<PlanCatalog>,
    state: web::Data<BillingState>,
) -> Result<HttpResponse, AppError> {
    let (client, _) = state.stripe()?;
    let user = load_user(pool.get_ref(), &claims).await?;
    let tier = paid_tier(&form.tier)?;
    let new_price = catalog.price_for(tier)?;

    let subscription = current_subscription(&state, &user).await?;
    let updated = if subscription.price_id()? == new_price {
        subscription
    } else {
        client
            .change_subscription_price(&subscription, new_price, form.proration_date)
            .await?
    };
    sync_subscription(pool.get_ref(), &updated).await?;

    tracing::info!(user_id = %user.id, tier = %tier, "Subscription plan changed");

    let user = load_user(pool.get_ref(), &claims).await?;
    Ok(HttpResponse::Ok().json(SubscriptionResponse::from_user(
        &user,
        catalog.get_ref(),
        updated.cancel_at_period_end,
    )))
}

/// POST /api/account/billing/cancel
///
/// Cancels at the end of the paid period; access continues until then.
pub async fn cancel_subscription(
    claims: web::ReqData<Claims>,
    pool: web::Data<PgPool>,
    catalog: web::Data<PlanCatalog>,
    state: web::Data<BillingState>,
) -> Result<HttpResponse, AppError> {
    let (client, _) = state.stripe()?;
    let user = load_user(pool.get_ref(), &claims).await?;

    let subscription = current_subscription(&state, &user).await?;
    let updated = client.cancel_at_period_end(&subscription.id).await?;
    sync_subscription(pool.get_ref(), &updated).await?;

    tracing::info!(user_id = %user.id, subscription_id = %updated.id, "Subscription set to cancel");

    Ok(HttpResponse::Ok().json(SubscriptionResponse::from_user(
        &user,
        catalog.get_ref(),
        updated.cancel_at_period_end,
    )))
}
