use actix_web::{web, HttpRequest, HttpResponse};
use sqlx::PgPool;

use crate::billing::{apply_event, parse_event, verify_signature, BillingState};
use crate::error::{AppError, BillingError, ErrorContext};

/// POST /api/webhooks/stripe
///
/// The raw body is needed for signature verification, so it is taken as
/// bytes and parsed only after the signature checks out.
///
/// # Errors
/// - 400: missing or invalid `Stripe-Signature`, or malformed payload
/// - 503: billing not configured
/// - 5xx from processing tells Stripe to retry
pub async fn stripe_webhook(
    req: HttpRequest,
    body: web::Bytes,
    pool: web::Data<PgPool>,
    state: web::Data<BillingState>,
) -> Result<HttpResponse, AppError> {
    let (client, settings) = state.stripe()?;
    let context = ErrorContext::new("stripe_webhook");

    let signature = req
        .headers()
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
        .ok_or(BillingError::InvalidSignature)?;

    verify_signature(
        &body,
        signature,
        &settings.webhook_secret,
        settings.webhook_tolerance_seconds,
        chrono::Utc::now().timestamp(),
    )?;

    let (event_id, event) = parse_event(&body)?;
    tracing::info!(
        request_id = %context.request_id,
        event_id = %event_id,
        "Stripe webhook received"
    );

    apply_event(pool.get_ref(), client, event).await.map_err(|e| {
        context.log_error(&e);
        e
    })?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "received": true })))
}
