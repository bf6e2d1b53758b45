use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::configuration::StripeSettings;
use crate::error::{AppError, BillingError};

// Amounts are never computed here. Proration previews and charges come back
// from Stripe as `amount_due` and are passed through unchanged.

#[derive(Debug, Clone)]
pub struct StripeClient {
    http: Client,
    secret_key: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PortalSession {
    url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

// ============ subscriptions ============

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub current_period_end: i64,
    pub items: StripeList<StripeSubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItem {
    pub id: String,
    pub price: StripePrice,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    pub id: String,
}

impl StripeSubscription {
    /// The single line item of a one-plan subscription
    pub fn primary_item(&self) -> Result<&StripeSubscriptionItem, AppError> {
        self.items.data.first().ok_or_else(|| {
            AppError::Billing(BillingError::Provider(format!(
                "subscription {} has no items",
                self.id
            )))
        })
    }

    pub fn price_id(&self) -> Result<&str, AppError> {
        Ok(self.primary_item()?.price.id.as_str())
    }

    pub fn period_end(&self) -> Result<DateTime<Utc>, AppError> {
        Utc.timestamp_opt(self.current_period_end, 0)
            .single()
            .ok_or_else(|| {
                AppError::Billing(BillingError::Provider(format!(
                    "invalid current_period_end {}",
                    self.current_period_end
                )))
            })
    }

    /// Stripe statuses that still grant access
    pub fn is_active(&self) -> bool {
        matches!(self.status.as_str(), "active" | "trialing" | "past_due")
    }
}

// ============ invoices ============

#[derive(Debug, Deserialize)]
struct UpcomingInvoice {
    amount_due: i64,
    currency: String,
}

/// What Stripe would charge now for switching price
#[derive(Debug, Clone, Serialize)]
pub struct ProrationPreview {
    pub amount_due: i64,
    pub currency: String,
    /// Pass back to `change_subscription_price` to be billed the previewed amount
    pub proration_date: i64,
}

impl StripeClient {
    pub fn new(settings: &StripeSettings) -> Self {
        Self {
            http: Client::new(),
            secret_key: settings.secret_key.clone(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, AppError> {
        let response = request.basic_auth(&self.secret_key, None::<&str>).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorBody>(&body)
                .ok()
                .map(|b| {
                    format!(
                        "{}: {}",
                        b.error.kind.unwrap_or_else(|| "api_error".to_string()),
                        b.error.message.unwrap_or_default()
                    )
                })
                .unwrap_or(body);
            tracing::error!(status = status.as_u16(), error = %message, "Stripe API request failed");
            return Err(AppError::Billing(BillingError::Provider(format!(
                "{} {}",
                status.as_u16(),
                message
            ))));
        }

        response.json::<T>().await.map_err(|e| {
            AppError::Billing(BillingError::Provider(format!(
                "Failed to parse Stripe response: {}",
                e
            )))
        })
    }

    pub async fn create_customer(
        &self,
        email: &str,
        name: &str,
        user_id: &str,
    ) -> Result<String, AppError> {
        let customer: CreatedObject = self
            .send(self.http.post(self.url("customers")).form(&[
                ("email", email),
                ("name", name),
                ("metadata[user_id]", user_id),
            ]))
            .await?;

        Ok(customer.id)
    }

    /// Hosted checkout for a recurring price
    pub async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_id: &str,
        user_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, AppError> {
        self.send(self.http.post(self.url("checkout/sessions")).form(&[
            ("mode", "subscription"),
            ("customer", customer_id),
            ("client_reference_id", user_id),
            ("success_url", success_url),
            ("cancel_url", cancel_url),
            ("line_items[0][price]", price_id),
            ("line_items[0][quantity]", "1"),
            ("metadata[user_id]", user_id),
            ("subscription_data[metadata][user_id]", user_id),
        ]))
        .await
    }

    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, AppError> {
        let session: PortalSession = self
            .send(
                self.http
                    .post(self.url("billing_portal/sessions"))
                    .form(&[("customer", customer_id), ("return_url", return_url)]),
            )
            .await?;

        Ok(session.url)
    }

    pub async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<StripeSubscription, AppError> {
        self.send(self.http.get(self.url(&format!("subscriptions/{}", subscription_id))))
            .await
    }

    /// Preview the invoice a price change would produce right now
    pub async fn preview_price_change(
        &self,
        customer_id: &str,
        subscription: &StripeSubscription,
        new_price_id: &str,
        proration_date: i64,
    ) -> Result<ProrationPreview, AppError> {
        let item = subscription.primary_item()?;
        let proration_date_param = proration_date.to_string();

        let invoice: UpcomingInvoice = self
            .send(self.http.get(self.url("invoices/upcoming")).query(&[
                ("customer", customer_id),
                ("subscription", subscription.id.as_str()),
                ("subscription_items[0][id]", item.id.as_str()),
                ("subscription_items[0][price]", new_price_id),
                ("subscription_proration_behavior", "always_invoice"),
                ("subscription_proration_date", proration_date_param.as_str()),
            ]))
            .await?;

        Ok(ProrationPreview {
            amount_due: invoice.amount_due,
            currency: invoice.currency,
            proration_date,
        })
    }

    /// Switch the subscription's price and invoice the proration immediately
    pub async fn change_subscription_price(
        &self,
        subscription: &StripeSubscription,
        new_price_id: &str,
        proration_date: Option<i64>,
    ) -> Result<StripeSubscription, AppError> {
        let item = subscription.primary_item()?;
        let mut form: Vec<(&str, String)> = vec![
            ("items[0][id]", item.id.clone()),
            ("items[0][price]", new_price_id.to_string()),
            ("proration_behavior", "always_invoice".to_string()),
            ("cancel_at_period_end", "false".to_string()),
        ];
        if let Some(date) = proration_date {
            form.push(("proration_date", date.to_string()));
        }

        self.send(
            self.http
                .post(self.url(&format!("subscriptions/{}", subscription.id)))
                .form(&form),
        )
        .await
    }

    pub async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
    ) -> Result<StripeSubscription, AppError> {
        self.send(
            self.http
                .post(self.url(&format!("subscriptions/{}", subscription_id)))
                .form(&[("cancel_at_period_end", "true")]),
        )
        .await
    }
}
