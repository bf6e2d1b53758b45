/// User repository
///
/// Accounts plus the Stripe identifiers persisted from billing events.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::plans::{effective_tier, AccessTier, PlanCatalog};

const USER_COLUMNS: &str = "id, email, name, password_hash, is_active, stripe_customer_id, \
     stripe_subscription_id, stripe_price_id, stripe_current_period_end, created_at, updated_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    /// `None` for accounts that cannot sign in with a password
    pub password_hash: Option<String>,
    pub is_active: bool,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_price_id: Option<String>,
    pub stripe_current_period_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn tier(&self, catalog: &PlanCatalog) -> AccessTier {
        effective_tier(
            catalog,
            self.stripe_price_id.as_deref(),
            self.stripe_current_period_end,
            Utc::now(),
        )
    }
}

pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: Option<String>,
}

/// Subscription state copied from Stripe
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    pub customer_id: String,
    pub subscription_id: String,
    pub price_id: String,
    pub current_period_end: DateTime<Utc>,
}

pub async fn insert_user(pool: &PgPool, new_user: NewUser) -> Result<User, AppError> {
    let now = Utc::now();
    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO users (id, email, name, password_hash, is_active, created_at, updated_at)
        VALUES ($1, $2, $3, $4, true, $5, $5)
        RETURNING {}
        "#,
        USER_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(&new_user.email)
    .bind(&new_user.name)
    .bind(&new_user.password_hash)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(user)
}

pub async fn find_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE id = $1",
        USER_COLUMNS
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE email = $1",
        USER_COLUMNS
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

pub async fn find_by_stripe_subscription(
    pool: &PgPool,
    subscription_id: &str,
) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE stripe_subscription_id = $1",
        USER_COLUMNS
    ))
    .bind(subscription_id)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

pub async fn set_stripe_customer(
    pool: &PgPool,
    user_id: Uuid,
    customer_id: &str,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE users
        SET stripe_customer_id = $1, updated_at = $2
        WHERE id = $3
        "#,
    )
    .bind(customer_id)
    .bind(Utc::now())
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist the subscription a user just bought
pub async fn update_subscription(
    pool: &PgPool,
    user_id: Uuid,
    update: &SubscriptionUpdate,
) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET stripe_customer_id = $1,
            stripe_subscription_id = $2,
            stripe_price_id = $3,
            stripe_current_period_end = $4,
            updated_at = $5
        WHERE id = $6
        "#,
    )
    .bind(&update.customer_id)
    .bind(&update.subscription_id)
    .bind(&update.price_id)
    .bind(update.current_period_end)
    .bind(Utc::now())
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Refresh price and period end for renewals and plan changes
pub async fn update_subscription_by_stripe_id(
    pool: &PgPool,
    subscription_id: &str,
    price_id: &str,
    current_period_end: DateTime<Utc>,
) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET stripe_price_id = $1, stripe_current_period_end = $2, updated_at = $3
        WHERE stripe_subscription_id = $4
        "#,
    )
    .bind(price_id)
    .bind(current_period_end)
    .bind(Utc::now())
    .bind(subscription_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Drop a deleted subscription; the customer id is kept for the billing portal
pub async fn clear_subscription(pool: &PgPool, subscription_id: &str) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET stripe_subscription_id = NULL,
            stripe_price_id = NULL,
            stripe_current_period_end = NULL,
            updated_at = $1
        WHERE stripe_subscription_id = $2
        "#,
    )
    .bind(Utc::now())
    .bind(subscription_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::PlanSettings;
    use chrono::Duration;

    fn user(price_id: Option<&str>, period_end: Option<DateTime<Utc>>) -> User {
        User {
            id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            name: "Test".to_string(),
            password_hash: None,
            is_active: true,
            stripe_customer_id: Some("cus_123".to_string()),
            stripe_subscription_id: price_id.map(|_| "sub_123".to_string()),
            stripe_price_id: price_id.map(str::to_string),
            stripe_current_period_end: period_end,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_user_tier_follows_subscription() {
        let catalog = PlanCatalog::from_settings(&[PlanSettings {
            tier: "pro".into(),
            price_id: "price_pro".into(),
        }])
        .unwrap();

        let subscribed = user(Some("price_pro"), Some(Utc::now() + Duration::days(20)));
        let lapsed = user(Some("price_pro"), Some(Utc::now() - Duration::days(20)));
        let free = user(None, None);

        assert_eq!(subscribed.tier(&catalog), AccessTier::Pro);
        assert_eq!(lapsed.tier(&catalog), AccessTier::Free);
        assert_eq!(free.tier(&catalog), AccessTier::Free);
    }
}
