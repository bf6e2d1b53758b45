/// Refresh Token Sessions
///
/// Refresh tokens are JWTs backed by a `sessions` row so they can be revoked
/// individually. Every refresh rotates the token:
/// - the presented token must verify and still have its session row
/// - the row must belong to the token's subject
/// - the old row is deleted and a new one inserted in one transaction
/// - a new access/refresh pair is issued with the user's current tier

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::jwt::{generate_access_token, generate_refresh_token, validate_refresh_token};
use crate::configuration::JwtSettings;
use crate::db::{sessions, users};
use crate::error::{AppError, AuthError};
use crate::plans::{AccessTier, PlanCatalog};

/// Token pair returned to the mobile client
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub tier: AccessTier,
}

/// Issue an access/refresh pair and record the refresh token's session
pub async fn issue_token_pair(
    pool: &PgPool,
    user_id: Uuid,
    email: &str,
    tier: AccessTier,
    config: &JwtSettings,
) -> Result<TokenPair, AppError> {
    let access_token = generate_access_token(&user_id, email, tier, config)?;
    let (refresh_token, expires_at) = generate_refresh_token(&user_id, email, tier, config)?;

    sessions::insert_session(pool, user_id, &refresh_token, expires_at).await?;

    Ok(TokenPair {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: config.access_token_expiry,
        tier,
    })
}

/// Exchange a refresh token for a new pair, revoking the presented one
///
/// # Errors
/// - `TokenExpired` / `TokenInvalid` when the JWT does not verify
/// - `TokenRevoked` when no session row exists (already used or logged out)
/// - `TokenInvalid` when the session belongs to another user
/// - `AccountInactive` when the user has been deactivated
pub async fn rotate_refresh_token(
    pool: &PgPool,
    presented: &str,
    config: &JwtSettings,
    catalog: &PlanCatalog,
) -> Result<TokenPair, AppError> {
    let claims = validate_refresh_token(presented, config)?;
    let claimed_user = claims.user_id()?;

    let session = match sessions::find_by_token(pool, presented).await? {
        Some(session) => session,
        None => {
            tracing::warn!(user_id = %claimed_user, "Refresh token has no session");
            return Err(AppError::Auth(AuthError::TokenRevoked));
        }
    };

    if session.user_id != claimed_user {
        tracing::warn!(
            user_id = %claimed_user,
            session_owner = %session.user_id,
            "Refresh token subject does not own its session"
        );
        return Err(AppError::Auth(AuthError::TokenInvalid));
    }

    let user = users::find_by_id(pool, claimed_user)
        .await?
        .ok_or(AppError::Auth(AuthError::TokenInvalid))?;
    if !user.is_active {
        return Err(AppError::Auth(AuthError::AccountInactive));
    }

    let tier = user.tier(catalog);
    let access_token = generate_access_token(&user.id, &user.email, tier, config)?;
    let (refresh_token, expires_at) = generate_refresh_token(&user.id, &user.email, tier, config)?;

    let mut tx = pool.begin().await?;
    // Exactly one row: zero means a concurrent refresh consumed it first
    if sessions::delete_by_id(&mut tx, session.id).await? != 1 {
        tx.rollback().await?;
        tracing::warn!(user_id = %user.id, "Refresh token consumed concurrently");
        return Err(AppError::Auth(AuthError::TokenRevoked));
    }
    sessions::insert_session(&mut tx, user.id, &refresh_token, expires_at).await?;
    tx.commit().await?;

    tracing::debug!(user_id = %user.id, tier = %tier, "Refresh token rotated");

    Ok(TokenPair {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: config.access_token_expiry,
        tier,
    })
}

/// Revoke a single refresh token (logout). Unknown tokens are not an error.
pub async fn revoke_refresh_token(pool: &PgPool, token: &str) -> Result<(), AppError> {
    let revoked = sessions::delete_by_token(pool, token).await?;
    tracing::debug!(revoked = revoked, "Refresh token revoked");
    Ok(())
}

/// Revoke every refresh token a user holds
pub async fn revoke_all_user_tokens(pool: &PgPool, user_id: Uuid) -> Result<u64, AppError> {
    sessions::delete_for_user(pool, user_id).await
}
