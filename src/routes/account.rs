/// Account Routes
///
/// Profile and session management for the signed-in user. Claims are
/// injected by `JwtMiddleware`.

use actix_web::{web, HttpResponse};
use serde::Serialize;
use sqlx::PgPool;

use crate::auth::{revoke_all_user_tokens, Claims};
use crate::db::users;
use crate::error::{AppError, AuthError, DatabaseError};
use crate::plans::{AccessTier, PlanCatalog};

#[derive(Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    /// Derived from the current subscription, not from the token
    pub tier: AccessTier,
    pub created_at: String,
}

/// GET /api/account/me
///
/// # Errors
/// - 401: missing or invalid token (middleware)
/// - 403: account is inactive
/// - 404: user no longer exists
pub async fn get_current_user(
    claims: web::ReqData<Claims>,
    pool: web::Data<PgPool>,
    catalog: web::Data<PlanCatalog>,
) -> Result<HttpResponse, AppError> {
    let user = users::find_by_id(pool.get_ref(), claims.user_id()?)
        .await?
        .ok_or_else(|| DatabaseError::NotFound("User not found".to_string()))?;

    if !user.is_active {
        return Err(AuthError::AccountInactive.into());
    }

    Ok(HttpResponse::Ok().json(UserResponse {
        id: user.id.to_string(),
        tier: user.tier(catalog.get_ref()),
        email: user.email,
        name: user.name,
        created_at: user.created_at.to_rfc3339(),
    }))
}

/// DELETE /api/account/sessions
///
/// Signs the user out on every device by revoking all refresh tokens.
/// Access tokens already issued stay valid until they expire.
pub async fn revoke_all_sessions(
    claims: web::ReqData<Claims>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let revoked = revoke_all_user_tokens(pool.get_ref(), claims.user_id()?).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "revoked": revoked })))
}
