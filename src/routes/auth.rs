/// Mobile Authentication Routes
///
/// Credential registration and login, refresh-token rotation and logout for
/// the mobile client. Every successful call returns a fresh token pair.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use sqlx::PgPool;

use crate::auth::{
    hash_password, issue_token_pair, revoke_refresh_token, rotate_refresh_token, verify_password,
};
use crate::configuration::JwtSettings;
use crate::db::{sessions, users, NewUser};
use crate::error::{AppError, AuthError, ErrorContext};
use crate::plans::PlanCatalog;
use crate::security::RateLimiterManager;
use crate::validators::{is_valid_email, is_valid_name};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// POST /api/mobile/auth/register
///
/// # Errors
/// - 400: invalid email, name or weak password
/// - 409: email already registered
pub async fn register(
    form: web::Json<RegisterRequest>,
    pool: web::Data<PgPool>,
    jwt_config: web::Data<JwtSettings>,
    catalog: web::Data<PlanCatalog>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_registration");

    let email = is_valid_email(&form.email)?;
    let name = is_valid_name(&form.name)?;
    let password_hash = hash_password(&form.password)?;

    let user = users::insert_user(
        pool.get_ref(),
        NewUser {
            email,
            name,
            password_hash: Some(password_hash),
        },
    )
    .await?;

    let tokens = issue_token_pair(
        pool.get_ref(),
        user.id,
        &user.email,
        user.tier(catalog.get_ref()),
        jwt_config.get_ref(),
    )
    .await?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %user.id,
        "User registered successfully"
    );

    Ok(HttpResponse::Created().json(tokens))
}

/// POST /api/mobile/auth/login
///
/// The same error is returned for an unknown email, a wrong password and a
/// password-less account, so callers cannot enumerate accounts.
///
/// # Errors
/// - 401: invalid credentials
/// - 403: account is inactive
/// - 429: too many attempts from this address
pub async fn login(
    req: HttpRequest,
    form: web::Json<LoginRequest>,
    pool: web::Data<PgPool>,
    jwt_config: web::Data<JwtSettings>,
    catalog: web::Data<PlanCatalog>,
    limiter: web::Data<RateLimiterManager>,
) -> Result<HttpResponse, actix_web::Error> {
    // The socket peer; forwarded headers are client-controlled
    let client_ip = req
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    limiter.check_rate_limit(&client_ip)?;

    Ok(login_with_credentials(&form, pool.get_ref(), jwt_config.get_ref(), catalog.get_ref()).await?)
}

async fn login_with_credentials(
    form: &LoginRequest,
    pool: &PgPool,
    jwt_config: &JwtSettings,
    catalog: &PlanCatalog,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");

    let email = is_valid_email(&form.email).map_err(|_| AuthError::InvalidCredentials)?;
    let user = users::find_by_email(pool, &email)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    let password_hash = user
        .password_hash
        .as_deref()
        .ok_or(AuthError::InvalidCredentials)?;
    if !verify_password(&form.password, password_hash)? {
        return Err(AuthError::InvalidCredentials.into());
    }

    if !user.is_active {
        return Err(AuthError::AccountInactive.into());
    }

    sessions::delete_expired_for_user(pool, user.id).await?;
    let tokens =
        issue_token_pair(pool, user.id, &user.email, user.tier(catalog), jwt_config).await?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %user.id,
        tier = %tokens.tier,
        "User logged in successfully"
    );

    Ok(HttpResponse::Ok().json(tokens))
}

/// POST /api/mobile/auth/refresh
///
/// Rotates the refresh token: the presented token stops working and a new
/// pair is returned.
///
/// # Errors
/// - 401: invalid, expired, revoked or already-used refresh token
/// - 403: account is inactive
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    pool: web::Data<PgPool>,
    jwt_config: web::Data<JwtSettings>,
    catalog: web::Data<PlanCatalog>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");

    let tokens = rotate_refresh_token(
        pool.get_ref(),
        &form.refresh_token,
        jwt_config.get_ref(),
        catalog.get_ref(),
    )
    .await
    .map_err(|e| {
        context.log_error(&e);
        e
    })?;

    tracing::info!(request_id = %context.request_id, "Token refreshed successfully");

    Ok(HttpResponse::Ok().json(tokens))
}

/// POST /api/mobile/auth/logout
///
/// Revokes the presented refresh token. Always 204, even for unknown tokens.
pub async fn logout(
    form: web::Json<RefreshRequest>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    revoke_refresh_token(pool.get_ref(), &form.refresh_token).await?;
    Ok(HttpResponse::NoContent().finish())
}
