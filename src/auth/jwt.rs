/// JWT Token Generation and Validation
///
/// Access and refresh tokens are both HS256 JWTs signed with the configured
/// secret. They differ in lifetime and in the `token_type` claim.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::{Claims, TokenType};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};
use crate::plans::AccessTier;

/// Generate a new access token for a user
pub fn generate_access_token(
    user_id: &Uuid,
    email: &str,
    tier: AccessTier,
    config: &JwtSettings,
) -> Result<String, AppError> {
    let claims = Claims::new(
        *user_id,
        email.to_string(),
        tier,
        TokenType::Access,
        config.access_token_expiry,
        config.issuer.clone(),
    );

    sign(&claims, config)
}

/// Generate a new refresh token for a user
///
/// Returns the token and the instant it expires, which is also the expiry of
/// the session row that backs it.
pub fn generate_refresh_token(
    user_id: &Uuid,
    email: &str,
    tier: AccessTier,
    config: &JwtSettings,
) -> Result<(String, DateTime<Utc>), AppError> {
    let claims = Claims::new(
        *user_id,
        email.to_string(),
        tier,
        TokenType::Refresh,
        config.refresh_token_expiry,
        config.issuer.clone(),
    );

    let expires_at = Utc
        .timestamp_opt(claims.exp, 0)
        .single()
        .ok_or_else(|| AppError::Internal("Refresh token expiry out of range".to_string()))?;

    Ok((sign(&claims, config)?, expires_at))
}

/// Validate an access token and extract its claims
pub fn validate_access_token(token: &str, config: &JwtSettings) -> Result<Claims, AppError> {
    validate_token(token, TokenType::Access, config)
}

/// Validate a refresh token's signature, expiry and type
///
/// This does not consult the session table; see `rotate_refresh_token`.
pub fn validate_refresh_token(token: &str, config: &JwtSettings) -> Result<Claims, AppError> {
    validate_token(token, TokenType::Refresh, config)
}

fn sign(claims: &Claims, config: &JwtSettings) -> Result<String, AppError> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
}

fn validate_token(
    token: &str,
    expected: TokenType,
    config: &JwtSettings,
) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&config.issuer]);
    validation.leeway = 0;

    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AppError::Auth(AuthError::TokenExpired),
        _ => {
            tracing::warn!("JWT validation error: {}", e);
            AppError::Auth(AuthError::TokenInvalid)
        }
    })?;

    // jsonwebtoken still accepts a token in its `exp` second
    if claims.is_expired() {
        return Err(AppError::Auth(AuthError::TokenExpired));
    }

    if claims.token_type != expected {
        tracing::warn!(
            expected = ?expected,
            actual = ?claims.token_type,
            "JWT presented with the wrong token type"
        );
        return Err(AppError::Auth(AuthError::TokenInvalid));
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_config() -> JwtSettings {
        JwtSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            access_token_expiry: 3600,
            refresh_token_expiry: 604800,
            issuer: "test".to_string(),
        }
    }

    fn assert_auth_error(result: Result<Claims, AppError>, expected: AuthError) {
        match result {
            Err(AppError::Auth(actual)) => assert_eq!(actual, expected),
            other => panic!("expected {:?}, got {:?}", expected, other),
        }
    }

    #[test]
    fn test_generate_and_validate_access_token() {
        let config = get_test_config();
        let user_id = Uuid::new_v4();

        let token = generate_access_token(&user_id, "test@example.com", AccessTier::Pro, &config)
            .expect("Failed to generate token");
        let claims = validate_access_token(&token, &config).expect("Failed to validate token");

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.email, "test@example.com");
        assert_eq!(claims.tier, AccessTier::Pro);
        assert_eq!(claims.token_type, TokenType::Access);
    }

    #[test]
    fn test_refresh_token_expiry_matches_claims() {
        let config = get_test_config();
        let user_id = Uuid::new_v4();

        let (token, expires_at) =
            generate_refresh_token(&user_id, "test@example.com", AccessTier::Free, &config)
                .expect("Failed to generate token");
        let claims = validate_refresh_token(&token, &config).expect("Failed to validate token");

        assert_eq!(claims.exp, expires_at.timestamp());
        assert_eq!(claims.token_type, TokenType::Refresh);
    }

    #[test]
    fn test_token_types_are_not_interchangeable() {
        let config = get_test_config();
        let user_id = Uuid::new_v4();

        let access = generate_access_token(&user_id, "a@example.com", AccessTier::Free, &config).unwrap();
        let (refresh, _) =
            generate_refresh_token(&user_id, "a@example.com", AccessTier::Free, &config).unwrap();

        assert_auth_error(validate_refresh_token(&access, &config), AuthError::TokenInvalid);
        assert_auth_error(validate_access_token(&refresh, &config), AuthError::TokenInvalid);
    }

    #[test]
    fn test_expired_token() {
        let mut config = get_test_config();
        config.access_token_expiry = -120;
        let token =
            generate_access_token(&Uuid::new_v4(), "test@example.com", AccessTier::Free, &config)
                .unwrap();

        assert_auth_error(validate_access_token(&token, &config), AuthError::TokenExpired);
    }

    #[test]
    fn test_token_expires_at_its_exp_second() {
        let mut config = get_test_config();
        config.access_token_expiry = 0;
        let token =
            generate_access_token(&Uuid::new_v4(), "test@example.com", AccessTier::Free, &config)
                .unwrap();

        assert_auth_error(validate_access_token(&token, &config), AuthError::TokenExpired);
    }

    #[test]
    fn test_invalid_token() {
        let config = get_test_config();
        assert_auth_error(
            validate_access_token("invalid.token.here", &config),
            AuthError::TokenInvalid,
        );
    }

    #[test]
    fn test_tampered_token() {
        let config = get_test_config();
        let token =
            generate_access_token(&Uuid::new_v4(), "test@example.com", AccessTier::Free, &config)
                .unwrap();

        let tampered = format!("{}X", token);
        assert!(validate_access_token(&tampered, &config).is_err());
    }

    #[test]
    fn test_wrong_secret() {
        let config = get_test_config();
        let token =
            generate_access_token(&Uuid::new_v4(), "test@example.com", AccessTier::Free, &config)
                .unwrap();

        let mut other = get_test_config();
        other.secret = "another-secret-key-that-is-also-long-enough".to_string();
        assert_auth_error(validate_access_token(&token, &other), AuthError::TokenInvalid);
    }

    #[test]
    fn test_wrong_issuer() {
        let mut config = get_test_config();
        let token =
            generate_access_token(&Uuid::new_v4(), "test@example.com", AccessTier::Free, &config)
                .unwrap();

        config.issuer = "wrong-issuer".to_string();
        assert!(validate_access_token(&token, &config).is_err());
    }
}
