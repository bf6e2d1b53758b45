/// Session repository
///
/// One row per outstanding refresh token. Rows are keyed by the SHA-256 of the
/// token; the plaintext token only ever exists on the client.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

pub(crate) fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub async fn insert_session<'e, E>(
    executor: E,
    user_id: Uuid,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<Uuid, AppError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(hash_token(token))
    .bind(expires_at)
    .bind(Utc::now())
    .execute(executor)
    .await?;

    Ok(id)
}

pub async fn find_by_token(pool: &PgPool, token: &str) -> Result<Option<Session>, AppError> {
    let session = sqlx::query_as::<_, Session>(
        r#"
        SELECT id, user_id, token_hash, expires_at, created_at
        FROM sessions
        WHERE token_hash = $1
        "#,
    )
    .bind(hash_token(token))
    .fetch_optional(pool)
    .await?;

    Ok(session)
}

pub async fn delete_by_id<'e, E>(executor: E, session_id: Uuid) -> Result<u64, AppError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(session_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

pub async fn delete_by_token(pool: &PgPool, token: &str) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
        .bind(hash_token(token))
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

pub async fn delete_for_user(pool: &PgPool, user_id: Uuid) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;

    tracing::info!(user_id = %user_id, revoked = result.rows_affected(), "All sessions revoked for user");
    Ok(result.rows_affected())
}

pub async fn delete_expired_for_user(pool: &PgPool, user_id: Uuid) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1 AND expires_at < $2")
        .bind(user_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
