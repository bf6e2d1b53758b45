use actix_web::{web, HttpResponse};
use sqlx::PgPool;

/// GET /health_check
///
/// 200 when the database answers, 503 otherwise.
pub async fn health_check(pool: web::Data<PgPool>) -> HttpResponse {
    match sqlx::query("SELECT 1").execute(pool.get_ref()).await {
        Ok(_) => HttpResponse::Ok().body("OK"),
        Err(e) => {
            tracing::error!(error = %e, "Health check database ping failed");
            HttpResponse::ServiceUnavailable().body("database unavailable")
        }
    }
}
