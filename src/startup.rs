use actix_files as fs;
use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use sqlx::PgPool;
use std::net::TcpListener;
use std::path::Path;

use crate::billing::BillingState;
use crate::configuration::Settings;
use crate::error::{AppError, ConfigError, ValidationError};
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::plans::PlanCatalog;
use crate::routes::{
    cancel_subscription, change_plan, create_checkout, create_portal, get_current_user,
    get_subscription, health_check, login, logout, preview_plan_change, refresh, register,
    revoke_all_sessions, stripe_webhook,
};
use crate::security::{RateLimitConfig, RateLimiterManager, SecurityHeaders};

/// Access log line; `%U` is the path only, so query strings never reach the log
const ACCESS_LOG_FORMAT: &str = r#"%a "%m %U" %s %b %T"#;

pub fn run(
    listener: TcpListener,
    connection: PgPool,
    settings: Settings,
) -> Result<Server, std::io::Error> {
    let catalog = settings
        .stripe
        .as_ref()
        .map(|stripe| PlanCatalog::from_settings(&stripe.plans))
        .transpose()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?
        .unwrap_or_default();

    if settings.stripe.is_none() {
        tracing::warn!("Stripe is not configured; billing endpoints will return 503");
    }

    let connection = web::Data::new(connection);
    let jwt_config = settings.jwt.clone();
    let jwt_config_data = web::Data::new(settings.jwt.clone());
    let catalog = web::Data::new(catalog);
    let billing = web::Data::new(BillingState::new(
        settings.stripe.clone(),
        settings.application.base_url.clone(),
    ));
    let limiter = web::Data::new(RateLimiterManager::new(RateLimitConfig::default()));
    let max_body = limiter.config().max_content_length;
    let static_dir = settings
        .application
        .static_dir
        .clone()
        .filter(|dir| Path::new(dir).is_dir());

    let server = HttpServer::new(move || {
        let json_config = web::JsonConfig::default()
            .limit(max_body)
            .error_handler(|err, _req| {
                tracing::warn!(error = %err, "Rejected request body");
                AppError::from(ValidationError::InvalidFormat("request body".to_string())).into()
            });

        let app = App::new()
            .wrap(SecurityHeaders::middleware())
            .wrap(Logger::new(ACCESS_LOG_FORMAT))
            .wrap(LoggerMiddleware)
            .app_data(json_config)
            .app_data(connection.clone())
            .app_data(jwt_config_data.clone())
            .app_data(catalog.clone())
            .app_data(billing.clone())
            .app_data(limiter.clone())
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/api/mobile/auth")
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    .route("/logout", web::post().to(logout)),
            )
            .route("/api/webhooks/stripe", web::post().to(stripe_webhook))
            .service(
                web::scope("/api/account")
                    .wrap(JwtMiddleware::new(jwt_config.clone()))
                    .route("/me", web::get().to(get_current_user))
                    .route("/sessions", web::delete().to(revoke_all_sessions))
                    .service(
                        web::scope("/billing")
                            .route("/subscription", web::get().to(get_subscription))
                            .route("/checkout", web::post().to(create_checkout))
                            .route("/portal", web::post().to(create_portal))
                            .route("/preview", web::post().to(preview_plan_change))
                            .route("/change-plan", web::post().to(change_plan))
                            .route("/cancel", web::post().to(cancel_subscription)),
                    ),
            );

        // Marketing site build output; registered last so API routes win
        match &static_dir {
            Some(dir) => app.service(fs::Files::new("/", dir).index_file("index.html")),
            None => app,
        }
    })
    .listen(listener)?
    .run();

    Ok(server)
}

/// Startup checks on settings that deserialize fine but cannot work
pub fn validate_settings(settings: &Settings) -> Result<(), AppError> {
    if settings.jwt.secret.len() < 32 {
        return Err(ConfigError::InvalidValue(
            "jwt.secret must be at least 32 characters".to_string(),
        )
        .into());
    }
    if settings.jwt.access_token_expiry <= 0 || settings.jwt.refresh_token_expiry <= 0 {
        return Err(ConfigError::InvalidValue("token expiries must be positive".to_string()).into());
    }
    if settings.jwt.refresh_token_expiry <= settings.jwt.access_token_expiry {
        return Err(ConfigError::InvalidValue(
            "refresh_token_expiry must exceed access_token_expiry".to_string(),
        )
        .into());
    }
    if settings.application.base_url.trim().is_empty() {
        return Err(ConfigError::MissingRequired("application.base_url".to_string()).into());
    }
    if let Some(stripe) = &settings.stripe {
        PlanCatalog::from_settings(&stripe.plans)?;
    }

    Ok(())
}
