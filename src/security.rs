/// Request protection helpers
/// Features:
/// - Per-IP rate limiting for credential endpoints (brute-force protection)
/// - Request body size limit
/// - Security headers for every response

use actix_web::middleware::DefaultHeaders;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::error::{AppError, AuthError};

/// Configuration for rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Max requests per minute per IP
    pub requests_per_minute: u32,
    /// Max JSON body size in bytes
    pub max_content_length: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 10,
            max_content_length: 16 * 1024,
        }
    }
}

/// Token bucket refilled continuously at `requests_per_minute / 60` per second
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    capacity: u32,
    refill_rate: f64,
}

impl TokenBucket {
    fn new(capacity: u32, requests_per_minute: u32) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: Instant::now(),
            capacity,
            refill_rate: requests_per_minute as f64 / 60.0,
        }
    }

    fn refill(&mut self) {
        let elapsed_secs = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed_secs * self.refill_rate).min(self.capacity as f64);
        self.last_refill = Instant::now();
    }

    /// A full bucket behaves exactly like a new one and can be dropped
    fn is_full(&mut self) -> bool {
        self.refill();
        self.tokens >= self.capacity as f64
    }

    fn try_take_token(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Tracks one bucket per client IP
pub struct RateLimiterManager {
    config: RateLimitConfig,
    limiters: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiterManager {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Number of clients with a partly used bucket
    pub fn tracked_clients(&self) -> usize {
        self.limiters.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Check if a request from `ip` is allowed
    ///
    /// `ip` must come from the socket peer, never from a client-supplied header.
    pub fn check_rate_limit(&self, ip: &str) -> Result<(), RateLimitExceeded> {
        // A poisoned lock only means another request panicked mid-update
        let mut limiters = self.limiters.lock().unwrap_or_else(|e| e.into_inner());
        limiters.retain(|_, bucket| !bucket.is_full());

        let limiter = limiters.entry(ip.to_string()).or_insert_with(|| {
            TokenBucket::new(self.config.requests_per_minute, self.config.requests_per_minute)
        });

        if limiter.try_take_token() {
            Ok(())
        } else {
            tracing::warn!(client_ip = ip, "Rate limit exceeded");
            Err(RateLimitExceeded {
                requests_per_minute: self.config.requests_per_minute,
            })
        }
    }
}

#[derive(Debug)]
pub struct RateLimitExceeded {
    pub requests_per_minute: u32,
}

impl std::fmt::Display for RateLimitExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Rate limit exceeded: max {} requests per minute",
            self.requests_per_minute
        )
    }
}

impl actix_web::ResponseError for RateLimitExceeded {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::TOO_MANY_REQUESTS
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        actix_web::HttpResponse::TooManyRequests().json(serde_json::json!({
            "message": self.to_string(),
            "code": "RATE_LIMITED",
            "status": 429
        }))
    }
}

/// Security headers for HTTP responses
pub struct SecurityHeaders;

impl SecurityHeaders {
    pub fn get_headers() -> Vec<(&'static str, &'static str)> {
        vec![
            ("X-Content-Type-Options", "nosniff"),
            ("X-Frame-Options", "DENY"),
            ("Referrer-Policy", "strict-origin-when-cross-origin"),
            ("Strict-Transport-Security", "max-age=31536000; includeSubDomains"),
            (
                "Content-Security-Policy",
                "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'",
            ),
        ]
    }

    /// actix middleware adding every header above
    pub fn middleware() -> DefaultHeaders {
        Self::get_headers()
            .into_iter()
            .fold(DefaultHeaders::new(), |headers, header| headers.add(header))
    }
}

/// Pull the bearer token out of an `Authorization` header value
pub fn bearer_token(header: Option<&str>) -> Result<&str, AppError> {
    header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AppError::Auth(AuthError::MissingToken))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_allows_initial_requests() {
        let manager = RateLimiterManager::new(RateLimitConfig::default());
        for _ in 0..10 {
            assert!(manager.check_rate_limit("127.0.0.1").is_ok());
        }
    }

    #[test]
    fn test_rate_limiter_blocks_burst() {
        let manager = RateLimiterManager::new(RateLimitConfig {
            requests_per_minute: 2,
            max_content_length: 1024,
        });

        assert!(manager.check_rate_limit("10.0.0.1").is_ok());
        assert!(manager.check_rate_limit("10.0.0.1").is_ok());
        assert!(manager.check_rate_limit("10.0.0.1").is_err());
        // Other clients are unaffected
        assert!(manager.check_rate_limit("10.0.0.2").is_ok());
    }

    #[test]
    fn test_refilled_buckets_are_evicted() {
        // 1000 tokens per second, so one spent token is back within a few ms
        let manager = RateLimiterManager::new(RateLimitConfig {
            requests_per_minute: 60_000,
            max_content_length: 1024,
        });

        assert!(manager.check_rate_limit("10.0.0.1").is_ok());
        assert_eq!(manager.tracked_clients(), 1);

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(manager.check_rate_limit("10.0.0.2").is_ok());
        assert_eq!(manager.tracked_clients(), 1);
    }

    #[test]
    fn test_exhausted_buckets_are_kept() {
        let manager = RateLimiterManager::new(RateLimitConfig {
            requests_per_minute: 1,
            max_content_length: 1024,
        });

        assert!(manager.check_rate_limit("10.0.0.1").is_ok());
        assert!(manager.check_rate_limit("10.0.0.2").is_ok());
        assert_eq!(manager.tracked_clients(), 2);
        assert!(manager.check_rate_limit("10.0.0.1").is_err());
    }

    #[test]
    fn test_security_headers() {
        let names: Vec<_> = SecurityHeaders::get_headers().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&"X-Content-Type-Options"));
        assert!(names.contains(&"Content-Security-Policy"));
        assert!(names.contains(&"Strict-Transport-Security"));
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(Some("Bearer abc.def")).unwrap(), "abc.def");
        assert!(bearer_token(Some("Basic abc")).is_err());
        assert!(bearer_token(Some("Bearer ")).is_err());
        assert!(bearer_token(None).is_err());
    }
}
