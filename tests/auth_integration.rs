//! Integration tests for registration, login and refresh-token rotation

mod common;

use common::spawn_app;
use serde_json::{json, Value};
use sqlx::Row;

// --- Registration Tests ---

#[tokio::test]
async fn register_returns_201_and_a_token_pair() {
    let app = spawn_app().await;

    let response = app
        .post_json(
            "/api/mobile/auth/register",
            &json!({
                "name": "John Doe",
                "email": "John@Example.com",
                "password": "SecurePass123"
            }),
        )
        .await;

    assert_eq!(201, response.status().as_u16());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["access_token"].is_string());
    assert!(body["refresh_token"].is_string());
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["tier"], "free");

    // Stored lower-cased, with exactly one session for the issued refresh token
    let user = sqlx::query("SELECT id, email, name FROM users")
        .fetch_one(&app.db_pool)
        .await
        .expect("Failed to fetch created user");
    assert_eq!(user.get::<String, _>("email"), "john@example.com");
    assert_eq!(user.get::<String, _>("name"), "John Doe");

    let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE user_id = $1")
        .bind(user.get::<uuid::Uuid, _>("id"))
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(sessions, 1);
}

#[tokio::test]
async fn register_returns_400_for_invalid_input() {
    let app = spawn_app().await;

    let test_cases = vec![
        (json!({"name": "Test", "email": "notanemail", "password": "SecurePass123"}), "invalid email"),
        (json!({"name": "Test", "email": "user@", "password": "SecurePass123"}), "truncated email"),
        (json!({"name": "Test", "email": "test@example.com", "password": "short"}), "short password"),
        (json!({"name": "Test", "email": "test@example.com", "password": "nouppercase123"}), "no uppercase"),
        (json!({"name": "   ", "email": "test@example.com", "password": "SecurePass123"}), "blank name"),
        (json!({"email": "test@example.com", "password": "SecurePass123"}), "missing name"),
        (json!({}), "missing all fields"),
    ];

    for (body, reason) in test_cases {
        let response = app.post_json("/api/mobile/auth/register", &body).await;
        assert_eq!(400, response.status().as_u16(), "Should reject: {}", reason);
    }
}

#[tokio::test]
async fn register_returns_409_for_duplicate_email() {
    let app = spawn_app().await;
    app.register("john@example.com").await;

    let response = app
        .post_json(
            "/api/mobile/auth/register",
            &json!({
                "name": "Someone Else",
                "email": "JOHN@example.com",
                "password": "SecurePass123"
            }),
        )
        .await;

    assert_eq!(409, response.status().as_u16());
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "DUPLICATE_ENTRY");
    assert_eq!(error["message"], "Duplicate entry: Email already registered");
}

// --- Login Tests ---

#[tokio::test]
async fn login_returns_200_for_valid_credentials() {
    let app = spawn_app().await;
    app.register("jane@example.com").await;

    let response = app
        .post_json(
            "/api/mobile/auth/login",
            &json!({"email": "jane@example.com", "password": "SecurePass123"}),
        )
        .await;

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert!(body["access_token"].is_string());
    assert_eq!(body["expires_in"], 900);
}

#[tokio::test]
async fn login_returns_401_without_revealing_which_part_was_wrong() {
    let app = spawn_app().await;
    app.register("jane@example.com").await;

    let test_cases = vec![
        json!({"email": "jane@example.com", "password": "WrongPass123"}),
        json!({"email": "nobody@example.com", "password": "SecurePass123"}),
        json!({"email": "not-an-email", "password": "SecurePass123"}),
    ];

    for body in test_cases {
        let response = app.post_json("/api/mobile/auth/login", &body).await;
        assert_eq!(401, response.status().as_u16());

        let error: Value = response.json().await.unwrap();
        assert_eq!(error["code"], "INVALID_CREDENTIALS");
    }
}

#[tokio::test]
async fn login_returns_403_for_inactive_account() {
    let app = spawn_app().await;
    app.register("jane@example.com").await;

    sqlx::query("UPDATE users SET is_active = false WHERE email = 'jane@example.com'")
        .execute(&app.db_pool)
        .await
        .unwrap();

    let response = app
        .post_json(
            "/api/mobile/auth/login",
            &json!({"email": "jane@example.com", "password": "SecurePass123"}),
        )
        .await;

    assert_eq!(403, response.status().as_u16());
}

#[tokio::test]
async fn login_is_rate_limited_per_client() {
    let app = spawn_app().await;
    let body = json!({"email": "nobody@example.com", "password": "SecurePass123"});

    for _ in 0..10 {
        let response = app.post_json("/api/mobile/auth/login", &body).await;
        assert_eq!(401, response.status().as_u16());
    }

    let response = app.post_json("/api/mobile/auth/login", &body).await;
    assert_eq!(429, response.status().as_u16());
}

#[tokio::test]
async fn login_rate_limit_ignores_forwarded_headers() {
    let app = spawn_app().await;
    let body = json!({"email": "nobody@example.com", "password": "SecurePass123"});

    for n in 0..11 {
        let response = app
            .client
            .post(&format!("{}/api/mobile/auth/login", &app.address))
            .header("X-Forwarded-For", format!("10.0.0.{}", n))
            .header("Forwarded", format!("for=10.0.1.{}", n))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request.");

        let expected = if n < 10 { 401 } else { 429 };
        assert_eq!(expected, response.status().as_u16(), "request {}", n);
    }
}

// --- Refresh Token Rotation ---

#[tokio::test]
async fn refresh_rotates_the_refresh_token() {
    let app = spawn_app().await;
    let tokens = app.register("jane@example.com").await;
    let original = tokens["refresh_token"].as_str().unwrap();

    let response = app
        .post_json("/api/mobile/auth/refresh", &json!({"refresh_token": original}))
        .await;
    assert_eq!(200, response.status().as_u16());

    let rotated: Value = response.json().await.unwrap();
    let replacement = rotated["refresh_token"].as_str().unwrap();
    assert_ne!(original, replacement);
    assert!(rotated["access_token"].is_string());

    // The presented token is gone, the replacement works exactly once more
    let reuse = app
        .post_json("/api/mobile/auth/refresh", &json!({"refresh_token": original}))
        .await;
    assert_eq!(401, reuse.status().as_u16());

    let next = app
        .post_json("/api/mobile/auth/refresh", &json!({"refresh_token": replacement}))
        .await;
    assert_eq!(200, next.status().as_u16());

    let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(sessions, 1);
}

#[tokio::test]
async fn refresh_returns_401_for_garbage_and_access_tokens() {
    let app = spawn_app().await;
    let tokens = app.register("jane@example.com").await;

    for presented in ["not-a-jwt", tokens["access_token"].as_str().unwrap()] {
        let response = app
            .post_json("/api/mobile/auth/refresh", &json!({"refresh_token": presented}))
            .await;
        assert_eq!(401, response.status().as_u16());
    }
}

#[tokio::test]
async fn refresh_returns_403_once_the_account_is_deactivated() {
    let app = spawn_app().await;
    let tokens = app.register("jane@example.com").await;

    sqlx::query("UPDATE users SET is_active = false")
        .execute(&app.db_pool)
        .await
        .unwrap();

    let response = app
        .post_json(
            "/api/mobile/auth/refresh",
            &json!({"refresh_token": tokens["refresh_token"]}),
        )
        .await;
    assert_eq!(403, response.status().as_u16());
}

#[tokio::test]
async fn refresh_returns_401_when_the_session_belongs_to_someone_else() {
    let app = spawn_app().await;
    let jane = app.register("jane@example.com").await;
    app.register("john@example.com").await;

    let john_id: uuid::Uuid =
        sqlx::query_scalar("SELECT id FROM users WHERE email = 'john@example.com'")
            .fetch_one(&app.db_pool)
            .await
            .unwrap();
    sqlx::query(
        "UPDATE sessions SET user_id = $1 \
         WHERE user_id = (SELECT id FROM users WHERE email = 'jane@example.com')",
    )
    .bind(john_id)
    .execute(&app.db_pool)
    .await
    .unwrap();

    let response = app
        .post_json(
            "/api/mobile/auth/refresh",
            &json!({"refresh_token": jane["refresh_token"]}),
        )
        .await;
    assert_eq!(401, response.status().as_u16());

    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "TOKEN_INVALID");

    // The mismatched session is left alone
    let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE user_id = $1")
        .bind(john_id)
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(sessions, 2);
}

#[tokio::test]
async fn concurrent_refreshes_of_one_token_succeed_once() {
    let app = spawn_app().await;
    let tokens = app.register("jane@example.com").await;
    let body = json!({"refresh_token": tokens["refresh_token"]});

    let (first, second) = tokio::join!(
        app.post_json("/api/mobile/auth/refresh", &body),
        app.post_json("/api/mobile/auth/refresh", &body)
    );

    let mut statuses = vec![first.status().as_u16(), second.status().as_u16()];
    statuses.sort();
    assert_eq!(statuses, vec![200, 401]);

    let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(sessions, 1);
}

// --- Logout and Session Revocation ---

#[tokio::test]
async fn logout_revokes_the_refresh_token() {
    let app = spawn_app().await;
    let tokens = app.register("jane@example.com").await;
    let refresh_token = tokens["refresh_token"].as_str().unwrap();

    let response = app
        .post_json("/api/mobile/auth/logout", &json!({"refresh_token": refresh_token}))
        .await;
    assert_eq!(204, response.status().as_u16());

    // Idempotent
    let again = app
        .post_json("/api/mobile/auth/logout", &json!({"refresh_token": refresh_token}))
        .await;
    assert_eq!(204, again.status().as_u16());

    let response = app
        .post_json("/api/mobile/auth/refresh", &json!({"refresh_token": refresh_token}))
        .await;
    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn revoking_all_sessions_signs_out_every_device() {
    let app = spawn_app().await;
    let first = app.register("jane@example.com").await;

    let login = app
        .post_json(
            "/api/mobile/auth/login",
            &json!({"email": "jane@example.com", "password": "SecurePass123"}),
        )
        .await;
    let second: Value = login.json().await.unwrap();

    let response = app
        .client
        .delete(&format!("{}/api/account/sessions", &app.address))
        .bearer_auth(second["access_token"].as_str().unwrap())
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["revoked"], 2);

    for tokens in [&first, &second] {
        let response = app
            .post_json(
                "/api/mobile/auth/refresh",
                &json!({"refresh_token": tokens["refresh_token"]}),
            )
            .await;
        assert_eq!(401, response.status().as_u16());
    }
}

// --- Protected Routes ---

#[tokio::test]
async fn me_returns_the_signed_in_user() {
    let app = spawn_app().await;
    let tokens = app.register("jane@example.com").await;

    let response = app
        .get_authed("/api/account/me", tokens["access_token"].as_str().unwrap())
        .await;
    assert_eq!(200, response.status().as_u16());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["email"], "jane@example.com");
    assert_eq!(body["name"], "Jane Doe");
    assert_eq!(body["tier"], "free");
}

#[tokio::test]
async fn protected_routes_reject_missing_or_wrong_tokens() {
    let app = spawn_app().await;
    let tokens = app.register("jane@example.com").await;

    let response = app
        .client
        .get(&format!("{}/api/account/me", &app.address))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(401, response.status().as_u16());

    // A refresh token is not an access token
    let response = app
        .get_authed("/api/account/me", tokens["refresh_token"].as_str().unwrap())
        .await;
    assert_eq!(401, response.status().as_u16());

    let response = app.get_authed("/api/account/me", "invalid.token.here").await;
    assert_eq!(401, response.status().as_u16());
}
