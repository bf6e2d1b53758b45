use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use std::net::TcpListener;
use subscription_starter::configuration::{get_configuration, DatabaseSettings};
use subscription_starter::startup::run;

pub struct TestApp {
    pub address: String,
    pub db_pool: PgPool,
    pub webhook_secret: String,
    pub client: reqwest::Client,
}

pub async fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let mut configuration = get_configuration().expect("Failed to read configuration.");
    configuration.database.database_name = uuid::Uuid::new_v4().to_string();
    configuration.application.static_dir = None;
    let connection_pool = configure_database(&configuration.database).await;

    let webhook_secret = configuration
        .stripe
        .as_ref()
        .map(|s| s.webhook_secret.clone())
        .expect("Stripe settings missing from configuration.yaml");

    let server = run(listener, connection_pool.clone(), configuration)
        .expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        db_pool: connection_pool,
        webhook_secret,
        client: reqwest::Client::new(),
    }
}

pub async fn configure_database(config: &DatabaseSettings) -> PgPool {
    let mut connection = PgConnection::connect(&config.connection_string_without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"CREATE DATABASE "{}";"#, config.database_name))
        .await
        .expect("Failed to create database.");

    let connection_pool = PgPool::connect(&config.connection_string())
        .await
        .expect("Failed to connect to Postgres.");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate the database.");
    connection_pool
}

impl TestApp {
    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(&format!("{}{}", &self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get_authed(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(&format!("{}{}", &self.address, path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post_authed(&self, path: &str, token: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(&format!("{}{}", &self.address, path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Registers a user and returns the token pair body
    pub async fn register(&self, email: &str) -> Value {
        let response = self
            .post_json(
                "/api/mobile/auth/register",
                &json!({
                    "name": "Jane Doe",
                    "email": email,
                    "password": "SecurePass123"
                }),
            )
            .await;
        assert_eq!(201, response.status().as_u16());
        response.json().await.expect("Failed to parse response")
    }

    /// Posts a webhook body signed the way Stripe signs it
    pub async fn post_webhook(&self, payload: &Value) -> reqwest::Response {
        let body = payload.to_string();
        let timestamp = chrono::Utc::now().timestamp();

        let mut mac = Hmac::<Sha256>::new_from_slice(self.webhook_secret.as_bytes()).unwrap();
        mac.update(format!("{}.", timestamp).as_bytes());
        mac.update(body.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        self.client
            .post(&format!("{}/api/webhooks/stripe", &self.address))
            .header("Content-Type", "application/json")
            .header("Stripe-Signature", format!("t={},v1={}", timestamp, signature))
            .body(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }
}
