pub mod auth;
pub mod billing;
pub mod configuration;
pub mod db;
pub mod error;
pub mod logger;
pub mod middleware;
pub mod plans;
pub mod routes;
pub mod security;
pub mod startup;
pub mod telemetry;
pub mod validators;
