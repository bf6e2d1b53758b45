mod account;
mod auth;
mod billing;
mod health_check;
mod webhooks;

pub use account::{get_current_user, revoke_all_sessions};
pub use auth::{login, logout, refresh, register};
pub use billing::{
    cancel_subscription, change_plan, create_checkout, create_portal, get_subscription,
    preview_plan_change,
};
pub use health_check::health_check;
pub use webhooks::stripe_webhook;
