/// Data layer
///
/// Repository-style query functions per entity over a Postgres pool.

pub mod sessions;
pub mod users;

pub use sessions::Session;
pub use users::{NewUser, SubscriptionUpdate, User};
