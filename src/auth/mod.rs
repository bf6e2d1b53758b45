/// Authentication module
///
/// Handles JWT token generation/validation, password hashing,
/// and refresh token sessions with rotation.

mod claims;
mod jwt;
mod password;
mod refresh_token;

pub use claims::{Claims, TokenType};
pub use jwt::generate_access_token;
pub use jwt::generate_refresh_token;
pub use jwt::validate_access_token;
pub use jwt::validate_refresh_token;
pub use password::hash_password;
pub use password::verify_password;
pub use refresh_token::issue_token_pair;
pub use refresh_token::revoke_all_user_tokens;
pub use refresh_token::revoke_refresh_token;
pub use refresh_token::rotate_refresh_token;
pub use refresh_token::TokenPair;
