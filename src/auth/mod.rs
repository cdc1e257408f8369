// Authentication module
// Manages the OAuth2 bearer token lifecycle for the Zoho CRM integration

mod types;
mod manager;
mod refresh;

pub use manager::TokenManager;
pub use types::{Credentials, TokenError, TokenRejection};
