// Authentication types

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// OAuth2 client credential set, immutable after construction
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub redirect_uri: String,
}

/// Token data produced by a successful refresh
#[derive(Debug, Clone)]
pub struct TokenData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Raw response from the Zoho token endpoint.
///
/// Zoho returns either a token grant or an error body; both arrive with
/// varying optional fields, so everything is optional here and the caller
/// decides which shape it got.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access_token: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub message: Option<String>,
}

/// Errors surfaced by the token manager.
///
/// `Clone` is required because a single in-flight refresh hands its settled
/// result to every caller that joined it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TokenError {
    /// Refresh token lacks the required CRM scope; operator must regenerate it
    #[error("OAuth scope mismatch: {0}")]
    ScopeMismatch(String),

    /// The provider rejected the refresh request
    #[error("Token refresh failed: {error} - {description}")]
    RefreshFailed { error: String, description: String },

    /// Transport-level failure contacting the token endpoint
    #[error("Token refresh request error: {0}")]
    RequestError(String),

    /// Malformed or non-JSON response from the token endpoint
    #[error("Failed to parse token response: {0}")]
    ParseError(String),

    /// The operation was retried once with a fresh token and failed again
    #[error("Failed to refresh access token and retry: {0}")]
    RetryFailed(String),
}

/// Implemented by upstream error types so the token manager can decide
/// whether a failed operation was rejected because of a bad bearer token.
///
/// Zoho's error payloads are not contractually stable across endpoints, so
/// implementations are expected to match loosely (error codes plus substring
/// checks) rather than against a strict schema.
pub trait TokenRejection {
    fn is_invalid_token(&self) -> bool;
}
