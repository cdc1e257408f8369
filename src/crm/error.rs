// Zoho CRM error types and invalid-token classification

use serde_json::Value;
use thiserror::Error;

use crate::auth::{TokenError, TokenRejection};

/// Errors from Zoho CRM API calls
#[derive(Error, Debug)]
pub enum CrmError {
    /// Structured error body returned by the CRM API
    #[error("Zoho API error: {code} - {message}")]
    Api {
        code: String,
        message: String,
        status: u16,
        /// Full response body, kept because Zoho scatters error details
        /// across different shapes per endpoint
        body: Value,
    },

    /// Transport-level failure contacting the CRM API
    #[error("Zoho API request error: {0}")]
    Request(String),

    /// Response body was not valid JSON
    #[error("Failed to parse Zoho API response (status {status})")]
    Parse { status: u16, body: String },

    /// Token acquisition or refresh-and-retry failure
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl TokenRejection for CrmError {
    /// Loose heuristic match, kept deliberately broad: Zoho reports an
    /// invalid token as a 401, as an INVALID_TOKEN/AUTHENTICATION_FAILURE
    /// code, or only as a marker string buried somewhere in the body,
    /// depending on the endpoint.
    fn is_invalid_token(&self) -> bool {
        let CrmError::Api {
            code,
            message,
            status,
            body,
        } = self
        else {
            return false;
        };

        if *status == 401 {
            return true;
        }

        if code == "INVALID_TOKEN" || code == "AUTHENTICATION_FAILURE" {
            return true;
        }

        let message = message.to_uppercase();
        if message.contains("INVALID_TOKEN") || message.contains("INVALID_OAUTH") {
            return true;
        }

        let body = body.to_string().to_uppercase();
        body.contains("INVALID_TOKEN") || body.contains("AUTHENTICATION_FAILURE")
    }
}
