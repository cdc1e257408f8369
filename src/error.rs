// Error handling module
// Defines route-level error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use crate::auth::{TokenError, TokenRejection};
use crate::crm::CrmError;
use crate::partner::PartnerError;

/// API errors that can occur during request processing
#[derive(Error, Debug)]
pub enum ApiError {
    /// Request validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Error from the Zoho CRM integration
    #[error(transparent)]
    Crm(#[from] CrmError),

    /// Error from the partner API proxy
    #[error(transparent)]
    Partner(#[from] PartnerError),

    /// The CRM accepted the request but did not create a record
    #[error("{0}")]
    Upstream(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(msg) => error_response(StatusCode::BAD_REQUEST, &msg, None),

            ApiError::Crm(err) => crm_error_response(err),

            ApiError::Partner(err) => match err {
                PartnerError::Api {
                    status,
                    message,
                    body,
                } => error_response(
                    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                    &message,
                    Some(body),
                ),
                other => error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &other.to_string(),
                    None,
                ),
            },

            ApiError::Upstream(msg) => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, &msg, None)
            }

            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    None,
                )
            }
        }
    }
}

fn crm_error_response(err: CrmError) -> Response {
    if err.is_invalid_token() {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "Authentication failed. Please check your Zoho credentials.",
            None,
        );
    }

    match err {
        CrmError::Api {
            ref code,
            ref message,
            status,
            ref body,
        } if code == "INVALID_DATA" || status == 400 => {
            let field_errors = extract_field_errors(body);
            let body = json!({
                "success": false,
                "error": "Invalid data sent to Zoho CRM",
                "message": message,
                "fieldErrors": if field_errors.is_empty() { Value::Null } else { json!(field_errors) },
                "details": body,
            });
            (StatusCode::BAD_REQUEST, Json(body)).into_response()
        }

        CrmError::Token(TokenError::ScopeMismatch(_)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &err.to_string(),
            None,
        ),

        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, &other.to_string(), None),
    }
}

/// Extract per-record error details from Zoho's bulk response shape
fn extract_field_errors(body: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    if let Some(items) = body.get("data").and_then(Value::as_array) {
        for (index, item) in items.iter().enumerate() {
            if let Some(details) = item.get("details") {
                if !details.is_null() {
                    errors.push(format!("Record {}: {}", index + 1, details));
                }
            }
            if let Some(message) = item.get("message").and_then(Value::as_str) {
                errors.push(format!("Record {}: {}", index + 1, message));
            }
        }
    }

    errors
}

fn error_response(status: StatusCode, message: &str, details: Option<Value>) -> Response {
    let body = json!({
        "success": false,
        "error": message,
        "details": details,
    });
    (status, Json(body)).into_response()
}

/// Result type alias for route handlers
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_validation_error_response() {
        let err = ApiError::Validation("Email is required".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_token_maps_to_unauthorized() {
        let err = ApiError::Crm(CrmError::Api {
            code: "INVALID_TOKEN".to_string(),
            message: "invalid oauth token".to_string(),
            status: 401,
            body: json!({}),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_data_maps_to_bad_request() {
        let err = ApiError::Crm(CrmError::Api {
            code: "INVALID_DATA".to_string(),
            message: "invalid data".to_string(),
            status: 400,
            body: json!({"data": [{"code": "INVALID_DATA", "message": "bad email"}]}),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_partner_error_mirrors_upstream_status() {
        let err = ApiError::Partner(PartnerError::Api {
            status: 404,
            message: "not found".to_string(),
            body: json!({}),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_internal_error_response() {
        let err = ApiError::Internal(anyhow::anyhow!("something went wrong"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_extract_field_errors() {
        let body = json!({
            "data": [
                {"code": "INVALID_DATA", "message": "bad email", "details": {"api_name": "Email"}},
                {"code": "MANDATORY_NOT_FOUND", "message": "Last_Name missing"}
            ]
        });
        let errors = extract_field_errors(&body);
        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("Record 1:"));
        assert!(errors[2].contains("Last_Name missing"));
    }

    #[test]
    fn test_extract_field_errors_empty() {
        assert!(extract_field_errors(&json!({})).is_empty());
    }
}
