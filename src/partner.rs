// Partner API proxy client
// Transparent relay to the secondary REST API the frontend talks to
// through this backend

use anyhow::{Context, Result};
use axum::http::HeaderMap;
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Errors from partner API forwarding
#[derive(Error, Debug)]
pub enum PartnerError {
    /// Transport-level failure contacting the partner API
    #[error("Partner API request error: {0}")]
    Request(String),

    /// Partner API returned a non-success status
    #[error("Partner API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        body: Value,
    },

    /// Response body was not valid JSON
    #[error("Failed to parse partner API response (status {status})")]
    Parse { status: u16, body: String },
}

/// Successful upstream response: status preserved so the relay can mirror it
#[derive(Debug)]
pub struct PartnerResponse {
    pub status: u16,
    pub body: Value,
}

/// Client for the partner REST API
pub struct PartnerClient {
    client: Client,
    api_base: String,
    /// Bearer key from configuration; when set it overrides any
    /// Authorization header forwarded from the caller
    api_key: Option<String>,
}

impl PartnerClient {
    pub fn new(api_base: String, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_base,
            api_key,
        })
    }

    /// Forward a request to the partner API.
    ///
    /// `path_and_query` is the remainder of the caller's path (plus query
    /// string) after the proxy prefix. Only `X-API-Key` and `Authorization`
    /// are forwarded from the caller's headers.
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        caller_headers: &HeaderMap,
        body: Option<Value>,
    ) -> Result<PartnerResponse, PartnerError> {
        let url = format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            path_and_query.trim_start_matches('/')
        );

        tracing::debug!(method = %method, url = %url, "Forwarding request to partner API");

        let mut request = self
            .client
            .request(method, &url)
            .header("Content-Type", "application/json");

        if let Some(key) = caller_headers.get("x-api-key") {
            request = request.header("X-API-Key", key);
        }
        if let Some(auth) = caller_headers.get("authorization") {
            request = request.header("Authorization", auth);
        }
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PartnerError::Request(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PartnerError::Request(e.to_string()))?;

        // Some endpoints reply with an empty body on success
        let parsed: Value = if text.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&text).map_err(|_| PartnerError::Parse {
                status: status.as_u16(),
                body: text.clone(),
            })?
        };

        if status.is_success() {
            Ok(PartnerResponse {
                status: status.as_u16(),
                body: parsed,
            })
        } else {
            let message = parsed
                .get("message")
                .or_else(|| parsed.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("Request failed")
                .to_string();

            Err(PartnerError::Api {
                status: status.as_u16(),
                message,
                body: parsed,
            })
        }
    }
}
