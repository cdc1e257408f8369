use anyhow::{Context, Result};
use reqwest::{Client, Method};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use super::error::CrmError;
use crate::auth::TokenManager;

/// Zoho CRM API client
/// Every call goes through the token manager so an upstream token rejection
/// is healed with one transparent refresh-and-retry
pub struct CrmClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Base URL of the CRM API host
    api_base: String,

    /// Token manager supplying bearer tokens
    tokens: Arc<TokenManager>,
}

impl CrmClient {
    /// Create a new CRM client
    pub fn new(tokens: Arc<TokenManager>, api_base: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_base,
            tokens,
        })
    }

    /// Create a Lead or Contact record from a form submission
    pub async fn create_record(
        &self,
        module: &str,
        record: Map<String, Value>,
    ) -> Result<Value, CrmError> {
        let path = format!("/crm/v3/{}", module);
        let payload = json!({ "data": [record] });

        tracing::debug!(module = %module, "Creating CRM record");

        self.tokens
            .execute_with_retry(|token| {
                let payload = payload.clone();
                let path = path.clone();
                async move {
                    self.api_request(&token, Method::POST, &path, Some(payload))
                        .await
                }
            })
            .await
    }

    /// List CRM modules (used as a connection self-test)
    pub async fn list_modules(&self) -> Result<Value, CrmError> {
        self.tokens
            .execute_with_retry(|token| async move {
                self.api_request(&token, Method::GET, "/crm/v3/settings/modules", None)
                    .await
            })
            .await
    }

    /// List field metadata for a module
    pub async fn list_fields(&self, module: &str) -> Result<Value, CrmError> {
        let path = format!("/crm/v3/settings/fields?module={}", module);

        self.tokens
            .execute_with_retry(|token| {
                let path = path.clone();
                async move { self.api_request(&token, Method::GET, &path, None).await }
            })
            .await
    }

    /// Attach a file to an existing record.
    ///
    /// Attachments use the v2 endpoint; a failure here must not fail the
    /// submission that created the record, so callers log and move on.
    pub async fn upload_attachment(
        &self,
        module: &str,
        record_id: &str,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<Value, CrmError> {
        let token = self.tokens.valid_access_token().await?;
        let url = format!(
            "{}/crm/v2/{}/{}/attachments",
            self.api_base.trim_end_matches('/'),
            module,
            record_id
        );

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| CrmError::Request(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Zoho-oauthtoken {}", token))
            .multipart(form)
            .send()
            .await
            .map_err(|e| CrmError::Request(e.to_string()))?;

        parse_response(response).await
    }

    /// Download a file so it can be re-uploaded as an attachment
    pub async fn download(&self, url: &str) -> Result<(Vec<u8>, String), CrmError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CrmError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrmError::Request(format!(
                "Failed to download file: {} ({})",
                status, url
            )));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CrmError::Request(e.to_string()))?;

        Ok((bytes.to_vec(), content_type))
    }

    /// Raw CRM API request with error-shape mining
    async fn api_request(
        &self,
        token: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, CrmError> {
        let url = format!("{}{}", self.api_base.trim_end_matches('/'), path);

        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", format!("Zoho-oauthtoken {}", token))
            .header("Content-Type", "application/json");

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CrmError::Request(e.to_string()))?;

        parse_response(response).await
    }
}

/// Parse a CRM API response, mining Zoho's varying error shapes into a
/// structured [`CrmError::Api`]
async fn parse_response(response: reqwest::Response) -> Result<Value, CrmError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| CrmError::Request(e.to_string()))?;

    let parsed: Value = serde_json::from_str(&text).map_err(|_| CrmError::Parse {
        status: status.as_u16(),
        body: text.clone(),
    })?;

    if status.is_success() {
        return Ok(parsed);
    }

    Err(CrmError::Api {
        code: error_code(&parsed),
        message: error_message(&parsed),
        status: status.as_u16(),
        body: parsed,
    })
}

fn error_code(body: &Value) -> String {
    body.get("code")
        .and_then(Value::as_str)
        .or_else(|| body.pointer("/error/code").and_then(Value::as_str))
        .or_else(|| body.pointer("/data/0/code").and_then(Value::as_str))
        .unwrap_or("API_ERROR")
        .to_string()
}

fn error_message(body: &Value) -> String {
    body.pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| body.get("message").and_then(Value::as_str))
        .or_else(|| body.pointer("/data/0/message").and_then(Value::as_str))
        .or_else(|| body.pointer("/data/0/status").and_then(Value::as_str))
        .unwrap_or("API request failed")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credentials, TokenRejection};
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;

    fn test_client(base: &str) -> (CrmClient, Arc<TokenManager>) {
        let tokens = Arc::new(
            TokenManager::new(
                Credentials {
                    client_id: "client-id".to_string(),
                    client_secret: "client-secret".to_string(),
                    refresh_token: "refresh-token".to_string(),
                    redirect_uri: "https://example.com/callback".to_string(),
                },
                base.to_string(),
            )
            .unwrap(),
        );
        let client = CrmClient::new(tokens.clone(), base.to_string()).unwrap();
        (client, tokens)
    }

    #[test]
    fn test_error_code_shapes() {
        assert_eq!(error_code(&json!({"code": "INVALID_TOKEN"})), "INVALID_TOKEN");
        assert_eq!(
            error_code(&json!({"error": {"code": "AUTHENTICATION_FAILURE"}})),
            "AUTHENTICATION_FAILURE"
        );
        assert_eq!(
            error_code(&json!({"data": [{"code": "INVALID_DATA"}]})),
            "INVALID_DATA"
        );
        assert_eq!(error_code(&json!({})), "API_ERROR");
    }

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(
            error_message(&json!({"error": {"message": "bad token"}})),
            "bad token"
        );
        assert_eq!(error_message(&json!({"message": "nope"})), "nope");
        assert_eq!(
            error_message(&json!({"data": [{"message": "field required"}]})),
            "field required"
        );
        assert_eq!(
            error_message(&json!({"data": [{"status": "error"}]})),
            "error"
        );
        assert_eq!(error_message(&json!({})), "API request failed");
    }

    #[tokio::test]
    async fn test_create_record_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/crm/v3/Leads")
            .match_header("authorization", "Zoho-oauthtoken seeded-token")
            .with_status(201)
            .with_body(r#"{"data":[{"status":"success","details":{"id":"1001"}}]}"#)
            .create_async()
            .await;

        let (client, tokens) = test_client(&server.url());
        tokens
            .seed_token("seeded-token", Utc::now() + ChronoDuration::minutes(30))
            .await;

        let mut record = Map::new();
        record.insert("Last_Name".to_string(), Value::from("Doe"));
        let result = client.create_record("Leads", record).await.unwrap();

        assert_eq!(result["data"][0]["status"], "success");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_record_heals_invalid_token() {
        let mut server = mockito::Server::new_async().await;

        // Upstream rejects the stale token once, accepts the refreshed one
        let rejected = server
            .mock("POST", "/crm/v3/Leads")
            .match_header("authorization", "Zoho-oauthtoken stale-token")
            .with_status(401)
            .with_body(r#"{"code":"INVALID_TOKEN","message":"invalid oauth token"}"#)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("POST", "/crm/v3/Leads")
            .match_header("authorization", "Zoho-oauthtoken fresh-token")
            .with_status(201)
            .with_body(r#"{"data":[{"status":"success","details":{"id":"1002"}}]}"#)
            .expect(1)
            .create_async()
            .await;
        let token_endpoint = server
            .mock("POST", "/oauth/v2/token")
            .with_status(200)
            .with_body(r#"{"access_token":"fresh-token","expires_in":3600,"scope":"ZohoCRM.modules.ALL"}"#)
            .expect(1)
            .create_async()
            .await;

        let (client, tokens) = test_client(&server.url());
        tokens
            .seed_token("stale-token", Utc::now() + ChronoDuration::minutes(30))
            .await;

        let mut record = Map::new();
        record.insert("Last_Name".to_string(), Value::from("Doe"));
        let result = client.create_record("Leads", record).await.unwrap();

        assert_eq!(result["data"][0]["details"]["id"], "1002");
        rejected.assert_async().await;
        accepted.assert_async().await;
        token_endpoint.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_token_error_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/crm/v3/Leads")
            .with_status(400)
            .with_body(r#"{"data":[{"code":"INVALID_DATA","message":"bad email","status":"error"}]}"#)
            .expect(1)
            .create_async()
            .await;
        let token_endpoint = server
            .mock("POST", "/oauth/v2/token")
            .expect(0)
            .create_async()
            .await;

        let (client, tokens) = test_client(&server.url());
        tokens
            .seed_token("token", Utc::now() + ChronoDuration::minutes(30))
            .await;

        let err = client
            .create_record("Leads", Map::new())
            .await
            .unwrap_err();

        assert!(!err.is_invalid_token());
        match err {
            CrmError::Api { code, status, .. } => {
                assert_eq!(code, "INVALID_DATA");
                assert_eq!(status, 400);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        mock.assert_async().await;
        token_endpoint.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_fields_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/crm/v3/settings/fields?module=Leads")
            .with_status(200)
            .with_body(r#"{"fields":[{"api_name":"Email","custom_field":false}]}"#)
            .create_async()
            .await;

        let (client, tokens) = test_client(&server.url());
        tokens
            .seed_token("token", Utc::now() + ChronoDuration::minutes(30))
            .await;

        let result = client.list_fields("Leads").await.unwrap();
        assert_eq!(result["fields"][0]["api_name"], "Email");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_parse_error_on_html_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/crm/v3/settings/modules")
            .with_status(502)
            .with_body("<html>bad gateway</html>")
            .create_async()
            .await;

        let (client, tokens) = test_client(&server.url());
        tokens
            .seed_token("token", Utc::now() + ChronoDuration::minutes(30))
            .await;

        let err = client.list_modules().await.unwrap_err();
        assert!(matches!(err, CrmError::Parse { status: 502, .. }));
    }
}
