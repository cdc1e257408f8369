// Token refresh logic

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;

use super::types::{Credentials, RefreshResponse, TokenData, TokenError};

/// Default token lifetime when the provider omits `expires_in` (Zoho tokens
/// typically live for one hour)
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Safety margin subtracted from the declared lifetime so a token is never
/// used right at the provider's expiry boundary
const EXPIRY_MARGIN_SECS: i64 = 300;

/// Scope fragment a usable CRM refresh token must carry
const REQUIRED_SCOPE: &str = "ZohoCRM";

/// Compute the expiry watermark for a token issued now
pub fn expiry_watermark(issued_at: DateTime<Utc>, expires_in: Option<u64>) -> DateTime<Utc> {
    let expires_in = expires_in.map(|s| s as i64).unwrap_or(DEFAULT_EXPIRES_IN_SECS);
    issued_at + Duration::seconds(expires_in - EXPIRY_MARGIN_SECS)
}

/// Exchange the refresh token for a new access token.
///
/// POSTs a form-encoded `grant_type=refresh_token` request to the accounts
/// host and classifies every failure mode so operators can tell a scope
/// problem (credentials need regeneration) from a transient rejection.
pub async fn refresh_access_token(
    client: &Client,
    creds: &Credentials,
    accounts_base: &str,
) -> Result<TokenData, TokenError> {
    tracing::debug!("Refreshing Zoho access token...");

    let url = format!("{}/oauth/v2/token", accounts_base.trim_end_matches('/'));
    let form = [
        ("refresh_token", creds.refresh_token.as_str()),
        ("client_id", creds.client_id.as_str()),
        ("client_secret", creds.client_secret.as_str()),
        ("redirect_uri", creds.redirect_uri.as_str()),
        ("grant_type", "refresh_token"),
    ];

    let response = client
        .post(&url)
        .form(&form)
        .send()
        .await
        .map_err(|e| TokenError::RequestError(e.to_string()))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| TokenError::RequestError(e.to_string()))?;

    let parsed: RefreshResponse =
        serde_json::from_str(&body).map_err(|e| TokenError::ParseError(e.to_string()))?;

    if status.is_success() {
        if let Some(access_token) = parsed.access_token {
            // A token granted without the CRM scope still works for other
            // Zoho services but will fail downstream with OAUTH_SCOPE_MISMATCH
            if let Some(ref scope) = parsed.scope {
                if !scope.contains(REQUIRED_SCOPE) {
                    tracing::warn!(
                        scope = %scope,
                        "Token scope does not include {}; CRM API calls may be rejected",
                        REQUIRED_SCOPE
                    );
                }
            }

            let expires_at = expiry_watermark(Utc::now(), parsed.expires_in);
            tracing::info!("Access token refreshed, expires: {}", expires_at.to_rfc3339());

            return Ok(TokenData {
                access_token,
                expires_at,
            });
        }
    }

    let error = parsed.error.unwrap_or_else(|| "Unknown error".to_string());
    let description = parsed
        .error_description
        .or(parsed.message)
        .unwrap_or_default();

    if error == "invalid_client"
        || description.contains("scope")
        || description.contains("OAUTH_SCOPE")
    {
        tracing::error!(
            error = %error,
            description = %description,
            scope = parsed.scope.as_deref().unwrap_or("unknown"),
            "Token refresh failed: refresh token has insufficient scope, regenerate it with the {} scope",
            REQUIRED_SCOPE
        );
        Err(TokenError::ScopeMismatch(format!(
            "refresh token has insufficient scope, regenerate with {} scope ({})",
            REQUIRED_SCOPE, error
        )))
    } else {
        tracing::error!(error = %error, description = %description, "Token refresh failed");
        Err(TokenError::RefreshFailed { error, description })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_credentials() -> Credentials {
        Credentials {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            refresh_token: "refresh-token".to_string(),
            redirect_uri: "https://example.com/callback".to_string(),
        }
    }

    #[test]
    fn test_expiry_watermark_exact() {
        let issued = Utc::now();
        let watermark = expiry_watermark(issued, Some(3600));
        // 3600s lifetime minus the 5 minute margin
        assert_eq!(watermark - issued, Duration::seconds(3300));
    }

    #[test]
    fn test_expiry_watermark_default_lifetime() {
        let issued = Utc::now();
        let watermark = expiry_watermark(issued, None);
        assert_eq!(watermark - issued, Duration::seconds(3300));
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/v2/token")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .with_status(200)
            .with_body(
                r#"{"access_token":"new-token","expires_in":3600,"scope":"ZohoCRM.modules.ALL"}"#,
            )
            .create_async()
            .await;

        let client = Client::new();
        let before = Utc::now();
        let data = refresh_access_token(&client, &test_credentials(), &server.url())
            .await
            .unwrap();
        let after = Utc::now();

        assert_eq!(data.access_token, "new-token");
        assert!(data.expires_at >= before + Duration::seconds(3300));
        assert!(data.expires_at <= after + Duration::seconds(3300));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_sends_refresh_token_grant() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/v2/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                mockito::Matcher::UrlEncoded("client_id".into(), "client-id".into()),
                mockito::Matcher::UrlEncoded("client_secret".into(), "client-secret".into()),
                mockito::Matcher::UrlEncoded("refresh_token".into(), "refresh-token".into()),
                mockito::Matcher::UrlEncoded(
                    "redirect_uri".into(),
                    "https://example.com/callback".into(),
                ),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"t","expires_in":3600}"#)
            .create_async()
            .await;

        let client = Client::new();
        refresh_access_token(&client, &test_credentials(), &server.url())
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_scope_mismatch_on_invalid_client() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/v2/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_client"}"#)
            .create_async()
            .await;

        let client = Client::new();
        let err = refresh_access_token(&client, &test_credentials(), &server.url())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::ScopeMismatch(_)));
    }

    #[tokio::test]
    async fn test_refresh_scope_mismatch_on_scope_description() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/v2/token")
            .with_status(400)
            .with_body(
                r#"{"error":"invalid_code","error_description":"OAUTH_SCOPE_MISMATCH: wrong scope"}"#,
            )
            .create_async()
            .await;

        let client = Client::new();
        let err = refresh_access_token(&client, &test_credentials(), &server.url())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::ScopeMismatch(_)));
    }

    #[tokio::test]
    async fn test_refresh_generic_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/v2/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_code","error_description":"expired grant"}"#)
            .create_async()
            .await;

        let client = Client::new();
        let err = refresh_access_token(&client, &test_credentials(), &server.url())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TokenError::RefreshFailed {
                error: "invalid_code".to_string(),
                description: "expired grant".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_refresh_parse_error_on_non_json() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/v2/token")
            .with_status(200)
            .with_body("<html>gateway timeout</html>")
            .create_async()
            .await;

        let client = Client::new();
        let err = refresh_access_token(&client, &test_credentials(), &server.url())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_refresh_request_error_on_unreachable_host() {
        let client = Client::new();
        // Port 9 (discard) is never serving HTTP locally
        let err = refresh_access_token(&client, &test_credentials(), "http://127.0.0.1:9")
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::RequestError(_)));
    }
}
