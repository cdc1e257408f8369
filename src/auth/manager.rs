use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::refresh;
use super::types::{Credentials, TokenError, TokenRejection};

/// One refresh attempt shared by every caller that joined it while it was
/// pending; all of them observe the same settled result
type SharedRefresh = Shared<BoxFuture<'static, Result<String, TokenError>>>;

/// Cached bearer token plus its expiry watermark.
/// Invariant: both fields are set or cleared together.
#[derive(Debug, Default)]
struct TokenState {
    access_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

/// OAuth2 token manager
/// Owns the credential set and the cached bearer token, refreshing it
/// transparently when absent, expired, or rejected by the upstream
pub struct TokenManager {
    /// Immutable client credentials
    credentials: Credentials,

    /// Base URL of the Zoho accounts host (token endpoint)
    accounts_base: String,

    /// HTTP client for refresh requests
    client: Client,

    /// Cached token state
    state: Arc<RwLock<TokenState>>,

    /// In-flight refresh guard: at most one refresh call is outstanding;
    /// late arrivals await the same shared future instead of issuing
    /// duplicate requests
    refreshing: Arc<Mutex<Option<SharedRefresh>>>,
}

impl TokenManager {
    /// Create a new TokenManager from a credential set
    pub fn new(credentials: Credentials, accounts_base: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            credentials,
            accounts_base,
            client,
            state: Arc::new(RwLock::new(TokenState::default())),
            refreshing: Arc::new(Mutex::new(None)),
        })
    }

    /// Refresh the access token, de-duplicating concurrent callers.
    ///
    /// If a refresh is already in flight the existing shared future is
    /// awaited; otherwise a new refresh is started. The guard slot is
    /// cleared on every settle path (success or failure) so a past failure
    /// never blocks the next attempt.
    pub async fn refresh_access_token(&self) -> Result<String, TokenError> {
        let fut = {
            let mut slot = self.refreshing.lock().await;

            if let Some(fut) = slot.as_ref() {
                fut.clone()
            } else {
                let client = self.client.clone();
                let creds = self.credentials.clone();
                let accounts_base = self.accounts_base.clone();
                let state = Arc::clone(&self.state);
                let refreshing = Arc::clone(&self.refreshing);

                let fut: SharedRefresh = async move {
                    let result =
                        refresh::refresh_access_token(&client, &creds, &accounts_base).await;

                    if let Ok(ref data) = result {
                        let mut state = state.write().await;
                        state.access_token = Some(data.access_token.clone());
                        state.expires_at = Some(data.expires_at);
                    }

                    refreshing.lock().await.take();

                    result.map(|data| data.access_token)
                }
                .boxed()
                .shared();

                *slot = Some(fut.clone());
                fut
            }
        };

        fut.await
    }

    /// Get a valid access token, refreshing if absent or past the watermark
    pub async fn valid_access_token(&self) -> Result<String, TokenError> {
        {
            let state = self.state.read().await;
            if let (Some(token), Some(expires_at)) = (&state.access_token, state.expires_at) {
                if Utc::now() < expires_at {
                    return Ok(token.clone());
                }
            }
        }

        self.refresh_access_token().await
    }

    /// Drop the cached token so the next caller is forced to refresh
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.access_token = None;
        state.expires_at = None;
    }

    /// Seed the cached token directly, bypassing the network
    #[cfg(test)]
    pub(crate) async fn seed_token(&self, token: &str, expires_at: DateTime<Utc>) {
        let mut state = self.state.write().await;
        state.access_token = Some(token.to_string());
        state.expires_at = Some(expires_at);
    }

    /// Run an upstream operation under a valid token, retrying exactly once
    /// when the upstream rejects the token as invalid.
    ///
    /// Any error the operation's type does not classify as an invalid-token
    /// condition propagates unchanged. A retry that fails again is wrapped
    /// as [`TokenError::RetryFailed`]; there is never a third attempt.
    pub async fn execute_with_retry<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: TokenRejection + From<TokenError> + std::fmt::Display,
    {
        let token = self.valid_access_token().await.map_err(E::from)?;

        match operation(token).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_invalid_token() => {
                tracing::info!("Upstream rejected token as invalid, refreshing and retrying...");

                self.invalidate().await;
                let token = self.refresh_access_token().await.map_err(E::from)?;

                match operation(token).await {
                    Ok(value) => Ok(value),
                    Err(retry_err) => {
                        tracing::error!("Retry after token refresh failed: {}", retry_err);
                        Err(E::from(TokenError::RetryFailed(retry_err.to_string())))
                    }
                }
            }
            Err(err) => Err(err),
        }
    }
}
