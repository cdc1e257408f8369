use anyhow::Result;
use std::sync::Arc;

mod auth;
mod config;
mod crm;
mod error;
mod middleware;
mod partner;
mod routes;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = config::Config::load()?;
    config.validate()?;

    // Initialize logging with the configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    tracing::info!("Zoho relay starting...");
    tracing::info!(
        "Server configured: {}:{}",
        config.server_host,
        config.server_port
    );
    tracing::info!("Allowed CORS origins: {}", config.allowed_origins.join(", "));

    // Initialize the token manager
    let tokens = Arc::new(auth::TokenManager::new(
        config.zoho_credentials(),
        config.zoho_accounts_base.clone(),
    )?);

    // Self-test: fetch a token so credential problems surface at startup.
    // The server still starts on failure; CRM requests will report errors.
    match tokens.valid_access_token().await {
        Ok(token) => {
            tracing::info!(
                "Zoho authentication successful (token: {}...)",
                &token[..12.min(token.len())]
            );
        }
        Err(e) => {
            tracing::error!("Zoho authentication failed: {}", e);
            tracing::warn!("Server will start but CRM requests will fail until credentials are fixed");
        }
    }

    // Initialize upstream clients
    let crm = Arc::new(crm::CrmClient::new(
        tokens.clone(),
        config.zoho_api_base.clone(),
    )?);

    let partner = match config.partner_api_base.clone() {
        Some(base) => {
            tracing::info!("Partner API proxy enabled: {}", base);
            Some(Arc::new(partner::PartnerClient::new(
                base,
                config.partner_api_key.clone(),
            )?))
        }
        None => {
            tracing::info!("Partner API proxy disabled (PARTNER_API_BASE not set)");
            None
        }
    };

    let state = routes::AppState {
        tokens,
        crm,
        partner,
        config: Arc::new(config.clone()),
    };

    // Build the application with routes and middleware
    let app = routes::build_app(state);

    // Bind to configured host and port
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Health check: http://{}/health", addr);
    tracing::info!("Zoho test: http://{}/api/zoho/test", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
