use anyhow::{Context, Result};
use clap::Parser;

use crate::auth::Credentials;

/// Zoho CRM form relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "PORT", default_value = "5000")]
    pub port: u16,

    /// Zoho OAuth client id
    #[arg(long, env = "ZOHO_CLIENT_ID")]
    pub zoho_client_id: Option<String>,

    /// Zoho OAuth client secret
    #[arg(long, env = "ZOHO_CLIENT_SECRET")]
    pub zoho_client_secret: Option<String>,

    /// Zoho OAuth refresh token
    #[arg(long, env = "ZOHO_REFRESH_TOKEN")]
    pub zoho_refresh_token: Option<String>,

    /// Zoho OAuth redirect URI
    #[arg(long, env = "ZOHO_REDIRECT_URI")]
    pub zoho_redirect_uri: Option<String>,

    /// Comma-separated list of allowed frontend origins
    #[arg(long, env = "FRONTEND_URL")]
    pub frontend_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Zoho OAuth credentials
    pub zoho_client_id: String,
    pub zoho_client_secret: String,
    pub zoho_refresh_token: String,
    pub zoho_redirect_uri: String,

    // Upstream hosts
    pub zoho_accounts_base: String,
    pub zoho_api_base: String,
    pub partner_api_base: Option<String>,
    pub partner_api_key: Option<String>,

    /// Base URL for resolving path-only attachment references
    pub attachment_base_url: Option<String>,

    // CORS
    pub allowed_origins: Vec<String>,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Load configuration with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        Self::from_args(args)
    }

    fn from_args(args: CliArgs) -> Result<Self> {
        let config = Config {
            server_host: args.host,
            server_port: args.port,

            // All four credentials are required: the token manager cannot
            // operate with a partial set
            zoho_client_id: args
                .zoho_client_id
                .context("ZOHO_CLIENT_ID is required")?,
            zoho_client_secret: args
                .zoho_client_secret
                .context("ZOHO_CLIENT_SECRET is required")?,
            zoho_refresh_token: args
                .zoho_refresh_token
                .context("ZOHO_REFRESH_TOKEN is required")?,
            zoho_redirect_uri: args
                .zoho_redirect_uri
                .context("ZOHO_REDIRECT_URI is required")?,

            zoho_accounts_base: env_or("ZOHO_ACCOUNTS_BASE", "https://accounts.zoho.com"),
            zoho_api_base: env_or("ZOHO_API_BASE", "https://www.zohoapis.com"),
            partner_api_base: std::env::var("PARTNER_API_BASE")
                .ok()
                .filter(|s| !s.is_empty()),
            partner_api_key: std::env::var("PARTNER_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            attachment_base_url: std::env::var("ATTACHMENT_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty()),

            allowed_origins: parse_allowed_origins(args.frontend_url.as_deref()),

            log_level: args.log_level,
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.zoho_client_id.is_empty()
            || self.zoho_client_secret.is_empty()
            || self.zoho_refresh_token.is_empty()
            || self.zoho_redirect_uri.is_empty()
        {
            anyhow::bail!("Zoho credentials must not be empty");
        }

        Ok(())
    }

    /// Credential set for the token manager
    pub fn zoho_credentials(&self) -> Credentials {
        Credentials {
            client_id: self.zoho_client_id.clone(),
            client_secret: self.zoho_client_secret.clone(),
            refresh_token: self.zoho_refresh_token.clone(),
            redirect_uri: self.zoho_redirect_uri.clone(),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Parse and normalize the allowed-origin list.
///
/// Origins arrive as a comma-separated string; each entry is trimmed,
/// stripped of trailing slashes, and de-duplicated so the CORS layer never
/// sees the malformed values that produce duplicate or mismatched
/// `Access-Control-Allow-Origin` headers. Falls back to common local dev
/// origins when unset.
pub fn parse_allowed_origins(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return vec![
            "http://localhost:5173".to_string(),
            "http://localhost:8080".to_string(),
            "http://localhost:3000".to_string(),
        ];
    };

    let mut origins: Vec<String> = Vec::new();
    for entry in raw.split(',') {
        let origin = entry.trim().trim_end_matches('/').to_string();
        if !origin.is_empty() && !origins.contains(&origin) {
            origins.push(origin);
        }
    }
    origins
}
