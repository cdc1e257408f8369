// CORS middleware

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::CorsLayer;

/// Create the CORS middleware layer from the configured origin list.
///
/// Origins are already normalized by config parsing (trimmed, no trailing
/// slash, de-duplicated), so each response carries a single well-formed
/// `Access-Control-Allow-Origin` header.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
