use axum::{
    extract::{Query, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::TokenManager;
use crate::config::Config;
use crate::crm::records::{self, SubmitRequest};
use crate::crm::CrmClient;
use crate::error::ApiError;
use crate::middleware;
use crate::partner::PartnerClient;

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenManager>,
    pub crm: Arc<CrmClient>,
    pub partner: Option<Arc<PartnerClient>>,
    pub config: Arc<Config>,
}

/// Build the application with all routes and middleware
pub fn build_app(state: AppState) -> Router {
    let cors = middleware::cors_layer(&state.config.allowed_origins);

    let mut app = Router::new()
        .merge(health_routes())
        .merge(zoho_routes(state.clone()));

    if state.partner.is_some() {
        app = app.merge(partner_routes(state.clone()));
    }

    app.fallback(not_found_handler).layer(cors)
}

/// Health check routes (no CRM access required)
pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(info_handler))
        .route("/health", get(health_handler))
}

/// Zoho CRM routes
pub fn zoho_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/zoho/submit", post(submit_handler))
        .route("/api/zoho/test", get(test_handler))
        .route("/api/zoho/fields", get(fields_handler))
        .with_state(state)
}

/// Partner API proxy routes
pub fn partner_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/partner", any(partner_proxy_handler))
        .route("/api/partner/*path", any(partner_proxy_handler))
        .with_state(state)
}

/// GET / - Service info
async fn info_handler() -> Json<Value> {
    Json(json!({
        "message": "Zoho CRM Integration API",
        "version": VERSION,
        "endpoints": {
            "health": "/health",
            "zohoTest": "/api/zoho/test",
            "zohoSubmit": "/api/zoho/submit (POST)",
            "zohoFields": "/api/zoho/fields",
            "partner": "/api/partner/* (GET, POST, PUT, DELETE)"
        }
    }))
}

/// GET /health - Health check for load balancers
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION
    }))
}

/// Fallback for unknown paths
async fn not_found_handler(method: Method, uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": "Endpoint not found",
            "path": uri.path(),
            "method": method.as_str(),
        })),
    )
        .into_response()
}

/// POST /api/zoho/submit - Submit form data to Zoho CRM
///
/// Normalizes the submission into a CRM record, creates it (with transparent
/// token refresh-and-retry), then uploads any attachments best-effort.
async fn submit_handler(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.email.as_deref().map(str::trim).unwrap_or("").is_empty() {
        return Err(ApiError::Validation("Email is required".to_string()));
    }

    let module = request.module().to_string();
    let record = records::build_record(&request);

    tracing::info!(module = %module, "Submitting form to Zoho CRM");
    let result = state.crm.create_record(&module, record).await?;

    let Some(record_result) = result.pointer("/data/0") else {
        tracing::error!(response = %result, "Failed to create record: no data in response");
        return Err(ApiError::Upstream(
            "Failed to create record in Zoho CRM".to_string(),
        ));
    };

    let record_id = record_result
        .pointer("/details/id")
        .and_then(Value::as_str)
        .map(str::to_string);

    if record_result.get("status").and_then(Value::as_str) != Some("success") {
        tracing::warn!(result = %record_result, "Zoho record created with warnings");
        return Ok(Json(json!({
            "success": true,
            "message": "Form submitted to Zoho CRM with warnings",
            "data": {
                "id": record_id,
                "module": module,
                "warnings": record_result.get("message").or_else(|| record_result.get("details")),
            }
        })));
    }

    if let Some(ref record_id) = record_id {
        upload_attachments(&state, &module, record_id, &request).await;
    }

    Ok(Json(json!({
        "success": true,
        "message": "Form submitted successfully to Zoho CRM",
        "data": {
            "id": record_id,
            "module": module,
        }
    })))
}

/// Upload submission attachments to the created record.
/// Failures are logged and swallowed: an attachment must never fail the
/// submission that already created the record.
async fn upload_attachments(
    state: &AppState,
    module: &str,
    record_id: &str,
    request: &SubmitRequest,
) {
    for attachment in &request.attachments {
        let url = attachment.url.clone().or_else(|| {
            let base = state.config.attachment_base_url.as_deref()?;
            let path = attachment.path.as_deref()?;
            Some(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                path.trim_start_matches('/')
            ))
        });

        let Some(url) = url else {
            tracing::warn!(name = %attachment.name, "Attachment has no url or path, skipping");
            continue;
        };

        let result = async {
            let (bytes, content_type) = state.crm.download(&url).await?;
            state
                .crm
                .upload_attachment(module, record_id, &attachment.name, &content_type, bytes)
                .await
        }
        .await;

        match result {
            Ok(_) => tracing::info!(name = %attachment.name, "Uploaded attachment"),
            Err(e) => {
                tracing::warn!(name = %attachment.name, error = %e, "Failed to upload attachment")
            }
        }
    }
}

/// GET /api/zoho/test - Verify the Zoho connection end to end
async fn test_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    // Token first so a credential problem is reported as such
    state
        .tokens
        .valid_access_token()
        .await
        .map_err(crate::crm::CrmError::from)?;

    let result = state.crm.list_modules().await?;
    let modules_count = result
        .get("modules")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);

    Ok(Json(json!({
        "success": true,
        "message": "Zoho connection is working",
        "data": { "modulesCount": modules_count }
    })))
}

#[derive(Debug, Deserialize)]
struct FieldsQuery {
    module: Option<String>,
}

/// GET /api/zoho/fields - Field metadata for form builders
async fn fields_handler(
    State(state): State<AppState>,
    Query(query): Query<FieldsQuery>,
) -> Result<Json<Value>, ApiError> {
    let module = query.module.as_deref().unwrap_or(records::DEFAULT_MODULE);
    let result = state.crm.list_fields(module).await?;

    let empty = Vec::new();
    let all_fields = result
        .get("fields")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    let (custom_fields, standard_fields): (Vec<&Value>, Vec<&Value>) = all_fields
        .iter()
        .partition(|f| f.get("custom_field").and_then(Value::as_bool).unwrap_or(false));

    let formatted: Vec<Value> = custom_fields
        .iter()
        .map(|field| {
            json!({
                "displayLabel": field.get("display_label"),
                "apiName": field.get("api_name"),
                "dataType": field.get("data_type"),
                "required": field.get("required"),
                "systemMandatory": field.get("system_mandatory"),
            })
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "module": module,
        "totalFields": all_fields.len(),
        "customFieldsCount": custom_fields.len(),
        "standardFieldsCount": standard_fields.len(),
        "customFields": formatted,
        "allCustomFields": custom_fields,
    })))
}

/// Any /api/partner/* - Forward the request to the partner API
async fn partner_proxy_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let Some(partner) = state.partner.as_ref() else {
        // Routes are only mounted when configured, but state is shared
        return Ok((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"success": false, "error": "Partner API proxy is not configured"})),
        )
            .into_response());
    };

    if !matches!(
        method,
        Method::GET | Method::POST | Method::PUT | Method::DELETE
    ) {
        return Ok((
            StatusCode::METHOD_NOT_ALLOWED,
            Json(json!({"success": false, "error": "Method not allowed"})),
        )
            .into_response());
    }

    let path = uri
        .path()
        .strip_prefix("/api/partner")
        .filter(|p| !p.is_empty())
        .unwrap_or("/");
    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };

    let body = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice(&body)
                .map_err(|e| ApiError::Validation(format!("Invalid JSON body: {}", e)))?,
        )
    };

    let response = partner
        .forward(method, &path_and_query, &headers, body)
        .await?;

    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok((
        status,
        Json(json!({
            "success": true,
            "data": response.body,
            "message": "Request successful",
        })),
    )
        .into_response())
}
