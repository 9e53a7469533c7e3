//! Tally Web Server
//!
//! Axum-based REST API for the Tally statement ingestion pipeline. Requests need a bearer
//! API key unless the server was started with --no-auth; internal errors are logged and
//! returned as a generic message.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use tally_core::config::CategoryMap;
use tally_core::db::Database;
use tally_core::models::RebuildScope;
use tally_core::AggregationEngine;

mod handlers;

/// Maximum file upload size (10 MB)
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Whether authentication is required (secure by default)
    pub require_auth: bool,
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
    /// API keys accepted as "Bearer <key>" in the Authorization header
    pub api_keys: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            allowed_origins: vec![],
            api_keys: vec![],
        }
    }
}

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub config: ServerConfig,
    /// Category mapping used by imports and rebuilds
    pub categories: CategoryMap,
}

/// Reject requests without a valid `Authorization: Bearer <key>` header
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.require_auth {
        return next.run(request).await;
    }

    let api_key_valid = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(|key| validate_api_key(key, &state.config.api_keys))
        .unwrap_or(false);

    if api_key_valid {
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "Unauthorized request");
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": "Authentication required"
        })),
    )
        .into_response()
}

/// Validate API key using constant-time comparison
fn validate_api_key(provided: &str, valid_keys: &[String]) -> bool {
    use subtle::ConstantTimeEq;

    valid_keys
        .iter()
        .any(|key| bool::from(provided.as_bytes().ct_eq(key.as_bytes())))
}

/// Split a comma-separated environment value into trimmed, non-empty entries
pub fn parse_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Create the router with the built-in category mapping
pub fn create_router(db: Database, config: ServerConfig) -> Router {
    create_router_with_categories(db, CategoryMap::default(), config)
}

/// Create the router with an explicit category mapping
pub fn create_router_with_categories(
    db: Database,
    categories: CategoryMap,
    config: ServerConfig,
) -> Router {
    let state = Arc::new(AppState {
        db,
        config: config.clone(),
        categories,
    });

    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        // Parse stage
        .route("/statements/parse", post(handlers::parse_statement))
        // Import
        .route("/transactions/import", post(handlers::import_canonical_csv))
        .route("/transactions/import/rows", post(handlers::import_rows))
        // Export
        .route("/transactions/export", get(handlers::export_transactions))
        // Aggregation
        .route("/aggregation/rebuild", post(handlers::rebuild_aggregates))
        .route("/aggregation/stats", get(handlers::aggregation_stats))
        .route("/aggregation/months", get(handlers::list_months))
        .route("/aggregation/months/:month", get(handlers::get_month));

    // No listed origins means same-origin only
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state)
        // Multipart framing adds a little on top of the file itself
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE + 64 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
}

/// Start the server with custom configuration
pub async fn serve_with_config(
    db: Database,
    categories: CategoryMap,
    host: &str,
    port: u16,
    config: ServerConfig,
) -> anyhow::Result<()> {
    if !config.require_auth {
        warn!("⚠️  Authentication disabled - do not expose to network!");
    }

    // Rebuilds interrupted by a previous shutdown are marked failed, then rerun
    match db.recover_interrupted_rebuilds() {
        Ok(count) if count > 0 => {
            warn!(
                "⚠️  Recovered {} interrupted rebuild(s) from previous server session",
                count
            );
            match AggregationEngine::new(&db)
                .with_categories(&categories)
                .rebuild(RebuildScope::All)
            {
                Ok(result) => info!(
                    "Reran aggregation rebuild: {} month(s) processed",
                    result.processed_months
                ),
                Err(e) => warn!("Failed to rerun aggregation rebuild: {}", e),
            }
        }
        Ok(_) => {}
        Err(e) => {
            warn!("Failed to recover interrupted rebuilds: {}", e);
        }
    }

    let app = create_router_with_categories(db, categories, config);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.to_string(),
            internal: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

/// Convert any error into an AppError
///
/// Caller mistakes from the core library (bad statements, invalid rows, unknown months)
/// keep their message; everything else becomes a generic 500.
impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();

        if let Some(core) = err.downcast_ref::<tally_core::Error>() {
            if core.is_client_error() {
                let status = match core {
                    tally_core::Error::NotFound(_) => StatusCode::NOT_FOUND,
                    _ => StatusCode::BAD_REQUEST,
                };
                return Self {
                    status,
                    message: core.to_string(),
                    internal: None,
                };
            }
        }

        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            // Return generic message to client
            message: "An internal error occurred".to_string(),
            // Keep full error for logging
            internal: Some(err),
        }
    }
}
