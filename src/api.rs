use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::debug;

use crate::{
    mcp_api::{PROTOCOL_VERSION, SERVER_NAME, SERVER_VERSION},
    AppState,
};

pub const DOCS_URL: &str = "https://openfacet.net/en/api-docs/#mcp-server";
pub const GITHUB_URL: &str = "https://github.com/openfacet/mcp-server";

const MCP_PROTOCOL_HEADER: &str = "mcp-protocol-version";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(docs_redirect).post(mcp))
        .route("/health", get(healthz))
        .route("/.well-known/mcp.json", get(well_known))
        .fallback(not_found)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers([
                    header::CONTENT_TYPE,
                    HeaderName::from_static(MCP_PROTOCOL_HEADER),
                ]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "version": PROTOCOL_VERSION }))
}

pub async fn mcp(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let message = match serde_json::from_slice::<Value>(&body) {
        Ok(message) => message,
        Err(err) => {
            debug!("Rejected unparsable MCP body: {err}");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid request", "detail": err.to_string() })),
            )
                .into_response();
        }
    };

    let response = state.dispatcher.handle(message).await;
    ([(MCP_PROTOCOL_HEADER, PROTOCOL_VERSION)], Json(response)).into_response()
}

pub async fn well_known(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "name": SERVER_NAME,
        "version": SERVER_VERSION,
        "description": "Diamond Pricing MCP server with carat/color/clarity interpolation",
        "author": "OpenFacet",
        "license": "MIT",
        "mcp": {
            "protocolVersion": PROTOCOL_VERSION,
            "endpoint": "/",
            "transport": "http",
            "capabilities": {
                "tools": true,
                "logging": true,
                "resources": false,
                "elicitation": false
            }
        },
        "tools": [
            {
                "name": "get_diamond_price",
                "description": "Price diamond based on carat, color, clarity, and shape",
                "parameters": ["carat", "color", "clarity", "shape"]
            },
            {
                "name": "get_dcx_index",
                "description": "Retrieve current Diamond Composite Index (DCX) and 24-hour change",
                "parameters": []
            },
            {
                "name": "get_market_depth",
                "description": "Fetch market depth for a specific carat weight or overall inventory",
                "parameters": ["carat"]
            }
        ],
        "documentation": { "url": DOCS_URL },
        "support": { "url": format!("{GITHUB_URL}/issues") },
        "limits": { "cacheExpiry": state.config.cache_ttl_seconds }
    }))
}

pub async fn docs_redirect() -> impl IntoResponse {
    (
        StatusCode::FOUND,
        [("location", DOCS_URL), ("x-robots-tag", "noindex")],
    )
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}
