pub mod auth;
pub mod config;
pub mod credentials;
pub mod handlers;
pub mod llm;
pub mod mcp;
pub mod models;
pub mod state;
pub mod store;

use axum::Router;
use axum::routing::{delete, get, post};

use state::AppState;

/// Build the application router with the given state.
/// Extracted from `main()` so integration tests can construct the app
/// without binding to a network port.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/api/health", get(handlers::health))
        .route("/api/health/ready", get(handlers::readiness))
        // LLM bridge (session auth)
        .route("/api/llm/query", post(handlers::llm_query))
        .route("/api/llm/stream", post(handlers::llm_stream))
        .route("/api/llm/models", get(handlers::llm_models))
        // MCP token management (session auth)
        .route("/api/mcp/tokens", get(handlers::list_tokens).post(handlers::create_token))
        .route("/api/mcp/tokens/{id}", delete(handlers::delete_token))
        // MCP JSON-RPC endpoint (MCP token auth)
        .route("/mcp/rss", post(mcp::server::mcp_handler))
        .with_state(state)
}
