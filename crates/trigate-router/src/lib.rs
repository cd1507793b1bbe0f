mod admin;
mod auth;
mod claude;
mod gemini;
mod openai;
mod respond;
mod sse;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use trigate_core::GatewayEngine;
use trigate_pool::DeviceFlow;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<GatewayEngine>,
    pub flow: Arc<DeviceFlow>,
    /// blake3 digest of the configured gateway key; None disables auth.
    pub api_key_hash: Option<blake3::Hash>,
    pub production: bool,
}

impl AppState {
    pub fn new(
        engine: Arc<GatewayEngine>,
        flow: Arc<DeviceFlow>,
        api_key: Option<&str>,
        production: bool,
    ) -> Self {
        Self {
            engine,
            flow,
            api_key_hash: api_key.map(|key| blake3::hash(key.as_bytes())),
            production,
        }
    }
}

pub fn gateway_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/chat/completions", post(openai::chat_completions))
        .route("/v1/chat/completions", post(openai::chat_completions))
        .route("/models", get(openai::list_models))
        .route("/v1/models", get(openai::list_models))
        .route("/embeddings", post(openai::embeddings))
        .route("/v1/embeddings", post(openai::embeddings))
        .route("/v1/messages", post(claude::messages))
        .route("/v1/messages/count_tokens", post(claude::count_tokens))
        .route("/v1beta/models/{model_and_method}", post(gemini::dispatch))
        .route("/auth/login", post(admin::login))
        .route("/auth/complete", post(admin::complete))
        .route(
            "/auth/tokens",
            get(admin::list_tokens)
                .post(admin::add_token)
                .delete(admin::delete_token_by_body),
        )
        .route("/auth/tokens/all", delete(admin::delete_all_tokens))
        .route("/auth/tokens/{id}", delete(admin::delete_token))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::gateway_auth,
        ));

    Router::new()
        .route("/", get(admin::health))
        .merge(protected)
        .with_state(state)
}
