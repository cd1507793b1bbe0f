//! Canonical-dialect handlers. Requests and responses already match the
//! backend wire shape, so bodies pass through with only model
//! normalization and credential selection applied by the engine.

use axum::extract::{Query, State};
use axum::response::Response;
use bytes::Bytes;
use serde::Deserialize;

use trigate_core::ReplyBody;
use trigate_protocol::openai::chat::ChatCompletionRequestBody;
use trigate_protocol::openai::embeddings::EmbeddingsRequestBody;
use trigate_protocol::openai::models::{GroupedModelsResponse, ListModelsResponse};

use crate::respond::{error_response, json_passthrough, parse_json};
use crate::sse::{json_response, openai_sse};
use crate::AppState;

pub async fn chat_completions(State(state): State<AppState>, body: Bytes) -> Response {
    let request: ChatCompletionRequestBody = match parse_json(&body) {
        Ok(request) => request,
        Err(err) => return error_response(&err),
    };

    match state.engine.dispatch_chat(request).await {
        Ok(reply) => match reply.body {
            ReplyBody::Json(bytes) => json_passthrough(bytes),
            ReplyBody::Stream(rx) => openai_sse(rx),
        },
        Err(err) => error_response(&err),
    }
}

#[derive(Deserialize)]
pub struct ListModelsQuery {
    #[serde(default)]
    grouped: bool,
}

pub async fn list_models(
    State(state): State<AppState>,
    Query(query): Query<ListModelsQuery>,
) -> Response {
    if query.grouped {
        let credentials = state.engine.grouped_models().await;
        return json_response(&GroupedModelsResponse {
            object: "list".to_string(),
            credentials,
        });
    }

    match state.engine.list_models().await {
        Ok(data) => json_response(&ListModelsResponse {
            object: "list".to_string(),
            data,
        }),
        Err(err) => error_response(&err),
    }
}

pub async fn embeddings(State(state): State<AppState>, body: Bytes) -> Response {
    let request: EmbeddingsRequestBody = match parse_json(&body) {
        Ok(request) => request,
        Err(err) => return error_response(&err),
    };

    match state.engine.dispatch_embeddings(request).await {
        Ok(bytes) => json_passthrough(bytes),
        Err(err) => error_response(&err),
    }
}
