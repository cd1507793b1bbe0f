//! Anthropic-dialect handlers: translate the request into canonical
//! form, dispatch, and translate the answer back. The model string the
//! client sent is echoed in responses regardless of alias resolution.

use axum::extract::State;
use axum::response::Response;
use bytes::Bytes;

use trigate_common::GatewayError;
use trigate_core::ReplyBody;
use trigate_protocol::claude::count_tokens::{CountTokensRequestBody, CountTokensResponse};
use trigate_protocol::claude::messages::MessagesRequestBody;
use trigate_protocol::openai::chat::ChatCompletionResponse;
use trigate_transform::claude::{request, response};
use trigate_transform::count_tokens::estimate_claude;

use crate::respond::{error_response, parse_json};
use crate::sse::{claude_sse, json_response};
use crate::AppState;

pub async fn messages(State(state): State<AppState>, body: Bytes) -> Response {
    let request_body: MessagesRequestBody = match parse_json(&body) {
        Ok(request_body) => request_body,
        Err(err) => return error_response(&err),
    };

    let requested_model = request_body.model.clone();
    let canonical = request::transform_request(request_body);

    match state.engine.dispatch_chat(canonical).await {
        Ok(reply) => match reply.body {
            ReplyBody::Json(bytes) => {
                let upstream: ChatCompletionResponse = match serde_json::from_slice(&bytes) {
                    Ok(upstream) => upstream,
                    // A malformed body from the backend is its failure, not
                    // the client's.
                    Err(err) => {
                        return error_response(&GatewayError::Upstream {
                            status: 502,
                            message: err.to_string(),
                        })
                    }
                };
                json_response(&response::transform_response(upstream, &requested_model))
            }
            ReplyBody::Stream(rx) => claude_sse(rx, requested_model),
        },
        Err(err) => error_response(&err),
    }
}

pub async fn count_tokens(body: Bytes) -> Response {
    let request_body: CountTokensRequestBody = match parse_json(&body) {
        Ok(request_body) => request_body,
        Err(err) => return error_response(&err),
    };
    json_response(&CountTokensResponse {
        input_tokens: estimate_claude(&request_body),
    })
}
