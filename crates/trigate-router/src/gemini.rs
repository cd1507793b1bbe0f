//! Gemini-dialect handler. The path segment carries both the model and
//! the method, separated by the last colon, e.g.
//! `/v1beta/models/glm-4.6:streamGenerateContent`.

use axum::extract::{Path, State};
use axum::response::Response;
use bytes::Bytes;

use trigate_common::GatewayError;
use trigate_core::ReplyBody;
use trigate_protocol::gemini::count_tokens::{CountTokensRequestBody, CountTokensResponse};
use trigate_protocol::gemini::generate_content::GenerateContentRequestBody;
use trigate_protocol::openai::chat::ChatCompletionResponse;
use trigate_transform::count_tokens::estimate_gemini;
use trigate_transform::gemini::{request, response};

use crate::respond::{error_response, parse_json};
use crate::sse::{gemini_sse, json_response};
use crate::AppState;

pub async fn dispatch(
    State(state): State<AppState>,
    Path(model_and_method): Path<String>,
    body: Bytes,
) -> Response {
    let Some((model, method)) = model_and_method.rsplit_once(':') else {
        return error_response(&GatewayError::NotFound(format!(
            "missing method in path: {model_and_method}"
        )));
    };

    match method {
        "generateContent" => generate(&state, model, &body, false).await,
        "streamGenerateContent" => generate(&state, model, &body, true).await,
        "countTokens" => count_tokens(&body),
        other => error_response(&GatewayError::NotFound(format!(
            "unsupported method: {other}"
        ))),
    }
}

async fn generate(state: &AppState, model: &str, body: &Bytes, stream: bool) -> Response {
    let request_body: GenerateContentRequestBody = match parse_json(body) {
        Ok(request_body) => request_body,
        Err(err) => return error_response(&err),
    };

    let canonical = request::transform_request(model, request_body, stream);

    match state.engine.dispatch_chat(canonical).await {
        Ok(reply) => match reply.body {
            ReplyBody::Json(bytes) => {
                let upstream: ChatCompletionResponse = match serde_json::from_slice(&bytes) {
                    Ok(upstream) => upstream,
                    Err(err) => {
                        return error_response(&GatewayError::Upstream {
                            status: 502,
                            message: err.to_string(),
                        })
                    }
                };
                json_response(&response::transform_response(upstream, model))
            }
            ReplyBody::Stream(rx) => gemini_sse(rx, model.to_string()),
        },
        Err(err) => error_response(&err),
    }
}

fn count_tokens(body: &Bytes) -> Response {
    let request_body: CountTokensRequestBody = match parse_json(body) {
        Ok(request_body) => request_body,
        Err(err) => return error_response(&err),
    };
    json_response(&CountTokensResponse {
        total_tokens: estimate_gemini(&request_body),
    })
}
