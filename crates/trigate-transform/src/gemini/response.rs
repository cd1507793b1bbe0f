//! Canonical response -> Gemini-dialect response.

use trigate_protocol::gemini::generate_content::{
    Candidate, Content, ContentRole, FunctionCall as GeminiFunctionCall, GeminiFinishReason,
    GenerateContentResponse, Part, UsageMetadata,
};
use trigate_protocol::openai::chat::{
    ChatCompletionResponse, CompletionUsage, FinishReason, ToolCall,
};

use crate::claude::response::parse_arguments;

pub fn transform_response(
    resp: ChatCompletionResponse,
    requested_model: &str,
) -> GenerateContentResponse {
    let mut parts = Vec::new();
    let mut finish_reason = None;

    if let Some(choice) = resp.choices.into_iter().next() {
        let mut texts: Vec<String> = Vec::new();
        if let Some(reasoning) = choice.message.reasoning_content
            && !reasoning.is_empty()
        {
            texts.push(reasoning);
        }
        if let Some(text) = choice.message.content
            && !text.is_empty()
        {
            texts.push(text);
        }
        if !texts.is_empty() {
            parts.push(Part::Text {
                text: texts.join("\n\n"),
            });
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            let ToolCall::Function { function, .. } = call;
            parts.push(Part::FunctionCall {
                function_call: GeminiFunctionCall {
                    name: function.name,
                    args: Some(parse_arguments(&function.arguments)),
                },
            });
        }
        finish_reason = choice.finish_reason.map(map_finish_reason);
    }

    GenerateContentResponse {
        candidates: vec![Candidate {
            content: Content {
                role: Some(ContentRole::Model),
                parts,
            },
            finish_reason,
            index: Some(0),
        }],
        usage_metadata: resp.usage.as_ref().map(map_usage),
        model_version: Some(requested_model.to_string()),
    }
}

pub fn map_finish_reason(reason: FinishReason) -> GeminiFinishReason {
    match reason {
        FinishReason::Stop => GeminiFinishReason::Stop,
        FinishReason::Length => GeminiFinishReason::MaxTokens,
        // Gemini has no tool-specific finish reason; the functionCall
        // parts themselves carry that signal.
        FinishReason::ToolCalls => GeminiFinishReason::Stop,
        FinishReason::ContentFilter => GeminiFinishReason::Safety,
        FinishReason::Other => GeminiFinishReason::Other,
    }
}

pub fn map_usage(usage: &CompletionUsage) -> UsageMetadata {
    let cached = usage
        .prompt_tokens_details
        .as_ref()
        .and_then(|details| details.cached_tokens);
    UsageMetadata {
        // Gemini reports uncached input separately from cached content.
        prompt_token_count: usage.prompt_tokens - cached.unwrap_or(0),
        candidates_token_count: usage.completion_tokens,
        total_token_count: usage.total_tokens,
        cached_content_token_count: cached,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trigate_protocol::openai::chat::{
        ChatChoice, FunctionCall, PromptTokensDetails, ResponseMessage,
    };

    fn response_with(message: ResponseMessage, finish: Option<FinishReason>) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "chatcmpl-2".to_string(),
            object: "chat.completion".to_string(),
            created: 1_700_000_000,
            model: "glm-4.6".to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message,
                finish_reason: finish,
            }],
            usage: Some(CompletionUsage {
                prompt_tokens: 50,
                completion_tokens: 10,
                total_tokens: 60,
                prompt_tokens_details: Some(PromptTokensDetails {
                    cached_tokens: Some(40),
                }),
            }),
        }
    }

    #[test]
    fn text_and_tool_calls_become_candidate_parts() {
        let resp = response_with(
            ResponseMessage {
                role: "assistant".to_string(),
                content: Some("here".to_string()),
                reasoning_content: None,
                tool_calls: Some(vec![ToolCall::Function {
                    id: "call_1".to_string(),
                    function: FunctionCall {
                        name: "lookup".to_string(),
                        arguments: r#"{"q":"x"}"#.to_string(),
                    },
                }]),
            },
            Some(FinishReason::ToolCalls),
        );
        let out = transform_response(resp, "gemini-2.5-pro");
        let candidate = &out.candidates[0];
        assert_eq!(candidate.content.role, Some(ContentRole::Model));
        assert_eq!(candidate.finish_reason, Some(GeminiFinishReason::Stop));
        assert_eq!(candidate.content.parts.len(), 2);
        match &candidate.content.parts[1] {
            Part::FunctionCall { function_call } => {
                assert_eq!(function_call.name, "lookup");
                assert_eq!(function_call.args.as_ref().unwrap()["q"], "x");
            }
            other => panic!("expected functionCall, got {other:?}"),
        }
        assert_eq!(out.model_version.as_deref(), Some("gemini-2.5-pro"));
    }

    #[test]
    fn usage_maps_to_usage_metadata() {
        let resp = response_with(
            ResponseMessage {
                role: "assistant".to_string(),
                content: Some("ok".to_string()),
                reasoning_content: None,
                tool_calls: None,
            },
            Some(FinishReason::Stop),
        );
        let out = transform_response(resp, "gemini-2.5-flash");
        let usage = out.usage_metadata.unwrap();
        // 50 prompt tokens, 40 of them cache reads: only 10 count as input.
        assert_eq!(usage.prompt_token_count, 10);
        assert_eq!(usage.candidates_token_count, 10);
        assert_eq!(usage.total_token_count, 60);
        assert_eq!(usage.cached_content_token_count, Some(40));
    }

    #[test]
    fn usage_without_cache_details_passes_through() {
        let usage = map_usage(&CompletionUsage {
            prompt_tokens: 50,
            completion_tokens: 10,
            total_tokens: 60,
            prompt_tokens_details: None,
        });
        assert_eq!(usage.prompt_token_count, 50);
        assert_eq!(usage.cached_content_token_count, None);
    }

    #[test]
    fn content_filter_maps_to_safety() {
        assert_eq!(
            map_finish_reason(FinishReason::ContentFilter),
            GeminiFinishReason::Safety
        );
    }
}
