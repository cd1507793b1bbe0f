//! Canonical response -> Anthropic-dialect response.

use serde_json::Value as JsonValue;
use trigate_protocol::claude::response::{
    ContentBlock, MessageType, MessagesResponse, MessagesUsage, ResponseRole, StopReason,
};
use trigate_protocol::openai::chat::{ChatCompletionResponse, FinishReason, ToolCall};

pub fn transform_response(resp: ChatCompletionResponse, requested_model: &str) -> MessagesResponse {
    let mut content = Vec::new();
    let mut stop_reason = None;

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
            content.push(ContentBlock::Text {
                text: texts.join("\n\n"),
            });
        }

        for call in choice.message.tool_calls.unwrap_or_default() {
            let ToolCall::Function { id, function } = call;
            content.push(ContentBlock::ToolUse {
                id,
                name: function.name,
                input: parse_arguments(&function.arguments),
            });
        }

        stop_reason = choice.finish_reason.map(map_stop_reason);
    }

    MessagesResponse {
        id: resp.id,
        r#type: MessageType::Message,
        role: ResponseRole::Assistant,
        model: requested_model.to_string(),
        content,
        stop_reason,
        stop_sequence: None,
        usage: map_usage(resp.usage.as_ref()),
    }
}

pub fn map_stop_reason(reason: FinishReason) -> StopReason {
    match reason {
        FinishReason::Stop => StopReason::EndTurn,
        FinishReason::Length => StopReason::MaxTokens,
        FinishReason::ToolCalls => StopReason::ToolUse,
        FinishReason::ContentFilter => StopReason::EndTurn,
        FinishReason::Other => StopReason::Other,
    }
}

pub fn map_usage(usage: Option<&trigate_protocol::openai::chat::CompletionUsage>) -> MessagesUsage {
    let Some(usage) = usage else {
        return MessagesUsage::default();
    };
    let cached = usage
        .prompt_tokens_details
        .as_ref()
        .and_then(|details| details.cached_tokens);
    MessagesUsage {
        // Anthropic reports uncached input separately from cache reads.
        input_tokens: usage.prompt_tokens - cached.unwrap_or(0),
        output_tokens: usage.completion_tokens,
        cache_read_input_tokens: cached,
    }
}

/// Unparseable arguments degrade to an empty object; dropping the call
/// entirely would lose the tool invocation.
pub fn parse_arguments(arguments: &str) -> JsonValue {
    if arguments.trim().is_empty() {
        return JsonValue::Object(serde_json::Map::new());
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| JsonValue::Object(serde_json::Map::new()))
}
