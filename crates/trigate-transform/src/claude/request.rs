//! Anthropic-dialect request -> canonical request.

use trigate_protocol::claude::messages::{
    ContentBlockParam, ImageSource, MessageContent, MessageParam, MessageRole, MessagesRequestBody,
    SystemParam, Tool, ToolChoice, ToolResultBlock, ToolResultContent,
};
use trigate_protocol::openai::chat::{
    AssistantMessage, ChatCompletionRequestBody, ChatMessage, ContentPart, FunctionCall,
    FunctionObject, ImageUrl, NamedFunction, NamedToolChoice, NamedToolChoiceType,
    StopConfiguration, StreamOptions, SystemMessage, ToolCall, ToolChoiceMode, ToolChoiceOption,
    ToolDefinition, ToolMessage, UserContent, UserMessage,
};

use crate::model_map::normalize_model;

pub fn transform_request(body: MessagesRequestBody) -> ChatCompletionRequestBody {
    let mut messages = Vec::new();
    if let Some(system) = map_system(body.system) {
        messages.push(system);
    }

    let mut synthetic_ids = SyntheticIds::default();
    for message in &body.messages {
        match message.role {
            MessageRole::User => messages.extend(map_user_message(message)),
            MessageRole::Assistant => {
                messages.push(map_assistant_message(message, &mut synthetic_ids))
            }
        }
    }

    let stream = body.stream;
    ChatCompletionRequestBody {
        model: normalize_model(&body.model),
        messages,
        tools: map_tools(body.tools),
        tool_choice: map_tool_choice(body.tool_choice),
        temperature: body.temperature,
        top_p: body.top_p,
        max_tokens: Some(body.max_tokens),
        stop: map_stop(body.stop_sequences),
        stream,
        stream_options: stream.filter(|on| *on).map(|_| StreamOptions {
            include_usage: Some(true),
        }),
        user: None,
    }
}

#[derive(Default)]
struct SyntheticIds {
    next: u32,
}

impl SyntheticIds {
    fn assign(&mut self) -> String {
        let id = format!("call_{:04}", self.next);
        self.next += 1;
        id
    }
}

fn map_system(system: Option<SystemParam>) -> Option<ChatMessage> {
    let text = match system? {
        SystemParam::Text(text) => text,
        SystemParam::Blocks(blocks) => {
            let texts: Vec<String> = blocks.into_iter().map(|block| block.text).collect();
            if texts.is_empty() {
                return None;
            }
            texts.join("\n\n")
        }
    };
    Some(ChatMessage::System(SystemMessage { content: text }))
}

/// Tool-result blocks become standalone tool messages and are emitted
/// before any ordinary content from the same turn.
fn map_user_message(message: &MessageParam) -> Vec<ChatMessage> {
    let mut tool_messages = Vec::new();
    let mut parts: Vec<ContentPart> = Vec::new();
    let mut has_image = false;

    match &message.content {
        MessageContent::Text(text) => push_text(&mut parts, text.clone()),
        MessageContent::Blocks(blocks) => {
            for block in blocks {
                match block {
                    ContentBlockParam::ToolResult {
                        tool_use_id,
                        content,
                        is_error: _,
                    } => {
                        tool_messages.push(ChatMessage::Tool(ToolMessage {
                            content: tool_result_text(content.as_ref()),
                            tool_call_id: tool_use_id.clone(),
                        }));
                    }
                    ContentBlockParam::Text { text } => push_text(&mut parts, text.clone()),
                    ContentBlockParam::Image { source } => {
                        has_image = true;
                        parts.push(ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: image_url(source),
                            },
                        });
                    }
                    ContentBlockParam::Thinking { thinking, .. } => {
                        push_text(&mut parts, thinking.clone())
                    }
                    // A tool_use block in a user turn is malformed input;
                    // degrade to its serialized form rather than dropping it.
                    ContentBlockParam::ToolUse { .. } => {
                        if let Ok(text) = serde_json::to_string(block) {
                            push_text(&mut parts, text);
                        }
                    }
                }
            }
        }
    }

    let mut out = tool_messages;
    if let Some(content) = collapse_parts(parts, has_image) {
        out.push(ChatMessage::User(UserMessage { content }));
    }
    out
}

fn map_assistant_message(message: &MessageParam, ids: &mut SyntheticIds) -> ChatMessage {
    let mut texts: Vec<String> = Vec::new();
    let mut tool_calls = Vec::new();

    match &message.content {
        MessageContent::Text(text) => texts.push(text.clone()),
        MessageContent::Blocks(blocks) => {
            for block in blocks {
                match block {
                    ContentBlockParam::Text { text } => texts.push(text.clone()),
                    ContentBlockParam::Thinking { thinking, .. } => texts.push(thinking.clone()),
                    ContentBlockParam::ToolUse { id, name, input } => {
                        let id = if id.is_empty() {
                            ids.assign()
                        } else {
                            id.clone()
                        };
                        tool_calls.push(ToolCall::Function {
                            id,
                            function: FunctionCall {
                                name: name.clone(),
                                arguments: serde_json::to_string(input)
                                    .unwrap_or_else(|_| "{}".to_string()),
                            },
                        });
                    }
                    ContentBlockParam::Image { .. }
                    | ContentBlockParam::ToolResult { .. } => {
                        if let Ok(text) = serde_json::to_string(block) {
                            texts.push(text);
                        }
                    }
                }
            }
        }
    }

    let texts: Vec<String> = texts.into_iter().filter(|text| !text.is_empty()).collect();
    ChatMessage::Assistant(AssistantMessage {
        content: if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n\n"))
        },
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
    })
}

fn push_text(parts: &mut Vec<ContentPart>, text: String) {
    if !text.is_empty() {
        parts.push(ContentPart::Text { text });
    }
}

/// Without an image the parts array collapses to a plain string so the
/// canonical shape stays minimal.
fn collapse_parts(parts: Vec<ContentPart>, has_image: bool) -> Option<UserContent> {
    if parts.is_empty() {
        return None;
    }
    if has_image {
        return Some(UserContent::Parts(parts));
    }
    let texts: Vec<String> = parts
        .into_iter()
        .map(|part| match part {
            ContentPart::Text { text } => text,
            ContentPart::ImageUrl { .. } => String::new(),
        })
        .collect();
    Some(UserContent::Text(texts.join("\n\n")))
}

fn image_url(source: &ImageSource) -> String {
    match source {
        ImageSource::Url { url } => url.clone(),
        ImageSource::Base64 { media_type, data } => {
            format!("data:{media_type};base64,{data}")
        }
    }
}

fn tool_result_text(content: Option<&ToolResultContent>) -> String {
    match content {
        Some(ToolResultContent::Text(text)) => text.clone(),
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .map(|block| match block {
                ToolResultBlock::Text { text } => text.clone(),
                ToolResultBlock::Image { .. } => "[tool_result image]".to_string(),
            })
            .collect::<Vec<String>>()
            .join("\n"),
        None => String::new(),
    }
}

fn map_tools(tools: Option<Vec<Tool>>) -> Option<Vec<ToolDefinition>> {
    let tools = tools?;
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .into_iter()
            .map(|tool| ToolDefinition::Function {
                function: FunctionObject {
                    name: tool.name,
                    description: tool.description,
                    parameters: Some(tool.input_schema),
                },
            })
            .collect(),
    )
}

fn map_tool_choice(choice: Option<ToolChoice>) -> Option<ToolChoiceOption> {
    Some(match choice? {
        ToolChoice::Auto => ToolChoiceOption::Mode(ToolChoiceMode::Auto),
        ToolChoice::Any => ToolChoiceOption::Mode(ToolChoiceMode::Required),
        ToolChoice::None => ToolChoiceOption::Mode(ToolChoiceMode::None),
        ToolChoice::Tool { name } => ToolChoiceOption::Named(NamedToolChoice {
            r#type: NamedToolChoiceType::Function,
            function: NamedFunction { name },
        }),
    })
}

fn map_stop(sequences: Option<Vec<String>>) -> Option<StopConfiguration> {
    let mut sequences = sequences?;
    match sequences.len() {
        0 => None,
        1 => Some(StopConfiguration::Single(sequences.remove(0))),
        _ => Some(StopConfiguration::Many(sequences)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trigate_protocol::claude::messages::SystemTextBlock;
    use trigate_protocol::claude::messages::TextBlockType;

    fn body_with(messages: Vec<MessageParam>) -> MessagesRequestBody {
        MessagesRequestBody {
            model: "glm-4.6".to_string(),
            max_tokens: 1024,
            system: None,
            messages,
            tools: None,
            tool_choice: None,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: None,
            metadata: None,
        }
    }

    #[test]
    fn system_blocks_join_with_blank_line() {
        let mut body = body_with(Vec::new());
        body.system = Some(SystemParam::Blocks(vec![
            SystemTextBlock {
                r#type: TextBlockType::Text,
                text: "first".to_string(),
            },
            SystemTextBlock {
                r#type: TextBlockType::Text,
                text: "second".to_string(),
            },
        ]));
        let out = transform_request(body);
        match &out.messages[0] {
            ChatMessage::System(system) => assert_eq!(system.content, "first\n\nsecond"),
            other => panic!("expected system message, got {other:?}"),
        }
    }

    #[test]
    fn tool_results_precede_same_turn_text() {
        let body = body_with(vec![MessageParam {
            role: MessageRole::User,
            content: MessageContent::Blocks(vec![
                ContentBlockParam::Text {
                    text: "before".to_string(),
                },
                ContentBlockParam::ToolResult {
                    tool_use_id: "toolu_1".to_string(),
                    content: Some(ToolResultContent::Text("42".to_string())),
                    is_error: None,
                },
            ]),
        }]);
        let out = transform_request(body);
        assert!(matches!(&out.messages[0], ChatMessage::Tool(tool) if tool.tool_call_id == "toolu_1"));
        assert!(matches!(&out.messages[1], ChatMessage::User(_)));
    }

    #[test]
    fn text_only_parts_collapse_to_string() {
        let body = body_with(vec![MessageParam {
            role: MessageRole::User,
            content: MessageContent::Blocks(vec![
                ContentBlockParam::Text {
                    text: "a".to_string(),
                },
                ContentBlockParam::Text {
                    text: "b".to_string(),
                },
            ]),
        }]);
        let out = transform_request(body);
        match &out.messages[0] {
            ChatMessage::User(user) => {
                assert_eq!(user.content, UserContent::Text("a\n\nb".to_string()))
            }
            other => panic!("expected user message, got {other:?}"),
        }
    }

    #[test]
    fn image_keeps_ordered_parts() {
        let body = body_with(vec![MessageParam {
            role: MessageRole::User,
            content: MessageContent::Blocks(vec![
                ContentBlockParam::Text {
                    text: "look:".to_string(),
                },
                ContentBlockParam::Image {
                    source: ImageSource::Url {
                        url: "https://img.example/x.png".to_string(),
                    },
                },
            ]),
        }]);
        let out = transform_request(body);
        match &out.messages[0] {
            ChatMessage::User(user) => match &user.content {
                UserContent::Parts(parts) => {
                    assert!(matches!(&parts[0], ContentPart::Text { .. }));
                    assert!(matches!(&parts[1], ContentPart::ImageUrl { .. }));
                }
                other => panic!("expected parts, got {other:?}"),
            },
            other => panic!("expected user message, got {other:?}"),
        }
    }

    #[test]
    fn assistant_thinking_and_text_concatenate() {
        let body = body_with(vec![MessageParam {
            role: MessageRole::Assistant,
            content: MessageContent::Blocks(vec![
                ContentBlockParam::Thinking {
                    thinking: "hmm".to_string(),
                    signature: None,
                },
                ContentBlockParam::Text {
                    text: "answer".to_string(),
                },
                ContentBlockParam::ToolUse {
                    id: "toolu_9".to_string(),
                    name: "lookup".to_string(),
                    input: serde_json::json!({"q": 1}),
                },
            ]),
        }]);
        let out = transform_request(body);
        match &out.messages[0] {
            ChatMessage::Assistant(assistant) => {
                assert_eq!(assistant.content.as_deref(), Some("hmm\n\nanswer"));
                let calls = assistant.tool_calls.as_ref().unwrap();
                assert!(
                    matches!(&calls[0], ToolCall::Function { id, .. } if id == "toolu_9")
                );
            }
            other => panic!("expected assistant message, got {other:?}"),
        }
    }

    #[test]
    fn tool_choice_any_maps_to_required() {
        let mut body = body_with(Vec::new());
        body.tool_choice = Some(ToolChoice::Any);
        let out = transform_request(body);
        assert_eq!(
            out.tool_choice,
            Some(ToolChoiceOption::Mode(ToolChoiceMode::Required))
        );
    }
}
