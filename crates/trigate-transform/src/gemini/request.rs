//! Gemini-dialect request -> canonical request.
//!
//! Gemini function calls carry no ids, so ids are synthesized in encounter
//! order and function responses are correlated back by function name.

use std::collections::HashMap;

use trigate_protocol::gemini::generate_content::{
    Content, ContentRole, FunctionCallingMode, GenerateContentRequestBody, Part, ToolConfig,
};
use trigate_protocol::openai::chat::{
    AssistantMessage, ChatCompletionRequestBody, ChatMessage, ContentPart, FunctionCall,
    FunctionObject, ImageUrl, NamedFunction, NamedToolChoice, NamedToolChoiceType,
    StopConfiguration, StreamOptions, SystemMessage, ToolCall, ToolChoiceMode, ToolChoiceOption,
    ToolDefinition, ToolMessage, UserContent, UserMessage,
};

use crate::model_map::normalize_model;

pub fn transform_request(
    model: &str,
    body: GenerateContentRequestBody,
    stream: bool,
) -> ChatCompletionRequestBody {
    let mut messages = Vec::new();

    if let Some(system) = &body.system_instruction {
        let text = joined_text(system);
        if !text.is_empty() {
            messages.push(ChatMessage::System(SystemMessage { content: text }));
        }
    }

    let mut ids = CallIds::default();
    for content in &body.contents {
        match content.role {
            Some(ContentRole::Model) => messages.push(map_model_content(content, &mut ids)),
            // Gemini treats a missing role as the user side.
            Some(ContentRole::User) | None => messages.extend(map_user_content(content, &mut ids)),
        }
    }

    let generation = body.generation_config.unwrap_or_default();
    ChatCompletionRequestBody {
        model: normalize_model(model),
        messages,
        tools: map_tools(body.tools),
        tool_choice: map_tool_config(body.tool_config),
        temperature: generation.temperature,
        top_p: generation.top_p,
        max_tokens: generation.max_output_tokens,
        stop: map_stop(generation.stop_sequences),
        stream: stream.then_some(true),
        stream_options: stream.then_some(StreamOptions {
            include_usage: Some(true),
        }),
        user: None,
    }
}

/// Synthesized ids, assigned when a functionCall part is seen and looked
/// up again when the matching functionResponse arrives.
#[derive(Default)]
struct CallIds {
    next: u32,
    by_name: HashMap<String, String>,
}

impl CallIds {
    fn assign(&mut self, name: &str) -> String {
        let id = format!("call_{}", self.next);
        self.next += 1;
        self.by_name.insert(name.to_string(), id.clone());
        id
    }

    fn lookup(&self, name: &str) -> String {
        match self.by_name.get(name) {
            Some(id) => id.clone(),
            // No call was seen for this response; fall back to the name
            // so the pairing survives on a cooperative upstream.
            None => name.to_string(),
        }
    }
}

fn map_user_content(content: &Content, ids: &mut CallIds) -> Vec<ChatMessage> {
    let mut tool_messages = Vec::new();
    let mut parts: Vec<ContentPart> = Vec::new();
    let mut has_image = false;

    for part in &content.parts {
        match part {
            Part::Text { text } => {
                if !text.is_empty() {
                    parts.push(ContentPart::Text { text: text.clone() });
                }
            }
            Part::InlineData { inline_data } => {
                has_image = true;
                parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!(
                            "data:{};base64,{}",
                            inline_data.mime_type, inline_data.data
                        ),
                    },
                });
            }
            Part::FunctionResponse { function_response } => {
                tool_messages.push(ChatMessage::Tool(ToolMessage {
                    content: serde_json::to_string(&function_response.response)
                        .unwrap_or_else(|_| "{}".to_string()),
                    tool_call_id: ids.lookup(&function_response.name),
                }));
            }
            // A functionCall on the user side is malformed; ignore it.
            Part::FunctionCall { .. } => {}
        }
    }

    let mut out = tool_messages;
    if !parts.is_empty() {
        let content = if has_image {
            UserContent::Parts(parts)
        } else {
            let texts: Vec<String> = parts
                .into_iter()
                .map(|part| match part {
                    ContentPart::Text { text } => text,
                    ContentPart::ImageUrl { .. } => String::new(),
                })
                .collect();
            UserContent::Text(texts.join("\n\n"))
        };
        out.push(ChatMessage::User(UserMessage { content }));
    }
    out
}

fn map_model_content(content: &Content, ids: &mut CallIds) -> ChatMessage {
    let mut texts: Vec<String> = Vec::new();
    let mut tool_calls = Vec::new();

    for part in &content.parts {
        match part {
            Part::Text { text } => {
                if !text.is_empty() {
                    texts.push(text.clone());
                }
            }
            Part::FunctionCall { function_call } => {
                let arguments = match &function_call.args {
                    Some(args) => {
                        serde_json::to_string(args).unwrap_or_else(|_| "{}".to_string())
                    }
                    None => "{}".to_string(),
                };
                tool_calls.push(ToolCall::Function {
                    id: ids.assign(&function_call.name),
                    function: FunctionCall {
                        name: function_call.name.clone(),
                        arguments,
                    },
                });
            }
            Part::InlineData { .. } | Part::FunctionResponse { .. } => {}
        }
    }

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

fn joined_text(content: &Content) -> String {
    let texts: Vec<String> = content
        .parts
        .iter()
        .filter_map(|part| match part {
            Part::Text { text } if !text.is_empty() => Some(text.clone()),
            _ => None,
        })
        .collect();
    texts.join("\n\n")
}

fn map_tools(
    tools: Option<Vec<trigate_protocol::gemini::generate_content::GeminiTool>>,
) -> Option<Vec<ToolDefinition>> {
    let definitions: Vec<ToolDefinition> = tools?
        .into_iter()
        .flat_map(|tool| tool.function_declarations.unwrap_or_default())
        .map(|declaration| ToolDefinition::Function {
            function: FunctionObject {
                name: declaration.name,
                description: declaration.description,
                parameters: declaration.parameters,
            },
        })
        .collect();
    if definitions.is_empty() {
        None
    } else {
        Some(definitions)
    }
}

fn map_tool_config(config: Option<ToolConfig>) -> Option<ToolChoiceOption> {
    let calling = config?.function_calling_config?;
    let mode = calling.mode?;
    Some(match mode {
        FunctionCallingMode::Auto => ToolChoiceOption::Mode(ToolChoiceMode::Auto),
        FunctionCallingMode::None => ToolChoiceOption::Mode(ToolChoiceMode::None),
        FunctionCallingMode::Any => {
            let mut names = calling.allowed_function_names.unwrap_or_default();
            if names.len() == 1 {
                ToolChoiceOption::Named(NamedToolChoice {
                    r#type: NamedToolChoiceType::Function,
                    function: NamedFunction {
                        name: names.remove(0),
                    },
                })
            } else {
                ToolChoiceOption::Mode(ToolChoiceMode::Required)
            }
        }
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
    use trigate_protocol::gemini::generate_content::{
        FunctionCall as GeminiFunctionCall, FunctionCallingConfig, FunctionResponse,
        GenerationConfig,
    };

    fn user_text(text: &str) -> Content {
        Content {
            role: Some(ContentRole::User),
            parts: vec![Part::Text {
                text: text.to_string(),
            }],
        }
    }

    #[test]
    fn system_instruction_leads_and_generation_config_maps() {
        let body = GenerateContentRequestBody {
            contents: vec![user_text("hi")],
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::Text {
                    text: "be brief".to_string(),
                }],
            }),
            generation_config: Some(GenerationConfig {
                temperature: Some(0.2),
                top_p: None,
                max_output_tokens: Some(512),
                stop_sequences: Some(vec!["END".to_string()]),
            }),
            ..Default::default()
        };
        let out = transform_request("gemini-2.5-pro", body, false);
        assert_eq!(out.model, "glm-4.6");
        assert!(matches!(&out.messages[0], ChatMessage::System(system) if system.content == "be brief"));
        assert_eq!(out.temperature, Some(0.2));
        assert_eq!(out.max_tokens, Some(512));
        assert_eq!(out.stop, Some(StopConfiguration::Single("END".to_string())));
        assert_eq!(out.stream, None);
    }

    #[test]
    fn function_call_and_response_share_an_id() {
        let body = GenerateContentRequestBody {
            contents: vec![
                user_text("weather?"),
                Content {
                    role: Some(ContentRole::Model),
                    parts: vec![Part::FunctionCall {
                        function_call: GeminiFunctionCall {
                            name: "get_weather".to_string(),
                            args: Some(serde_json::json!({"city": "Berlin"})),
                        },
                    }],
                },
                Content {
                    role: Some(ContentRole::User),
                    parts: vec![Part::FunctionResponse {
                        function_response: FunctionResponse {
                            name: "get_weather".to_string(),
                            response: serde_json::json!({"temp": 21}),
                        },
                    }],
                },
            ],
            ..Default::default()
        };
        let out = transform_request("gemini-2.5-pro", body, false);
        let call_id = match &out.messages[1] {
            ChatMessage::Assistant(assistant) => {
                let calls = assistant.tool_calls.as_ref().unwrap();
                let ToolCall::Function { id, function } = &calls[0];
                assert_eq!(function.name, "get_weather");
                id.clone()
            }
            other => panic!("expected assistant, got {other:?}"),
        };
        match &out.messages[2] {
            ChatMessage::Tool(tool) => assert_eq!(tool.tool_call_id, call_id),
            other => panic!("expected tool message, got {other:?}"),
        }
    }

    #[test]
    fn any_mode_with_single_allowed_name_pins_the_tool() {
        let body = GenerateContentRequestBody {
            contents: vec![user_text("go")],
            tool_config: Some(ToolConfig {
                function_calling_config: Some(FunctionCallingConfig {
                    mode: Some(FunctionCallingMode::Any),
                    allowed_function_names: Some(vec!["only_one".to_string()]),
                }),
            }),
            ..Default::default()
        };
        let out = transform_request("gemini-2.5-pro", body, false);
        match out.tool_choice {
            Some(ToolChoiceOption::Named(named)) => assert_eq!(named.function.name, "only_one"),
            other => panic!("expected named choice, got {other:?}"),
        }
    }

    #[test]
    fn streaming_requests_ask_for_usage() {
        let body = GenerateContentRequestBody {
            contents: vec![user_text("hi")],
            ..Default::default()
        };
        let out = transform_request("gemini-2.5-flash", body, true);
        assert_eq!(out.stream, Some(true));
        assert_eq!(
            out.stream_options,
            Some(StreamOptions {
                include_usage: Some(true)
            })
        );
    }

    #[test]
    fn inline_data_becomes_data_url_part() {
        let body = GenerateContentRequestBody {
            contents: vec![Content {
                role: Some(ContentRole::User),
                parts: vec![
                    Part::Text {
                        text: "see".to_string(),
                    },
                    Part::InlineData {
                        inline_data: trigate_protocol::gemini::generate_content::Blob {
                            mime_type: "image/png".to_string(),
                            data: "AAAA".to_string(),
                        },
                    },
                ],
            }],
            ..Default::default()
        };
        let out = transform_request("gemini-2.5-pro", body, false);
        match &out.messages[0] {
            ChatMessage::User(user) => match &user.content {
                UserContent::Parts(parts) => match &parts[1] {
                    ContentPart::ImageUrl { image_url } => {
                        assert_eq!(image_url.url, "data:image/png;base64,AAAA")
                    }
                    other => panic!("expected image part, got {other:?}"),
                },
                other => panic!("expected parts, got {other:?}"),
            },
            other => panic!("expected user message, got {other:?}"),
        }
    }
}
