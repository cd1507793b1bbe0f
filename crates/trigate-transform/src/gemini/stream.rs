//! Stateful chunk re-framer for streamGenerateContent.
//!
//! Text deltas pass through as incremental candidate chunks. Tool-call
//! argument fragments are buffered until the stream ends, because a
//! Gemini functionCall part carries a complete args object; the closing
//! chunk then carries the assembled calls, the finish reason, and usage.

use std::collections::BTreeMap;

use trigate_protocol::gemini::generate_content::{
    Candidate, Content, ContentRole, FunctionCall as GeminiFunctionCall, GeminiFinishReason,
    GenerateContentResponse, Part, UsageMetadata,
};
use trigate_protocol::openai::chat::{ChatCompletionChunk, ToolCallChunk};

use crate::claude::response::parse_arguments;
use super::response::{map_finish_reason, map_usage};

#[derive(Debug, Default)]
struct ToolFragments {
    name: String,
    arguments: String,
}

pub struct GeminiStreamState {
    model: String,
    tool_fragments: BTreeMap<i64, ToolFragments>,
    pending_finish: Option<GeminiFinishReason>,
    last_usage: Option<UsageMetadata>,
    finished: bool,
}

impl GeminiStreamState {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            tool_fragments: BTreeMap::new(),
            pending_finish: None,
            last_usage: None,
            finished: false,
        }
    }

    pub fn transform_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<GenerateContentResponse> {
        if self.finished {
            return Vec::new();
        }
        let mut out = Vec::new();

        if let Some(usage) = chunk.usage.as_ref() {
            self.last_usage = Some(map_usage(usage));
        }

        if let Some(choice) = chunk.choices.into_iter().next() {
            let mut texts: Vec<String> = Vec::new();
            if let Some(text) = choice.delta.reasoning_content
                && !text.is_empty()
            {
                texts.push(text);
            }
            if let Some(text) = choice.delta.content
                && !text.is_empty()
            {
                texts.push(text);
            }
            if !texts.is_empty() {
                out.push(self.text_chunk(texts.join("")));
            }

            for call in choice.delta.tool_calls.unwrap_or_default() {
                self.buffer_tool_fragment(call);
            }

            if let Some(reason) = choice.finish_reason {
                self.pending_finish = Some(map_finish_reason(reason));
            }
        }

        if self.pending_finish.is_some() && self.last_usage.is_some() {
            out.push(self.closing_chunk());
        }
        out
    }

    /// Emits the closing chunk if the upstream ended early. Idempotent.
    pub fn finish(&mut self) -> Vec<GenerateContentResponse> {
        if self.finished {
            return Vec::new();
        }
        vec![self.closing_chunk()]
    }

    fn text_chunk(&self, text: String) -> GenerateContentResponse {
        GenerateContentResponse {
            candidates: vec![Candidate {
                content: Content {
                    role: Some(ContentRole::Model),
                    parts: vec![Part::Text { text }],
                },
                finish_reason: None,
                index: Some(0),
            }],
            usage_metadata: None,
            model_version: Some(self.model.clone()),
        }
    }

    fn closing_chunk(&mut self) -> GenerateContentResponse {
        self.finished = true;
        let parts = std::mem::take(&mut self.tool_fragments)
            .into_values()
            .map(|fragments| Part::FunctionCall {
                function_call: GeminiFunctionCall {
                    name: fragments.name,
                    args: Some(parse_arguments(&fragments.arguments)),
                },
            })
            .collect();
        GenerateContentResponse {
            candidates: vec![Candidate {
                content: Content {
                    role: Some(ContentRole::Model),
                    parts,
                },
                finish_reason: Some(self.pending_finish.take().unwrap_or(GeminiFinishReason::Stop)),
                index: Some(0),
            }],
            usage_metadata: self.last_usage.take(),
            model_version: Some(self.model.clone()),
        }
    }

    fn buffer_tool_fragment(&mut self, call: ToolCallChunk) {
        let entry = self.tool_fragments.entry(call.index).or_default();
        if let Some(function) = call.function {
            if let Some(name) = function.name
                && !name.is_empty()
            {
                entry.name = name;
            }
            if let Some(arguments) = function.arguments {
                entry.arguments.push_str(&arguments);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trigate_protocol::openai::chat::{
        ChunkChoice, ChunkDelta, CompletionUsage, FinishReason, FunctionCallDelta,
        PromptTokensDetails,
    };

    fn chunk(delta: ChunkDelta, finish: Option<FinishReason>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "chatcmpl-3".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 1_700_000_000,
            model: "glm-4.6".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish,
            }],
            usage: None,
        }
    }

    fn usage_chunk() -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "chatcmpl-3".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 1_700_000_000,
            model: "glm-4.6".to_string(),
            choices: Vec::new(),
            usage: Some(CompletionUsage {
                prompt_tokens: 8,
                completion_tokens: 4,
                total_tokens: 12,
                prompt_tokens_details: None,
            }),
        }
    }

    #[test]
    fn text_deltas_pass_through_incrementally() {
        let mut state = GeminiStreamState::new("gemini-2.5-pro");
        let out = state.transform_chunk(chunk(
            ChunkDelta {
                content: Some("hel".to_string()),
                ..Default::default()
            },
            None,
        ));
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].candidates[0].content.parts[0],
            Part::Text {
                text: "hel".to_string()
            }
        );
        assert_eq!(out[0].candidates[0].finish_reason, None);
        assert_eq!(out[0].model_version.as_deref(), Some("gemini-2.5-pro"));
    }

    #[test]
    fn tool_fragments_assemble_into_closing_chunk() {
        let mut state = GeminiStreamState::new("gemini-2.5-pro");
        state.transform_chunk(chunk(
            ChunkDelta {
                tool_calls: Some(vec![ToolCallChunk {
                    index: 0,
                    id: Some("call_a".to_string()),
                    function: Some(FunctionCallDelta {
                        name: Some("lookup".to_string()),
                        arguments: Some("{\"q\":".to_string()),
                    }),
                }]),
                ..Default::default()
            },
            None,
        ));
        state.transform_chunk(chunk(
            ChunkDelta {
                tool_calls: Some(vec![ToolCallChunk {
                    index: 0,
                    id: None,
                    function: Some(FunctionCallDelta {
                        name: None,
                        arguments: Some("\"x\"}".to_string()),
                    }),
                }]),
                ..Default::default()
            },
            Some(FinishReason::ToolCalls),
        ));
        let out = state.transform_chunk(usage_chunk());
        assert_eq!(out.len(), 1);
        let candidate = &out[0].candidates[0];
        assert_eq!(candidate.finish_reason, Some(GeminiFinishReason::Stop));
        match &candidate.content.parts[0] {
            Part::FunctionCall { function_call } => {
                assert_eq!(function_call.name, "lookup");
                assert_eq!(function_call.args.as_ref().unwrap()["q"], "x");
            }
            other => panic!("expected functionCall, got {other:?}"),
        }
        assert_eq!(out[0].usage_metadata.as_ref().unwrap().total_token_count, 12);
    }

    #[test]
    fn cached_tokens_are_subtracted_from_streamed_usage() {
        let mut state = GeminiStreamState::new("gemini-2.5-pro");
        let mut closing = usage_chunk();
        closing.usage = Some(CompletionUsage {
            prompt_tokens: 50,
            completion_tokens: 10,
            total_tokens: 60,
            prompt_tokens_details: Some(PromptTokensDetails {
                cached_tokens: Some(40),
            }),
        });
        closing.choices = vec![ChunkChoice {
            index: 0,
            delta: ChunkDelta::default(),
            finish_reason: Some(FinishReason::Stop),
        }];
        let out = state.transform_chunk(closing);
        let usage = out[0].usage_metadata.as_ref().unwrap();
        assert_eq!(usage.prompt_token_count, 10);
        assert_eq!(usage.cached_content_token_count, Some(40));
    }

    #[test]
    fn early_end_emits_closing_chunk_once() {
        let mut state = GeminiStreamState::new("gemini-2.5-flash");
        state.transform_chunk(chunk(
            ChunkDelta {
                content: Some("partial".to_string()),
                ..Default::default()
            },
            None,
        ));
        let out = state.finish();
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].candidates[0].finish_reason,
            Some(GeminiFinishReason::Stop)
        );
        assert!(state.finish().is_empty());
    }

    #[test]
    fn finish_and_usage_in_same_chunk_close_immediately() {
        let mut state = GeminiStreamState::new("gemini-2.5-pro");
        let mut closing = ChatCompletionChunk {
            usage: Some(CompletionUsage {
                prompt_tokens: 8,
                completion_tokens: 4,
                total_tokens: 12,
                prompt_tokens_details: None,
            }),
            ..chunk(
                ChunkDelta {
                    content: Some("done".to_string()),
                    ..Default::default()
                },
                Some(FinishReason::Stop),
            )
        };
        closing.choices[0].finish_reason = Some(FinishReason::Stop);
        let out = state.transform_chunk(closing);
        // One text chunk, then the terminal chunk.
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[1].candidates[0].finish_reason,
            Some(GeminiFinishReason::Stop)
        );
    }
}
