//! Stateful chunk re-framer: canonical streaming chunks in, Anthropic
//! stream events out.
//!
//! The output framing keeps at most one content block open at a time.
//! Starting any block first closes the one before it, so every
//! content_block_start is paired with a content_block_stop and indices
//! only ever grow.

use std::collections::BTreeMap;

use trigate_protocol::claude::response::{MessageType, MessagesUsage, ResponseRole, StopReason};
use trigate_protocol::claude::stream::{
    ContentBlockDelta, MessageDeltaBody, StreamContentBlock, StreamEvent, StreamMessageStart,
};
use trigate_protocol::openai::chat::{ChatCompletionChunk, ToolCallChunk};

use super::response::{map_stop_reason, map_usage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text { index: u32 },
    Tool { provider_index: i64, index: u32 },
}

#[derive(Debug, Clone)]
struct ToolBlockInfo {
    block_index: u32,
}

pub struct ClaudeStreamState {
    model: String,
    message_started: bool,
    finished: bool,
    next_block_index: u32,
    open: Option<OpenBlock>,
    tool_blocks: BTreeMap<i64, ToolBlockInfo>,
    next_synthetic_id: u32,
    pending_finish: Option<StopReason>,
    last_usage: Option<MessagesUsage>,
}

impl ClaudeStreamState {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            message_started: false,
            finished: false,
            next_block_index: 0,
            open: None,
            tool_blocks: BTreeMap::new(),
            next_synthetic_id: 0,
            pending_finish: None,
            last_usage: None,
        }
    }

    pub fn transform_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut events = Vec::new();

        if !self.message_started {
            self.message_started = true;
            events.push(StreamEvent::MessageStart {
                message: StreamMessageStart {
                    id: chunk.id.clone(),
                    r#type: MessageType::Message,
                    role: ResponseRole::Assistant,
                    model: self.model.clone(),
                    content: Vec::new(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: MessagesUsage::default(),
                },
            });
            events.push(StreamEvent::Ping);
        }

        if let Some(usage) = chunk.usage.as_ref() {
            self.last_usage = Some(map_usage(Some(usage)));
        }

        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(text) = choice.delta.reasoning_content
                && !text.is_empty()
            {
                self.text_delta(&mut events, text);
            }
            if let Some(text) = choice.delta.content
                && !text.is_empty()
            {
                self.text_delta(&mut events, text);
            }
            for call in choice.delta.tool_calls.unwrap_or_default() {
                self.tool_delta(&mut events, call);
            }
            if let Some(reason) = choice.finish_reason {
                // Usage often trails the finish chunk; hold the stop
                // reason until it shows up or the stream ends.
                self.pending_finish = Some(map_stop_reason(reason));
            }
        }

        if self.pending_finish.is_some() && self.last_usage.is_some() {
            self.flush_finish(&mut events);
        }
        events
    }

    /// Terminates the event stream if the upstream ended without a usage
    /// chunk. Idempotent.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished || !self.message_started {
            self.finished = true;
            return events;
        }
        self.flush_finish(&mut events);
        events
    }

    fn flush_finish(&mut self, events: &mut Vec<StreamEvent>) {
        self.close_open(events);
        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(self.pending_finish.take().unwrap_or(StopReason::EndTurn)),
                stop_sequence: None,
            },
            usage: self.last_usage.take().unwrap_or_default(),
        });
        events.push(StreamEvent::MessageStop);
        self.finished = true;
    }

    fn text_delta(&mut self, events: &mut Vec<StreamEvent>, text: String) {
        let index = match self.open {
            Some(OpenBlock::Text { index }) => index,
            _ => {
                self.close_open(events);
                let index = self.alloc_index();
                self.open = Some(OpenBlock::Text { index });
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: StreamContentBlock::Text {
                        text: String::new(),
                    },
                });
                index
            }
        };
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: ContentBlockDelta::TextDelta { text },
        });
    }

    fn tool_delta(&mut self, events: &mut Vec<StreamEvent>, call: ToolCallChunk) {
        let arguments = call
            .function
            .as_ref()
            .and_then(|function| function.arguments.clone());

        let index = match self.tool_blocks.get(&call.index) {
            Some(info) => {
                // A fragment for a block that was already closed is still
                // attributed to its original index; clients tolerate
                // trailing deltas but not a duplicate start.
                info.block_index
            }
            None => {
                self.close_open(events);
                let index = self.alloc_index();
                let id = match call.id.filter(|id| !id.is_empty()) {
                    Some(id) => id,
                    None => {
                        let id = format!("call_{:04}", self.next_synthetic_id);
                        self.next_synthetic_id += 1;
                        id
                    }
                };
                let name = call
                    .function
                    .as_ref()
                    .and_then(|function| function.name.clone())
                    .unwrap_or_default();
                self.tool_blocks
                    .insert(call.index, ToolBlockInfo { block_index: index });
                self.open = Some(OpenBlock::Tool {
                    provider_index: call.index,
                    index,
                });
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: StreamContentBlock::ToolUse {
                        id,
                        name,
                        input: serde_json::Value::Object(serde_json::Map::new()),
                    },
                });
                index
            }
        };

        if let Some(partial_json) = arguments
            && !partial_json.is_empty()
        {
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentBlockDelta::InputJsonDelta { partial_json },
            });
        }
    }

    fn close_open(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(open) = self.open.take() {
            let index = match open {
                OpenBlock::Text { index } => index,
                OpenBlock::Tool { index, .. } => index,
            };
            events.push(StreamEvent::ContentBlockStop { index });
        }
    }

    fn alloc_index(&mut self) -> u32 {
        let index = self.next_block_index;
        self.next_block_index += 1;
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trigate_protocol::openai::chat::{
        ChunkChoice, ChunkDelta, CompletionUsage, FinishReason, FunctionCallDelta,
    };

    fn chunk(delta: ChunkDelta, finish: Option<FinishReason>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "chatcmpl-1".to_string(),
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

    fn text_chunk(text: &str) -> ChatCompletionChunk {
        chunk(
            ChunkDelta {
                content: Some(text.to_string()),
                ..Default::default()
            },
            None,
        )
    }

    fn tool_chunk(
        index: i64,
        id: Option<&str>,
        name: Option<&str>,
        args: Option<&str>,
    ) -> ChatCompletionChunk {
        chunk(
            ChunkDelta {
                tool_calls: Some(vec![ToolCallChunk {
                    index,
                    id: id.map(str::to_string),
                    function: Some(FunctionCallDelta {
                        name: name.map(str::to_string),
                        arguments: args.map(str::to_string),
                    }),
                }]),
                ..Default::default()
            },
            None,
        )
    }

    fn usage_chunk() -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "chatcmpl-1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 1_700_000_000,
            model: "glm-4.6".to_string(),
            choices: Vec::new(),
            usage: Some(CompletionUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
                prompt_tokens_details: None,
            }),
        }
    }

    fn names(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(StreamEvent::event_name).collect()
    }

    #[test]
    fn first_chunk_opens_message_and_text_block() {
        let mut state = ClaudeStreamState::new("claude-sonnet-4-5");
        let events = state.transform_chunk(text_chunk("hello"));
        assert_eq!(
            names(&events),
            vec![
                "message_start",
                "ping",
                "content_block_start",
                "content_block_delta"
            ]
        );
        match &events[0] {
            StreamEvent::MessageStart { message } => {
                assert_eq!(message.model, "claude-sonnet-4-5");
                assert!(message.content.is_empty());
            }
            other => panic!("expected message_start, got {other:?}"),
        }
    }

    #[test]
    fn tool_start_closes_open_text_block() {
        let mut state = ClaudeStreamState::new("m");
        state.transform_chunk(text_chunk("hi"));
        let events = state.transform_chunk(tool_chunk(
            0,
            Some("call_a"),
            Some("lookup"),
            Some("{\"q\":"),
        ));
        assert_eq!(
            names(&events),
            vec![
                "content_block_stop",
                "content_block_start",
                "content_block_delta"
            ]
        );
        match &events[0] {
            StreamEvent::ContentBlockStop { index } => assert_eq!(*index, 0),
            other => panic!("expected stop, got {other:?}"),
        }
        match &events[1] {
            StreamEvent::ContentBlockStart {
                index,
                content_block: StreamContentBlock::ToolUse { id, name, .. },
            } => {
                assert_eq!(*index, 1);
                assert_eq!(id, "call_a");
                assert_eq!(name, "lookup");
            }
            other => panic!("expected tool_use start, got {other:?}"),
        }
    }

    #[test]
    fn tool_fragments_continue_without_second_start() {
        let mut state = ClaudeStreamState::new("m");
        state.transform_chunk(tool_chunk(0, Some("call_a"), Some("lookup"), None));
        let events = state.transform_chunk(tool_chunk(0, None, None, Some("{\"q\":1}")));
        assert_eq!(names(&events), vec!["content_block_delta"]);
        match &events[0] {
            StreamEvent::ContentBlockDelta {
                index,
                delta: ContentBlockDelta::InputJsonDelta { partial_json },
            } => {
                assert_eq!(*index, 0);
                assert_eq!(partial_json, "{\"q\":1}");
            }
            other => panic!("expected input_json_delta, got {other:?}"),
        }
    }

    #[test]
    fn finish_reason_waits_for_usage() {
        let mut state = ClaudeStreamState::new("m");
        state.transform_chunk(text_chunk("hi"));
        let finish_events =
            state.transform_chunk(chunk(ChunkDelta::default(), Some(FinishReason::Stop)));
        // No usage yet, so nothing terminal is emitted.
        assert!(finish_events.is_empty());

        let events = state.transform_chunk(usage_chunk());
        assert_eq!(
            names(&events),
            vec!["content_block_stop", "message_delta", "message_stop"]
        );
        match &events[1] {
            StreamEvent::MessageDelta { delta, usage } => {
                assert_eq!(delta.stop_reason, Some(StopReason::EndTurn));
                assert_eq!(usage.output_tokens, 5);
            }
            other => panic!("expected message_delta, got {other:?}"),
        }
    }

    #[test]
    fn abrupt_end_still_terminates_the_stream() {
        let mut state = ClaudeStreamState::new("m");
        state.transform_chunk(text_chunk("partial"));
        let events = state.finish();
        assert_eq!(
            names(&events),
            vec!["content_block_stop", "message_delta", "message_stop"]
        );
        assert!(state.finish().is_empty());
    }

    #[test]
    fn second_tool_slot_gets_fresh_index() {
        let mut state = ClaudeStreamState::new("m");
        state.transform_chunk(tool_chunk(0, Some("call_a"), Some("first"), Some("{}")));
        let events = state.transform_chunk(tool_chunk(1, Some("call_b"), Some("second"), None));
        match &events[1] {
            StreamEvent::ContentBlockStart { index, .. } => assert_eq!(*index, 1),
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn tool_calls_finish_maps_to_tool_use() {
        let mut state = ClaudeStreamState::new("m");
        state.transform_chunk(tool_chunk(0, Some("call_a"), Some("f"), Some("{}")));
        state.transform_chunk(chunk(ChunkDelta::default(), Some(FinishReason::ToolCalls)));
        let events = state.transform_chunk(usage_chunk());
        match &events[1] {
            StreamEvent::MessageDelta { delta, .. } => {
                assert_eq!(delta.stop_reason, Some(StopReason::ToolUse));
            }
            other => panic!("expected message_delta, got {other:?}"),
        }
    }
}
