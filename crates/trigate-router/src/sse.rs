//! SSE response assembly and the per-dialect stream pumps. Each pump
//! owns its translation state for exactly one response; dropping the
//! returned receiver tears the whole chain down.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use trigate_protocol::openai::chat::ChatCompletionChunk;
use trigate_protocol::sse::{encode_frame, SseParser};
use trigate_transform::claude::stream::ClaudeStreamState;
use trigate_transform::gemini::stream::GeminiStreamState;

pub fn sse_response(rx: mpsc::Receiver<Bytes>) -> Response {
    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    let mut resp = Response::new(Body::from_stream(stream));
    *resp.status_mut() = StatusCode::OK;
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    // Hint common reverse proxies to avoid buffering SSE responses.
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    resp
}

/// Raw passthrough for the dialect that is already canonical on the wire.
pub fn openai_sse(rx: mpsc::Receiver<Bytes>) -> Response {
    sse_response(rx)
}

pub fn claude_sse(upstream: mpsc::Receiver<Bytes>, model: String) -> Response {
    let rx = pump(upstream, ClaudePump::new(model));
    sse_response(rx)
}

pub fn gemini_sse(upstream: mpsc::Receiver<Bytes>, model: String) -> Response {
    let rx = pump(upstream, GeminiPump::new(model));
    sse_response(rx)
}

/// One dialect's side of the re-framing loop: canonical chunks in,
/// encoded SSE frames out.
trait DialectPump: Send + 'static {
    fn on_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<Bytes>;
    fn on_end(&mut self) -> Vec<Bytes>;
}

fn pump<P: DialectPump>(mut upstream: mpsc::Receiver<Bytes>, mut dialect: P) -> mpsc::Receiver<Bytes> {
    let (tx, out) = mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        let mut parser = SseParser::new();
        while let Some(bytes) = upstream.recv().await {
            for event in parser.push_bytes(&bytes) {
                if event.data == "[DONE]" {
                    continue;
                }
                let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(&event.data) else {
                    continue;
                };
                for frame in dialect.on_chunk(chunk) {
                    if tx.send(frame).await.is_err() {
                        return;
                    }
                }
            }
        }
        for event in parser.finish() {
            if event.data == "[DONE]" {
                continue;
            }
            if let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(&event.data) {
                for frame in dialect.on_chunk(chunk) {
                    if tx.send(frame).await.is_err() {
                        return;
                    }
                }
            }
        }
        for frame in dialect.on_end() {
            if tx.send(frame).await.is_err() {
                return;
            }
        }
    });
    out
}

struct ClaudePump {
    state: ClaudeStreamState,
}

impl ClaudePump {
    fn new(model: String) -> Self {
        Self {
            state: ClaudeStreamState::new(model),
        }
    }

    fn encode(events: Vec<trigate_protocol::claude::stream::StreamEvent>) -> Vec<Bytes> {
        events
            .into_iter()
            .filter_map(|event| {
                let data = serde_json::to_string(&event).ok()?;
                Some(encode_frame(Some(event.event_name()), &data))
            })
            .collect()
    }
}

impl DialectPump for ClaudePump {
    fn on_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<Bytes> {
        Self::encode(self.state.transform_chunk(chunk))
    }

    fn on_end(&mut self) -> Vec<Bytes> {
        Self::encode(self.state.finish())
    }
}

struct GeminiPump {
    state: GeminiStreamState,
}

impl GeminiPump {
    fn new(model: String) -> Self {
        Self {
            state: GeminiStreamState::new(model),
        }
    }

    fn encode(
        chunks: Vec<trigate_protocol::gemini::generate_content::GenerateContentResponse>,
    ) -> Vec<Bytes> {
        chunks
            .into_iter()
            .filter_map(|chunk| {
                let data = serde_json::to_string(&chunk).ok()?;
                // Gemini frames by data lines alone, no event names.
                Some(encode_frame(None, &data))
            })
            .collect()
    }
}

impl DialectPump for GeminiPump {
    fn on_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<Bytes> {
        Self::encode(self.state.transform_chunk(chunk))
    }

    fn on_end(&mut self) -> Vec<Bytes> {
        Self::encode(self.state.finish())
    }
}

pub fn json_response<T: serde::Serialize>(value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(json: &str) -> Bytes {
        Bytes::from(format!("data: {json}\n\n"))
    }

    async fn drain<P: DialectPump>(frames: Vec<Bytes>, dialect: P) -> Vec<String> {
        let (tx, rx) = mpsc::channel(16);
        for bytes in frames {
            tx.send(bytes).await.unwrap();
        }
        drop(tx);
        let mut out = pump(rx, dialect);
        let mut collected = Vec::new();
        while let Some(bytes) = out.recv().await {
            collected.push(String::from_utf8(bytes.to_vec()).unwrap());
        }
        collected
    }

    #[tokio::test]
    async fn claude_pump_reframes_a_text_stream() {
        let frames = vec![
            frame(
                r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"glm-4.6","choices":[{"index":0,"delta":{"role":"assistant","content":"Hi"}}]}"#,
            ),
            frame(
                r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"glm-4.6","choices":[{"index":0,"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#,
            ),
            frame("[DONE]"),
        ];
        let out = drain(frames, ClaudePump::new("claude-x".to_string())).await;

        assert!(out[0].starts_with("event: message_start\n"));
        assert!(out.iter().any(|f| f.contains("content_block_delta")));
        assert!(out.last().unwrap().starts_with("event: message_stop\n"));
    }

    #[tokio::test]
    async fn gemini_pump_emits_data_only_frames() {
        let frames = vec![frame(
            r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"glm-4.6","choices":[{"index":0,"delta":{"content":"Hi"}}]}"#,
        )];
        let out = drain(frames, GeminiPump::new("gemini-x".to_string())).await;

        assert!(!out.is_empty());
        for f in &out {
            assert!(f.starts_with("data: "));
            assert!(!f.contains("event:"));
        }
    }

    #[tokio::test]
    async fn unparseable_data_lines_are_skipped() {
        let frames = vec![
            frame("not json"),
            frame(
                r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"glm-4.6","choices":[{"index":0,"delta":{"content":"ok"}}]}"#,
            ),
        ];
        let out = drain(frames, GeminiPump::new("gemini-x".to_string())).await;
        assert_eq!(out.iter().filter(|f| f.contains("\"ok\"")).count(), 1);
    }
}
