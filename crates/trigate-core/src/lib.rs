mod client;
mod engine;

pub use client::{BackendClient, BackendClientConfig, BackendResponse, UpstreamFailure};
pub use engine::{ChatReply, GatewayEngine, ReplyBody};
