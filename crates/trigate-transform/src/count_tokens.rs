//! Heuristic token estimate: total textual characters divided by 4,
//! rounded up. Both count-tokens endpoints document this approximation;
//! it is not an exact tokenizer.

use trigate_protocol::claude::count_tokens::CountTokensRequestBody as ClaudeCountTokensBody;
use trigate_protocol::claude::messages::{
    ContentBlockParam, MessageContent, SystemParam, ToolResultBlock, ToolResultContent,
};
use trigate_protocol::gemini::count_tokens::CountTokensRequestBody as GeminiCountTokensBody;
use trigate_protocol::gemini::generate_content::{Content, Part};

pub fn estimate_claude(body: &ClaudeCountTokensBody) -> i64 {
    let mut chars = 0usize;

    match &body.system {
        Some(SystemParam::Text(text)) => chars += text.chars().count(),
        Some(SystemParam::Blocks(blocks)) => {
            for block in blocks {
                chars += block.text.chars().count();
            }
        }
        None => {}
    }

    for message in &body.messages {
        match &message.content {
            MessageContent::Text(text) => chars += text.chars().count(),
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    chars += block_chars(block);
                }
            }
        }
    }

    ceil_div_4(chars)
}

pub fn estimate_gemini(body: &GeminiCountTokensBody) -> i64 {
    let mut chars = 0usize;
    if let Some(system) = &body.system_instruction {
        chars += content_chars(system);
    }
    for content in &body.contents {
        chars += content_chars(content);
    }
    ceil_div_4(chars)
}

fn block_chars(block: &ContentBlockParam) -> usize {
    match block {
        ContentBlockParam::Text { text } => text.chars().count(),
        ContentBlockParam::Thinking { thinking, .. } => thinking.chars().count(),
        ContentBlockParam::ToolResult { content, .. } => match content {
            Some(ToolResultContent::Text(text)) => text.chars().count(),
            Some(ToolResultContent::Blocks(blocks)) => blocks
                .iter()
                .map(|block| match block {
                    ToolResultBlock::Text { text } => text.chars().count(),
                    ToolResultBlock::Image { .. } => 0,
                })
                .sum(),
            None => 0,
        },
        // Non-textual blocks do not contribute to the estimate.
        ContentBlockParam::Image { .. } | ContentBlockParam::ToolUse { .. } => 0,
    }
}

fn content_chars(content: &Content) -> usize {
    content
        .parts
        .iter()
        .map(|part| match part {
            Part::Text { text } => text.chars().count(),
            _ => 0,
        })
        .sum()
}

fn ceil_div_4(chars: usize) -> i64 {
    (chars.div_ceil(4)) as i64
}
