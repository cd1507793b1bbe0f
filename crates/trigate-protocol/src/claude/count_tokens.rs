use serde::{Deserialize, Serialize};

use super::messages::{MessageParam, SystemParam, Tool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountTokensRequestBody {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemParam>,
    pub messages: Vec<MessageParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountTokensResponse {
    pub input_tokens: i64,
}
