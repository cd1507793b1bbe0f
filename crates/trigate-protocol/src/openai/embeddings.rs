use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Embeddings are forwarded nearly verbatim; only the model name is
/// inspected (for alias rewriting), everything else round-trips untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingsRequestBody {
    pub model: String,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, JsonValue>,
}
