pub mod claude;
pub mod count_tokens;
pub mod gemini;
pub mod model_map;
