pub mod count_tokens;
pub mod generate_content;
