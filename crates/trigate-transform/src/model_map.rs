//! Dialect model aliases. Clients send the model names their SDKs know;
//! the upstream backend only understands its own identifiers.

/// Exact-prefix alias table. The most specific (longest) matching alias
/// wins; unrecognized names pass through unchanged.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("claude-3-5-haiku", "glm-4.5-air"),
    ("claude-haiku-4-5", "glm-4.5-air"),
    ("claude-sonnet-4-5", "glm-4.6"),
    ("claude-sonnet-4", "glm-4.5"),
    ("claude-opus-4-1", "glm-4.6"),
    ("claude-opus-4", "glm-4.6"),
    ("gemini-1.5-pro", "glm-4.5"),
    ("gemini-2.5-flash-lite", "glm-4.5-air"),
    ("gemini-2.5-flash", "glm-4.5-air"),
    ("gemini-2.5-pro", "glm-4.6"),
];

pub fn normalize_model(name: &str) -> String {
    let mut best: Option<(&str, &str)> = None;
    for (alias, target) in MODEL_ALIASES {
        if !name.starts_with(alias) {
            continue;
        }
        let better = match best {
            Some((current, _)) => alias.len() > current.len(),
            None => true,
        };
        if better {
            best = Some((alias, target));
        }
    }
    match best {
        Some((_, target)) => target.to_string(),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_alias_wins() {
        // "claude-sonnet-4-5" and "claude-sonnet-4" both prefix-match here.
        assert_eq!(normalize_model("claude-sonnet-4-5-20250929"), "glm-4.6");
        assert_eq!(normalize_model("claude-sonnet-4-20250514"), "glm-4.5");
        assert_eq!(normalize_model("gemini-2.5-flash-lite-001"), "glm-4.5-air");
    }

    #[test]
    fn unrecognized_passes_through() {
        assert_eq!(normalize_model("glm-4.6"), "glm-4.6");
        assert_eq!(normalize_model("my-finetune"), "my-finetune");
    }
}
