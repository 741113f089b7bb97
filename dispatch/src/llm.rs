//! Language model capability consumed by the classifier and the router.
//!
//! The engine never cares how text is produced; concrete backends live in the
//! application crate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DispatchResult;

/// Text generation backend.
///
/// Implementations should map transport failures to `Network` and deadline
/// overruns to `Timeout` so the retry policy can tell them apart.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        timeout: Option<Duration>,
    ) -> DispatchResult<String>;
}

pub type SharedLanguageModel = Arc<dyn LanguageModel>;

/// Pull the first balanced JSON object out of free-form model output.
///
/// Models wrap JSON in prose or code fences; this finds the first `{` and
/// its matching `}` while respecting string literals. Returns `None` when no
/// balanced object exists.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json() {
        let text = "Sure!\n```json\n{\"a\": {\"b\": 1}, \"c\": \"}\"}\n```\nDone.";
        assert_eq!(
            extract_json_object(text),
            Some("{\"a\": {\"b\": 1}, \"c\": \"}\"}")
        );
    }

    #[test]
    fn unbalanced_returns_none() {
        assert_eq!(extract_json_object("{\"a\": 1"), None);
        assert_eq!(extract_json_object("no json here"), None);
    }
}
