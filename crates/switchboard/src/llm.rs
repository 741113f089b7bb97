//! `dispatch::LanguageModel` backed by an OpenAI-compatible endpoint via rig.

use std::time::Duration;

use async_trait::async_trait;
use dispatch::{DispatchError, DispatchResult, ErrorKind, LanguageModel};
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use tracing::debug;

/// One-shot completions against a single model.
///
/// Each call builds a fresh rig agent with the caller's system prompt, so the
/// classifier, the router and every specialist can share one client.
pub struct RigLanguageModel {
    client: openai::CompletionsClient,
    model: String,
}

impl RigLanguageModel {
    pub fn new(client: openai::CompletionsClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LanguageModel for RigLanguageModel {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        timeout: Option<Duration>,
    ) -> DispatchResult<String> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(system_prompt)
            .temperature(f64::from(temperature))
            .build();

        let call = agent.prompt(user_prompt);
        let reply = match timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| DispatchError::timeout(limit))?,
            None => call.await,
        };
        let text = reply.map_err(|e| classify_prompt_error(&e.to_string()))?;
        debug!(model = %self.model, chars = text.len(), "Completion received");
        Ok(text)
    }
}

/// Map a rig prompt failure onto the engine's error taxonomy.
///
/// Transport trouble is retryable `Network`, throttling is `RateLimit`,
/// auth failures are `Permission`, undecodable replies are `Parsing`.
pub fn classify_prompt_error(message: &str) -> DispatchError {
    let lower = message.to_ascii_lowercase();
    if message.contains("429")
        || lower.contains("rate limit")
        || lower.contains("too many requests")
    {
        DispatchError::rate_limit(message)
    } else if message.contains("401")
        || message.contains("403")
        || lower.contains("unauthorized")
    {
        DispatchError::permission(message)
    } else if lower.contains("timed out") || lower.contains("timeout") {
        DispatchError::new(ErrorKind::Timeout, message)
    } else if lower.contains("jsonerror") || lower.contains("deserializ") {
        DispatchError::parsing(message)
    } else if message.contains("502")
        || message.contains("503")
        || lower.contains("connection")
        || lower.contains("error sending request")
        || lower.contains("broken pipe")
        || lower.contains("reset by peer")
    {
        DispatchError::network(message)
    } else {
        DispatchError::unknown(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_transport_errors_are_network() {
        for msg in [
            "HttpError: error sending request for url",
            "ProviderError: 503 Service Unavailable",
            "connection reset by peer",
        ] {
            let err = classify_prompt_error(msg);
            assert_eq!(err.kind(), ErrorKind::Network, "{msg}");
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn test_throttling_and_auth() {
        assert_eq!(
            classify_prompt_error("ProviderError: 429 Too Many Requests").kind(),
            ErrorKind::RateLimit
        );
        let auth = classify_prompt_error("ProviderError: 401 Unauthorized");
        assert_eq!(auth.kind(), ErrorKind::Permission);
        assert!(!auth.is_retryable());
    }

    #[test]
    fn test_decode_and_unknown() {
        assert_eq!(
            classify_prompt_error("JsonError: expected value at line 1").kind(),
            ErrorKind::Parsing
        );
        assert_eq!(
            classify_prompt_error("operation timed out").kind(),
            ErrorKind::Timeout
        );
        assert_eq!(classify_prompt_error("something odd").kind(), ErrorKind::Unknown);
    }
}
