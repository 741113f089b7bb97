use anyhow::{Context, Result};
use dispatch::DispatchConfig;
use rig::providers::openai;
use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_LLM_URL: &str = "http://localhost:8080/v1";
const DEFAULT_LLM_MODEL: &str = "qwen2.5-14b-instruct";

/// OpenAI-compatible inference endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub model: String,
    /// Local servers ignore the key; hosted ones require it.
    pub api_key: String,
}

/// Application configuration.
///
/// The endpoint comes from `SWITCHBOARD_LLM_*` variables; engine settings
/// come from the optional `SWITCHBOARD_CONFIG` TOML file with `DISPATCH_*`
/// overrides layered on top.
#[derive(Debug, Clone)]
pub struct SwitchboardConfig {
    pub llm: Endpoint,
    pub config_path: Option<PathBuf>,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

impl SwitchboardConfig {
    /// Build from any variable source; unset variables take the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            llm: Endpoint {
                url: var("SWITCHBOARD_LLM_URL")
                    .unwrap_or_else(|| DEFAULT_LLM_URL.into())
                    .trim_end_matches('/')
                    .to_string(),
                model: var("SWITCHBOARD_LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.into()),
                api_key: var("SWITCHBOARD_LLM_API_KEY").unwrap_or_else(|| "not-needed".into()),
            },
            config_path: var("SWITCHBOARD_CONFIG").map(PathBuf::from),
        }
    }

    /// Engine configuration: file (when configured) or defaults, then
    /// environment overrides, then validation.
    pub fn dispatch_config(&self) -> Result<DispatchConfig> {
        self.dispatch_config_with(|name| std::env::var(name).ok())
    }

    pub fn dispatch_config_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<DispatchConfig> {
        let mut config = match &self.config_path {
            Some(path) => DispatchConfig::load(path)
                .with_context(|| format!("Failed to load engine config {}", path.display()))?,
            None => DispatchConfig::default(),
        };
        config.apply_overrides(lookup);
        config.validate().context("Invalid engine configuration")?;
        Ok(config)
    }

    /// Client for the configured inference endpoint.
    pub fn build_client(&self) -> Result<openai::CompletionsClient> {
        openai::CompletionsClient::builder()
            .api_key(&self.llm.api_key)
            .base_url(&self.llm.url)
            .build()
            .with_context(|| format!("Failed to build LLM client for {}", self.llm.url))
    }
}

/// GET the endpoint's model listing; the error says why it is unusable.
pub async fn check_endpoint(url: &str) -> Result<()> {
    let models_url = format!("{url}/models");
    let resp = reqwest::Client::new()
        .get(&models_url)
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await
        .with_context(|| format!("LLM endpoint {url} is not reachable"))?;
    let status = resp.status();
    if !status.is_success() {
        anyhow::bail!("LLM endpoint {url} answered {status} for GET /models");
    }
    Ok(())
}
