use crate::error::{GatewayError, Result};
use crate::provider::ProviderKind;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Top-level config file: a default model plus one entry per upstream
/// provider/model pairing.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default model (optional)
    pub default_model: Option<String>,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// Immutable description of one upstream model. Loaded once at startup;
/// there is no mutation API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique lookup key (what callers put in `ChatRequest.model`).
    pub name: String,

    pub kind: ProviderKind,

    /// Full endpoint URL for the chat/generation call.
    pub endpoint: String,

    /// Name of the environment variable holding the API key. The key
    /// itself never appears in config.
    pub api_key_env: String,

    /// Upstream model identifier sent in the request body.
    pub model: String,

    #[serde(default)]
    pub system_prompt: String,

    #[serde(default)]
    pub temperature: Option<f64>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub flags: ProviderFlags,

    /// Provider-side prompt template id (DashScope prompt mode).
    #[serde(default)]
    pub prompt_template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderFlags {
    #[serde(default)]
    pub enable_search: bool,

    /// Ask the provider to stream. Governs which decode path is used.
    #[serde(default = "default_true")]
    pub stream: bool,

    /// Whether streamed chunks carry only new text. When false the
    /// provider repeats all text so far and the normalizer has to diff.
    #[serde(default = "default_true")]
    pub incremental_output: bool,

    #[serde(default)]
    pub enable_image_upload: bool,

    /// Route through the DashScope prompt endpoint regardless of kind.
    #[serde(default)]
    pub uses_prompt_endpoint: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ProviderFlags {
    fn default() -> Self {
        Self {
            enable_search: false,
            stream: true,
            incremental_output: true,
            enable_image_upload: false,
            uses_prompt_endpoint: false,
        }
    }
}

impl Config {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }
}

/// Process-lifetime model-name -> provider-config lookup. Built once,
/// read-only thereafter.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<ProviderConfig>>,
}

impl ModelRegistry {
    pub fn new(providers: impl IntoIterator<Item = ProviderConfig>) -> Self {
        let models = providers
            .into_iter()
            .map(|p| (p.name.clone(), Arc::new(p)))
            .collect();
        Self { models }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.providers.iter().cloned())
    }

    /// Lookup failure is a hard error for the request, not recoverable.
    pub fn lookup(&self, name: &str) -> Result<Arc<ProviderConfig>> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::NotConfigured(name.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            kind: ProviderKind::OpenAiCompatible,
            endpoint: "https://api.example.com/v1/chat/completions".to_string(),
            api_key_env: "EXAMPLE_API_KEY".to_string(),
            model: "example-1".to_string(),
            system_prompt: String::new(),
            temperature: None,
            max_tokens: None,
            flags: ProviderFlags::default(),
            prompt_template: None,
        }
    }

    #[test]
    fn lookup_unknown_model_is_not_configured() {
        let reg = ModelRegistry::new([sample("gpt")]);
        let err = reg.lookup("missing").unwrap_err();
        assert!(matches!(err, GatewayError::NotConfigured(name) if name == "missing"));
    }

    #[test]
    fn parses_provider_table() {
        let toml = r#"
            default_model = "qwen"

            [[providers]]
            name = "qwen"
            kind = "dashscope-prompt"
            endpoint = "https://dashscope.aliyuncs.com/api/v1/apps/completion"
            api_key_env = "DASHSCOPE_API_KEY"
            model = "qwen-max"

            [providers.flags]
            stream = true
            incremental_output = false
            uses_prompt_endpoint = true
        "#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.default_model.as_deref(), Some("qwen"));
        let p = &cfg.providers[0];
        assert_eq!(p.kind, ProviderKind::DashScopePrompt);
        assert!(p.flags.uses_prompt_endpoint);
        assert!(!p.flags.incremental_output);
        // Unspecified flags keep their defaults.
        assert!(!p.flags.enable_image_upload);
    }
}
