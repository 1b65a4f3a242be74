//! Provider configuration types
//!
//! Configuration for the answer generator (any OpenRouter-compatible
//! chat-completions endpoint).

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Answer generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// API key
    #[serde(skip_serializing, default = "default_secret")]
    pub api_key: SecretString,
    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,
    /// Chat-completions base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Site URL for OpenRouter rankings
    pub site_url: Option<String>,
    /// Site name for OpenRouter rankings
    pub site_name: Option<String>,
    /// Per-call timeout
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    /// Retries on retryable failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Completion token cap
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            api_key: default_secret(),
            model: default_model(),
            base_url: default_base_url(),
            site_url: None,
            site_name: None,
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_secret() -> SecretString {
    SecretString::from(String::new())
}

fn default_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_temperature() -> f32 {
    0.2
}
