//! Configuration types module
//!
//! Re-exports all configuration types.

pub mod provider;
pub mod retrieval;
pub mod sources;
pub mod storage;

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Conversational memory policy
    #[serde(default)]
    pub memory: retrieval::MemoryConfig,

    /// Query transformer settings
    #[serde(default)]
    pub transformer: retrieval::TransformerConfig,

    /// Fallback chain and reranking settings
    #[serde(default)]
    pub retrieval: retrieval::RetrievalConfig,

    /// Semantic cache policy
    #[serde(default)]
    pub cache: retrieval::CacheConfig,

    /// Retrieval backends
    #[serde(default)]
    pub sources: sources::SourcesConfig,

    /// Query classifier
    #[serde(default)]
    pub classifier: retrieval::ClassifierConfig,

    /// Answer generator
    #[serde(default)]
    pub generator: provider::GeneratorConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: storage::StorageConfig,

    /// Embedding model
    #[serde(default)]
    pub embedding: storage::EmbeddingConfig,

    /// Fixed responses for non-substantive and degraded turns
    #[serde(default)]
    pub canned: CannedResponses,

    /// Logging
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from environment variables and files
    ///
    /// It loads configuration from:
    /// 1. Default values
    /// 2. Config file (if present)
    /// 3. Environment variable overrides
    pub fn from_env() -> crate::error::Result<Self> {
        crate::config::load_config()
    }
}

/// Fixed responses that never touch retrieval or generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CannedResponses {
    /// Reply to greetings and small talk
    #[serde(default = "default_greeting")]
    pub greeting: String,
    /// Reply to questions outside traffic law
    #[serde(default = "default_out_of_domain")]
    pub out_of_domain: String,
    /// Reply when retrieval found nothing and generation is unavailable
    #[serde(default = "default_no_sources")]
    pub no_sources: String,
    /// Heading of the citation list used when the generator is unavailable
    #[serde(default = "default_degraded")]
    pub degraded: String,
    /// Appended to every generated legal answer
    #[serde(default = "default_disclaimer")]
    pub disclaimer: String,
}

impl Default for CannedResponses {
    fn default() -> Self {
        CannedResponses {
            greeting: default_greeting(),
            out_of_domain: default_out_of_domain(),
            no_sources: default_no_sources(),
            degraded: default_degraded(),
            disclaimer: default_disclaimer(),
        }
    }
}

fn default_greeting() -> String {
    "Xin chào! Tôi là trợ lý tra cứu luật giao thông đường bộ. Bạn muốn hỏi về quy định nào?".to_string()
}

fn default_out_of_domain() -> String {
    "Xin lỗi, tôi chỉ hỗ trợ các câu hỏi về pháp luật giao thông đường bộ Việt Nam.".to_string()
}

fn default_no_sources() -> String {
    "Không tìm thấy thông tin trong cơ sở dữ liệu về câu hỏi này.".to_string()
}

fn default_degraded() -> String {
    "Hệ thống tạm thời không thể soạn câu trả lời đầy đủ. Các căn cứ pháp lý liên quan:".to_string()
}

fn default_disclaimer() -> String {
    "*Lưu ý: Thông tin chỉ mang tính tham khảo, không thay thế tư vấn pháp lý chính thức.*".to_string()
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info,lexrag=debug".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = json5::from_str(
            r#"{
                // only override what differs
                memory: { window_size: 5 },
                cache: { ttl: "12h" },
            }"#,
        )
        .unwrap();
        assert_eq!(config.memory.window_size, 5);
        assert_eq!(config.cache.ttl, std::time::Duration::from_secs(12 * 3600));
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.log.format, LogFormat::Pretty);
    }
}
