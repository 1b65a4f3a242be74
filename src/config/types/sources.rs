//! Source adapter configuration types
//!
//! Endpoints and credentials for the three retrieval backends.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// All retrieval backends
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Vector index (Qdrant)
    #[serde(default)]
    pub vector: VectorSourceConfig,
    /// Web search
    #[serde(default)]
    pub web: WebSourceConfig,
    /// Knowledge graph service
    #[serde(default)]
    pub graph: GraphSourceConfig,
}

/// Qdrant collection holding the embedded legal corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSourceConfig {
    /// Include in the fallback chain
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Qdrant REST endpoint
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    /// Collection name
    #[serde(default = "default_collection")]
    pub collection: String,
    /// API key for Qdrant Cloud
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,
    /// How many hops of "khoản N Điều này" references to follow
    #[serde(default = "default_reference_depth")]
    pub reference_depth: usize,
    /// Score multiplier applied per reference hop
    #[serde(default = "default_reference_decay")]
    pub reference_decay: f32,
}

impl Default for VectorSourceConfig {
    fn default() -> Self {
        VectorSourceConfig {
            enabled: true,
            url: default_qdrant_url(),
            collection: default_collection(),
            api_key: None,
            reference_depth: default_reference_depth(),
            reference_decay: default_reference_decay(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}

fn default_collection() -> String {
    "traffic_law".to_string()
}

fn default_reference_depth() -> usize {
    2
}

fn default_reference_decay() -> f32 {
    0.9
}

/// Web search provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebProvider {
    /// Tavily search API (API key required)
    #[default]
    Tavily,
    /// DuckDuckGo instant answers (no key)
    DuckDuckGo,
}

/// Live web search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSourceConfig {
    /// Include in the fallback chain
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Provider
    #[serde(default)]
    pub provider: WebProvider,
    /// Provider endpoint
    #[serde(default = "default_tavily_url")]
    pub base_url: String,
    /// Provider API key
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,
    /// Results per query
    #[serde(default = "default_web_max_results")]
    pub max_results: usize,
    /// Query variants sent per search
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
    /// Restrict results to these domains (Tavily only)
    #[serde(default)]
    pub include_domains: Vec<String>,
}

impl Default for WebSourceConfig {
    fn default() -> Self {
        WebSourceConfig {
            enabled: true,
            provider: WebProvider::default(),
            base_url: default_tavily_url(),
            api_key: None,
            max_results: default_web_max_results(),
            max_queries: default_max_queries(),
            include_domains: Vec::new(),
        }
    }
}

fn default_tavily_url() -> String {
    "https://api.tavily.com".to_string()
}

fn default_web_max_results() -> usize {
    3
}

fn default_max_queries() -> usize {
    2
}

/// Knowledge graph retrieval service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSourceConfig {
    /// Include in the fallback chain
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Service endpoint
    #[serde(default = "default_graph_url")]
    pub url: String,
    /// Documents requested per query
    #[serde(default = "default_docs_per_query")]
    pub docs_per_query: usize,
    /// Query variants sent per search
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
}

impl Default for GraphSourceConfig {
    fn default() -> Self {
        GraphSourceConfig {
            enabled: true,
            url: default_graph_url(),
            docs_per_query: default_docs_per_query(),
            max_queries: default_max_queries(),
        }
    }
}

fn default_graph_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_docs_per_query() -> usize {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_default() {
        let config = SourcesConfig::default();
        assert!(config.vector.enabled && config.web.enabled && config.graph.enabled);
        assert_eq!(config.web.provider, WebProvider::Tavily);
        assert!(config.vector.api_key.is_none());
    }

    #[test]
    fn test_web_provider_parse() {
        let config: WebSourceConfig = serde_json::from_str(r#"{"provider": "duckduckgo"}"#).unwrap();
        assert_eq!(config.provider, WebProvider::DuckDuckGo);
    }
}
