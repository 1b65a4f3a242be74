//! Retrieval pipeline configuration types
//!
//! Every threshold the pipeline uses to decide "sufficient", "similar" or
//! "ambiguous" lives here so deployments can tune them without a rebuild.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Conversational memory policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Short-term window in turns
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Consult other sessions of the same user
    #[serde(default)]
    pub cross_session: bool,
    /// How many earlier sessions to consult
    #[serde(default = "default_cross_session_limit")]
    pub cross_session_limit: usize,
    /// Turns taken from each earlier session
    #[serde(default = "default_cross_session_turns")]
    pub cross_session_turns: usize,
    /// Inactivity after which sessions are archived
    #[serde(with = "humantime_serde", default = "default_archive_after")]
    pub archive_after: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            window_size: default_window_size(),
            cross_session: false,
            cross_session_limit: default_cross_session_limit(),
            cross_session_turns: default_cross_session_turns(),
            archive_after: default_archive_after(),
        }
    }
}

fn default_window_size() -> usize {
    6
}

fn default_cross_session_limit() -> usize {
    3
}

fn default_cross_session_turns() -> usize {
    4
}

fn default_archive_after() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

/// Query transformer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerConfig {
    /// Upper bound on variants per question
    #[serde(default = "default_max_variants")]
    pub max_variants: usize,
    /// Antecedents whose weights differ by less than this are ambiguous
    #[serde(default = "default_ambiguity_margin")]
    pub ambiguity_margin: f32,
    /// Weight multiplier per turn of distance from the question
    #[serde(default = "default_recency_decay")]
    pub recency_decay: f32,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        TransformerConfig {
            max_variants: default_max_variants(),
            ambiguity_margin: default_ambiguity_margin(),
            recency_decay: default_recency_decay(),
        }
    }
}

fn default_max_variants() -> usize {
    4
}

fn default_ambiguity_margin() -> f32 {
    0.15
}

fn default_recency_decay() -> f32 {
    0.6
}

/// Per-source score a passage must exceed for the set to count as sufficient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceThresholds {
    /// Vector index
    #[serde(default = "default_vector_threshold")]
    pub vector: f32,
    /// Web search
    #[serde(default = "default_web_threshold")]
    pub web: f32,
    /// Knowledge graph
    #[serde(default = "default_graph_threshold")]
    pub graph: f32,
}

impl Default for SourceThresholds {
    fn default() -> Self {
        SourceThresholds {
            vector: default_vector_threshold(),
            web: default_web_threshold(),
            graph: default_graph_threshold(),
        }
    }
}

fn default_vector_threshold() -> f32 {
    0.55
}

fn default_web_threshold() -> f32 {
    0.5
}

fn default_graph_threshold() -> f32 {
    0.35
}

/// Fallback chain and reranking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Passages requested from each adapter
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Sufficiency thresholds
    #[serde(default)]
    pub thresholds: SourceThresholds,
    /// Minimum collected passages for sufficiency
    #[serde(default = "default_min_coverage")]
    pub min_coverage: usize,
    /// Extra coverage demanded for complex questions
    #[serde(default = "default_complex_coverage_bonus")]
    pub complex_coverage_bonus: usize,
    /// Per adapter call
    #[serde(with = "humantime_serde", default = "default_adapter_timeout")]
    pub adapter_timeout: Duration,
    /// Whole request, retrieval and generation included
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Passages handed to the generator
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,
    /// Top relevance score needed for a confident answer
    #[serde(default = "default_rerank_threshold")]
    pub rerank_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig {
            top_k: default_top_k(),
            thresholds: SourceThresholds::default(),
            min_coverage: default_min_coverage(),
            complex_coverage_bonus: default_complex_coverage_bonus(),
            adapter_timeout: default_adapter_timeout(),
            request_timeout: default_request_timeout(),
            rerank_top_n: default_rerank_top_n(),
            rerank_threshold: default_rerank_threshold(),
        }
    }
}

fn default_top_k() -> usize {
    8
}

fn default_min_coverage() -> usize {
    1
}

fn default_complex_coverage_bonus() -> usize {
    2
}

fn default_adapter_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(45)
}

fn default_rerank_top_n() -> usize {
    5
}

fn default_rerank_threshold() -> f32 {
    0.35
}

/// Semantic cache policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable the cache
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum cosine similarity for a hit
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Similarity above which a store overwrites the neighbour
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f32,
    /// Entry lifetime
    #[serde(with = "humantime_serde", default = "default_ttl")]
    pub ttl: Duration,
    /// Entry cap
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            similarity_threshold: default_similarity_threshold(),
            merge_threshold: default_merge_threshold(),
            ttl: default_ttl(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_similarity_threshold() -> f32 {
    0.85
}

fn default_merge_threshold() -> f32 {
    0.95
}

fn default_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_max_entries() -> u64 {
    1000
}

/// Classifier backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierMode {
    /// Built-in keyword rules
    #[default]
    Keywords,
    /// HTTP guardrail service
    Remote,
}

/// Query classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Which classifier to use
    #[serde(default)]
    pub mode: ClassifierMode,
    /// Guardrail service endpoint for remote mode
    pub url: Option<String>,
    /// HTTP timeout for the guardrail service
    #[serde(with = "humantime_serde", default = "default_classifier_timeout")]
    pub timeout: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            mode: ClassifierMode::default(),
            url: None,
            timeout: default_classifier_timeout(),
        }
    }
}

fn default_classifier_timeout() -> Duration {
    Duration::from_secs(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrieval_defaults() {
        let config = RetrievalConfig::default();
        assert_eq!(config.min_coverage, 1);
        assert!(config.thresholds.vector > config.thresholds.graph);
        assert!(config.adapter_timeout < config.request_timeout);
    }

    #[test]
    fn test_cache_config_humantime() {
        let config: CacheConfig = serde_json::from_str(r#"{"ttl": "2h", "similarity_threshold": 0.9}"#).unwrap();
        assert_eq!(config.ttl, Duration::from_secs(7200));
        assert!((config.similarity_threshold - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.max_entries, 1000);
        assert!(config.enabled);
    }

    #[test]
    fn test_classifier_timeout_from_config() {
        let config: ClassifierConfig =
            serde_json::from_str(r#"{"mode": "remote", "url": "http://guard", "timeout": "750ms"}"#).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(750));
        assert_eq!(ClassifierConfig::default().timeout, Duration::from_secs(3));
    }
}
