//! Configuration validation
//!
//! Validates configuration and reports issues.

use secrecy::ExposeSecret;

use super::types::retrieval::ClassifierMode;
use super::types::sources::WebProvider;
use super::types::storage::StorageBackendType;
use super::types::Config;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_thresholds(config, result);
    result = validate_windows(config, result);
    result = validate_sources(config, result);
    result = validate_generator(config, result);
    result = validate_storage(config, result);

    result
}

fn unit_interval(
    result: ConfigValidationResult,
    path: &str,
    value: f32,
) -> ConfigValidationResult {
    if (0.0..=1.0).contains(&value) {
        result
    } else {
        result.with_error(
            ValidationIssue::new(path, format!("Must be between 0.0 and 1.0, got {}", value))
                .with_suggestion("Scores and similarities are normalized to [0, 1]"),
        )
    }
}

fn validate_thresholds(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let t = &config.retrieval.thresholds;
    result = unit_interval(result, "retrieval.thresholds.vector", t.vector);
    result = unit_interval(result, "retrieval.thresholds.web", t.web);
    result = unit_interval(result, "retrieval.thresholds.graph", t.graph);
    result = unit_interval(result, "retrieval.rerank_threshold", config.retrieval.rerank_threshold);
    result = unit_interval(result, "cache.similarity_threshold", config.cache.similarity_threshold);
    result = unit_interval(result, "cache.merge_threshold", config.cache.merge_threshold);
    result = unit_interval(result, "transformer.ambiguity_margin", config.transformer.ambiguity_margin);

    if config.cache.merge_threshold < config.cache.similarity_threshold {
        result = result.with_warning(
            ValidationIssue::new(
                "cache.merge_threshold",
                "Merge threshold is below the hit threshold; distinct questions may overwrite each other",
            )
            .with_suggestion("Keep cache.merge_threshold >= cache.similarity_threshold"),
        );
    }

    result
}

fn validate_windows(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.memory.window_size == 0 {
        result = result.with_error(
            ValidationIssue::new("memory.window_size", "Window size must be at least 1")
                .with_suggestion("Use 5-7 turns"),
        );
    }
    if config.transformer.max_variants == 0 {
        result = result.with_error(ValidationIssue::new(
            "transformer.max_variants",
            "At least the verbatim variant is required",
        ));
    }
    if config.retrieval.top_k == 0 || config.retrieval.rerank_top_n == 0 {
        result = result.with_error(ValidationIssue::new(
            "retrieval.top_k",
            "top_k and rerank_top_n must be positive",
        ));
    }
    if config.retrieval.adapter_timeout >= config.retrieval.request_timeout {
        result = result.with_warning(
            ValidationIssue::new(
                "retrieval.adapter_timeout",
                "A single adapter can consume the whole request deadline",
            )
            .with_suggestion("Set adapter_timeout well below request_timeout"),
        );
    }
    result
}

fn validate_sources(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let sources = &config.sources;

    if !sources.vector.enabled && !sources.web.enabled && !sources.graph.enabled {
        result = result.with_warning(
            ValidationIssue::new("sources", "All retrieval sources are disabled")
                .with_suggestion("Every legal question will get a low-confidence answer"),
        );
    }

    for (path, url, enabled) in [
        ("sources.vector.url", &sources.vector.url, sources.vector.enabled),
        ("sources.graph.url", &sources.graph.url, sources.graph.enabled),
        ("sources.web.base_url", &sources.web.base_url, sources.web.enabled),
    ] {
        if enabled && url::Url::parse(url).is_err() {
            result = result.with_error(ValidationIssue::new(path, format!("Invalid URL: {}", url)));
        }
    }

    if sources.web.enabled
        && sources.web.provider == WebProvider::Tavily
        && sources.web.api_key.is_none()
    {
        result = result.with_warning(
            ValidationIssue::new("sources.web.api_key", "Tavily selected without an API key")
                .with_suggestion("Set TAVILY_API_KEY or switch sources.web.provider to duckduckgo"),
        );
    }

    if config.classifier.mode == ClassifierMode::Remote && config.classifier.url.is_none() {
        result = result.with_error(
            ValidationIssue::new("classifier.url", "Remote classifier selected but no URL configured")
                .with_suggestion("Set CLASSIFIER_URL or use classifier.mode = keywords"),
        );
    }

    result
}

fn validate_generator(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.generator.api_key.expose_secret().is_empty() {
        result = result.with_warning(
            ValidationIssue::new(
                "generator.api_key",
                "No generator API key. Answers will fall back to citation lists.",
            )
            .with_suggestion("Set OPENROUTER_API_KEY environment variable"),
        );
    }
    result
}

fn validate_storage(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.storage.backend == StorageBackendType::Postgres && config.storage.postgres.is_none() {
        result = result.with_error(
            ValidationIssue::new(
                "storage.postgres",
                "PostgreSQL backend selected but not configured",
            )
            .with_suggestion("Set DATABASE_URL environment variable or configure storage.postgres"),
        );
    }
    if config.storage.backend == StorageBackendType::Memory {
        result = result.with_warning(ValidationIssue::new(
            "storage.backend",
            "In-memory storage: sessions and cache entries are lost on restart",
        ));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        let result = validate_config(&config);

        // Default config should have warnings but no errors
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert!(result.valid);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut config = Config::default();
        config.cache.similarity_threshold = 1.5;
        let result = validate_config(&config);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.path == "cache.similarity_threshold"));
    }

    #[test]
    fn test_zero_window_is_error() {
        let mut config = Config::default();
        config.memory.window_size = 0;
        assert!(!validate_config(&config).valid);
    }

    #[test]
    fn test_postgres_without_url() {
        let mut config = Config::default();
        config.storage.backend = StorageBackendType::Postgres;
        let result = validate_config(&config);
        assert!(result.errors.iter().any(|e| e.path == "storage.postgres"));
    }
}
