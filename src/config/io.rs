//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use secrecy::SecretString;
use std::path::Path;
use std::str::FromStr;

use super::types::storage::{PostgresConfig, StorageBackendType};
use super::types::Config;
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file (config.json / config.toml) if it exists, otherwise defaults
/// 2. Environment variable overrides (including `.env`)
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    // Apply environment variable overrides (highest precedence)
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().is_some_and(|ext| ext == "json") {
        // Parse as JSON5 (more lenient than strict JSON)
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        // Try JSON5 first, then TOML
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_secret(name: &str) -> Option<SecretString> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` if present, then overlays any set variables. Env vars have
/// the highest precedence: defaults < file < env.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();

    // Generator
    if let Some(key) = env_secret("OPENROUTER_API_KEY") {
        config.generator.api_key = key;
    }
    if let Ok(model) = std::env::var("OPENROUTER_MODEL").or_else(|_| std::env::var("DEFAULT_MODEL")) {
        config.generator.model = model;
    }
    if let Ok(url) = std::env::var("OPENROUTER_BASE_URL") {
        config.generator.base_url = url;
    }
    if let Some(retries) = env_parse("OPENROUTER_MAX_RETRIES") {
        config.generator.max_retries = retries;
    }

    // Vector index
    if let Ok(url) = std::env::var("QDRANT_URL") {
        config.sources.vector.url = url;
    }
    if let Some(key) = env_secret("QDRANT_API_KEY") {
        config.sources.vector.api_key = Some(key);
    }
    if let Ok(collection) = std::env::var("QDRANT_COLLECTION") {
        config.sources.vector.collection = collection;
    }

    // Web search
    if let Some(key) = env_secret("TAVILY_API_KEY") {
        config.sources.web.api_key = Some(key);
    }

    // Knowledge graph
    if let Ok(url) = std::env::var("GRAPH_SERVICE_URL") {
        config.sources.graph.url = url;
    }

    // Classifier
    if let Ok(url) = std::env::var("CLASSIFIER_URL") {
        config.classifier.url = Some(url);
        config.classifier.mode = super::types::retrieval::ClassifierMode::Remote;
    }

    // Cache policy
    if let Some(threshold) = env_parse("CACHE_SIMILARITY_THRESHOLD") {
        config.cache.similarity_threshold = threshold;
    }
    if let Some(enabled) = env_parse("CACHE_ENABLED") {
        config.cache.enabled = enabled;
    }

    // Memory policy
    if let Some(enabled) = env_parse("LEXRAG_CROSS_SESSION") {
        config.memory.cross_session = enabled;
    }

    // Database overrides
    if let Some(database_url) = env_secret("DATABASE_URL") {
        let pg = config.storage.postgres.get_or_insert_with(|| PostgresConfig {
            url: SecretString::from(String::new()),
            max_connections: 5,
            connect_timeout_secs: 30,
        });
        pg.url = database_url;
        config.storage.backend = StorageBackendType::Postgres;
    }
    if let Some(max_conn) = env_parse("DATABASE_MAX_CONNECTIONS") {
        if let Some(ref mut pg) = config.storage.postgres {
            pg.max_connections = max_conn;
        }
    }

    // Logging
    if let Ok(level) = std::env::var("LEXRAG_LOG") {
        config.log.level = level;
    }
}

/// Save configuration to a file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_json_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.memory.window_size = 7;
        config.cache.similarity_threshold = 0.9;
        save_config(&config, &path).unwrap();

        let loaded = load_config_from_path(&path).unwrap();
        assert_eq!(loaded.memory.window_size, 7);
        assert!((loaded.cache.similarity_threshold - 0.9).abs() < f32::EPSILON);
        assert_eq!(loaded.retrieval.adapter_timeout, config.retrieval.adapter_timeout);
    }

    #[test]
    fn test_save_and_load_toml_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.sources.vector.collection = "legal_corpus".into();
        save_config(&config, &path).unwrap();

        let loaded = load_config_from_path(&path).unwrap();
        assert_eq!(loaded.sources.vector.collection, "legal_corpus");
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ memory: ").unwrap();

        let err = load_config_from_path(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
