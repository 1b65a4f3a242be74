//! Configuration module - Modular configuration management
//!
//! Configuration is split into focused modules:
//! - types/mod.rs: Core configuration types (Config, CannedResponses, LogConfig)
//! - types/retrieval.rs: Memory, transformer, fallback chain, cache and classifier policy
//! - types/sources.rs: Vector, web and graph backend endpoints
//! - types/provider.rs: Answer generator configuration
//! - types/storage.rs: Storage backend and embedding configuration
//! - io.rs: Configuration loading and saving
//! - validation.rs: Configuration validation
//! - paths.rs: Configuration file paths

mod io;
mod paths;
mod types;
mod validation;

// Re-export core config types
pub use types::{CannedResponses, Config, LogConfig, LogFormat};

// Re-export retrieval policy types
pub use types::retrieval::{
    CacheConfig, ClassifierConfig, ClassifierMode, MemoryConfig, RetrievalConfig,
    SourceThresholds, TransformerConfig,
};

// Re-export source types
pub use types::sources::{
    GraphSourceConfig, SourcesConfig, VectorSourceConfig, WebProvider, WebSourceConfig,
};

// Re-export provider types
pub use types::provider::GeneratorConfig;

// Re-export storage types
pub use types::storage::{EmbeddingConfig, PostgresConfig, StorageBackendType, StorageConfig};

// Re-export IO and utilities
pub use io::{apply_env_overrides, load_config, load_config_from_path, save_config};
pub use paths::{config_dir, config_path, state_dir};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
