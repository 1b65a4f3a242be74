//! Retrieval module
//!
//! Everything between a raw question and a ranked passage set:
//! - `classifier`: guardrail labels and the class-to-route table
//! - `transformer`: context-aware query variants
//! - `sources`: vector, web and graph adapters
//! - `fallback`: the coordinator state machine over the adapters
//! - `reranker`: relevance ordering against the original question

pub mod classifier;
pub mod fallback;
pub mod lexicon;
pub mod reranker;
pub mod sources;
pub mod transformer;

pub use classifier::{build_classifier, route, HttpClassifier, KeywordClassifier, RoutePlan};
pub use fallback::{AdapterFailure, CoordinatorState, FallbackCoordinator, RetrievalOutcome};
pub use reranker::{EmbeddingScorer, LexicalScorer, RelevanceScorer, Reranker};
pub use sources::{build_adapters, GraphAdapter, VectorIndexAdapter, WebSearchAdapter};
pub use transformer::{QueryTransformer, Transformation};
