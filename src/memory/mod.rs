//! Memory module - conversational memory and embeddings
//!
//! Holds the session/turn store with its window and cross-session policy,
//! the in-process session backend, local embeddings (fastembed) and the
//! embedding cache (moka).

pub mod backend;
pub mod cache;
pub mod embedding;
pub mod store;

pub use backend::InMemorySessionBackend;
pub use cache::CachedEmbedder;
pub use embedding::EmbeddingService;
pub use store::MemoryStore;
