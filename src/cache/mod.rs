//! Cache module - semantic response caching
//!
//! The semantic cache is the only read path that can short-circuit retrieval:
//! a hit within the similarity threshold is served without calling any
//! source adapter or the generator.

pub mod backend;
pub mod semantic;

pub use backend::InMemoryCacheBackend;
pub use semantic::{CacheLookup, SemanticCache};
