//! Source adapters
//!
//! One adapter per retrieval backend, all behind [`SourceAdapter`]:
//! - `vector`: Qdrant collection of embedded legal clauses
//! - `web`: Tavily or DuckDuckGo live search
//! - `graph`: knowledge-graph retrieval service

mod graph;
mod vector;
mod web;

pub use graph::GraphAdapter;
pub use vector::VectorIndexAdapter;
pub use web::WebSearchAdapter;

use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::SourcesConfig;
use crate::core::{Embedder, SourceAdapter, SourceKind};
use crate::error::{Error, Result};

/// HTTP client shared by adapters of one kind
pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(concat!("lexrag/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Wrap a backend fault
pub(crate) fn unavailable(adapter: SourceKind, reason: impl ToString) -> Error {
    Error::AdapterUnavailable {
        adapter,
        reason: reason.to_string(),
    }
}

/// Fail with `AdapterUnavailable` on a non-success status
pub(crate) async fn check_status(
    adapter: SourceKind,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(unavailable(
        adapter,
        format!("status {}: {}", status, body.chars().take(200).collect::<String>()),
    ))
}

/// Build every enabled adapter in chain order
pub fn build_adapters(
    config: &SourcesConfig,
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    if config.vector.enabled {
        adapters.push(Arc::new(VectorIndexAdapter::new(
            config.vector.clone(),
            embedder,
            timeout,
        )?));
    }
    if config.web.enabled {
        adapters.push(Arc::new(WebSearchAdapter::new(config.web.clone(), timeout)?));
    }
    if config.graph.enabled {
        adapters.push(Arc::new(GraphAdapter::new(config.graph.clone(), timeout)?));
    }

    info!(
        "Retrieval sources: {}",
        adapters
            .iter()
            .map(|a| a.kind().as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(adapters)
}
