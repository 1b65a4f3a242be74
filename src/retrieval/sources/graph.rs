//! Knowledge graph adapter
//!
//! Talks to a graph retrieval service (HippoRAG style) over HTTP. The
//! service returns raw documents whose first line is a citation header
//! such as `[Nghị định 168-2024-NĐ-CP] Điều 32 Mục 16`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use super::{check_status, http_client, unavailable};
use crate::config::GraphSourceConfig;
use crate::core::{Citation, Passage, QueryVariant, SourceAdapter, SourceKind};
use crate::error::Result;

#[derive(Debug, Serialize)]
struct RetrieveRequest<'a> {
    queries: Vec<&'a str>,
    num_to_retrieve: usize,
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    results: Vec<QuerySolution>,
}

#[derive(Debug, Deserialize)]
struct QuerySolution {
    #[serde(default)]
    docs: Vec<String>,
    #[serde(default)]
    doc_scores: Vec<f32>,
}

/// Graph retrieval service client
pub struct GraphAdapter {
    client: Client,
    config: GraphSourceConfig,
}

impl GraphAdapter {
    /// Create a new adapter
    pub fn new(config: GraphSourceConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            config,
        })
    }
}

/// Scale PageRank-style scores into [0, 1]; without scores fall back to rank
fn normalized_scores(solution: &QuerySolution) -> Vec<f32> {
    let n = solution.docs.len();
    if solution.doc_scores.len() != n {
        return (0..n).map(|i| 1.0 / (1.0 + i as f32)).collect();
    }
    let max = solution.doc_scores.iter().cloned().fold(0.0f32, f32::max);
    if max > 1.0 {
        solution.doc_scores.iter().map(|s| s / max).collect()
    } else {
        solution.doc_scores.clone()
    }
}

#[async_trait]
impl SourceAdapter for GraphAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Graph
    }

    async fn search(&self, variants: &[QueryVariant], top_k: usize) -> Result<Vec<Passage>> {
        let queries: Vec<&str> = variants
            .iter()
            .take(self.config.max_queries.max(1))
            .map(|v| v.transformed_text.as_str())
            .collect();
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/retrieve", self.config.url.trim_end_matches('/')))
            .json(&RetrieveRequest {
                queries,
                num_to_retrieve: self.config.docs_per_query,
            })
            .send()
            .await
            .map_err(|e| unavailable(SourceKind::Graph, e))?;

        let body: RetrieveResponse = check_status(SourceKind::Graph, response)
            .await?
            .json()
            .await
            .map_err(|e| unavailable(SourceKind::Graph, format!("invalid response: {}", e)))?;

        let mut seen = HashSet::new();
        let mut passages = Vec::new();
        for solution in &body.results {
            let scores = normalized_scores(solution);
            for (doc, score) in solution
                .docs
                .iter()
                .zip(scores)
                .take(self.config.docs_per_query)
            {
                if !seen.insert(doc.trim().to_string()) {
                    continue;
                }
                let (citation, content): (Citation, String) = Citation::parse_header(doc);
                if content.is_empty() {
                    continue;
                }
                passages.push(Passage::new(SourceKind::Graph, content, citation, score));
            }
        }

        passages.sort_by(|a, b| b.raw_score.total_cmp(&a.raw_score));
        passages.truncate(top_k);
        debug!("Graph service returned {} passages", passages.len());
        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_graph_documents_are_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/retrieve"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "docs": [
                        "[Ngh nh 168-2024-N-CP] Điều 6 Mục 2\nPhạt tiền từ 800.000 đồng...",
                        "Văn bản không có tiêu đề"
                    ],
                    "doc_scores": [4.0, 2.0]
                }]
            })))
            .mount(&server)
            .await;

        let config = GraphSourceConfig {
            url: server.uri(),
            ..Default::default()
        };
        let adapter = GraphAdapter::new(config, Duration::from_secs(5)).unwrap();
        let passages = adapter.search(&[QueryVariant::verbatim("vượt đèn đỏ")], 5).await.unwrap();

        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].source_kind, SourceKind::Graph);
        assert_eq!(passages[0].citation.to_string(), "Nghị định 168/2024/NĐ-CP, Điều 6, Khoản 2");
        assert_eq!(passages[0].content, "Phạt tiền từ 800.000 đồng...");
        assert!((passages[0].raw_score - 1.0).abs() < 1e-6);
        assert!((passages[1].raw_score - 0.5).abs() < 1e-6);
        assert_eq!(passages[1].citation.to_string(), crate::core::citation::UNKNOWN_SOURCE);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let config = GraphSourceConfig {
            url: "http://127.0.0.1:1".into(),
            ..Default::default()
        };
        let adapter = GraphAdapter::new(config, Duration::from_secs(1)).unwrap();
        let err = adapter.search(&[QueryVariant::verbatim("x")], 5).await.unwrap_err();
        assert!(matches!(err, crate::Error::AdapterUnavailable { adapter: SourceKind::Graph, .. }));
    }
}
