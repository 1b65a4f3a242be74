//! Vector index adapter (Qdrant REST API)
//!
//! Each query variant is embedded and searched against the collection
//! concurrently; hits are merged by point id keeping the best score. Clauses that refer
//! to a sibling clause ("khoản 2 Điều này") pull that clause in too, up to
//! `reference_depth` hops, with the parent's score decayed once per hop.
//! Reference expansion and individual variant searches are best-effort: the
//! adapter fails only when no variant search succeeded.

use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{check_status, http_client, unavailable};
use crate::config::VectorSourceConfig;
use crate::core::{Citation, Embedder, Passage, QueryVariant, SourceAdapter, SourceKind};
use crate::error::Result;

/// Variants embedded per search
const MAX_VARIANTS: usize = 3;

/// Chunks fetched per referenced clause
const REFERENCE_LIMIT: usize = 5;

static SAME_ARTICLE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)khoản\s+(\d+)\s+điều\s+này").expect("valid reference regex")
});

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: Value,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    payload: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ScrollResponse {
    result: ScrollResult,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    #[serde(default)]
    points: Vec<ScoredPoint>,
}

/// A hit with the payload fields needed for citations and references
#[derive(Debug, Clone)]
struct Hit {
    id: String,
    score: f32,
    text: String,
    law_id: Option<Value>,
    article_id: Option<Value>,
    clause_id: Option<Value>,
    point_id: Option<Value>,
}

impl Hit {
    fn from_point(point: ScoredPoint, score: f32) -> Option<Self> {
        let mut payload = point.payload;
        let text = ["text", "content", "page_content"]
            .iter()
            .find_map(|k| payload.remove(*k))
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|t| !t.trim().is_empty())?;

        Some(Hit {
            id: value_string(&point.id)?,
            score,
            text,
            law_id: payload.remove("law_id").filter(|v| !v.is_null()),
            article_id: payload.remove("article_id").filter(|v| !v.is_null()),
            clause_id: payload.remove("clause_id").filter(|v| !v.is_null()),
            point_id: payload.remove("point_id").filter(|v| !v.is_null()),
        })
    }

    fn citation(&self) -> Citation {
        let Some(law) = self.law_id.as_ref().and_then(value_string) else {
            return Citation::default();
        };
        let mut citation = Citation::law(crate::core::citation::law_title(&law));
        if let Some(article) = self.article_id.as_ref().and_then(value_string) {
            citation = citation.with_article(article);
        }
        if let Some(clause) = self.clause_id.as_ref().and_then(value_string) {
            citation = citation.with_clause(clause);
        }
        if let Some(point) = self.point_id.as_ref().and_then(value_string) {
            citation = citation.with_point(point.to_lowercase());
        }
        citation
    }

    fn into_passage(self) -> Passage {
        let citation = self.citation();
        Passage::new(SourceKind::Vector, self.text, citation, self.score)
    }
}

fn value_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Qdrant-backed legal clause index
pub struct VectorIndexAdapter {
    client: Client,
    config: VectorSourceConfig,
    embedder: Arc<dyn Embedder>,
}

impl VectorIndexAdapter {
    /// Create a new adapter
    pub fn new(config: VectorSourceConfig, embedder: Arc<dyn Embedder>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            config,
            embedder,
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/collections/{}/points/{}",
            self.config.url.trim_end_matches('/'),
            self.config.collection,
            action
        )
    }

    fn post(&self, url: String) -> reqwest::RequestBuilder {
        let request = self.client.post(url);
        match &self.config.api_key {
            Some(key) => request.header("api-key", key.expose_secret()),
            None => request,
        }
    }

    async fn search_vector(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>> {
        let response = self
            .post(self.endpoint("search"))
            .json(&SearchRequest {
                vector,
                limit,
                with_payload: true,
            })
            .send()
            .await
            .map_err(|e| unavailable(SourceKind::Vector, e))?;

        let body: SearchResponse = check_status(SourceKind::Vector, response)
            .await?
            .json()
            .await
            .map_err(|e| unavailable(SourceKind::Vector, e))?;
        Ok(body.result)
    }

    async fn scroll_clause(&self, law_id: &Value, article_id: &Value, clause: &str) -> Result<Vec<ScoredPoint>> {
        let clause_value = clause
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(clause));
        let body = json!({
            "filter": {
                "must": [
                    { "key": "law_id", "match": { "value": law_id } },
                    { "key": "article_id", "match": { "value": article_id } },
                    { "key": "clause_id", "match": { "value": clause_value } }
                ]
            },
            "limit": REFERENCE_LIMIT,
            "with_payload": true,
            "with_vector": false
        });

        let response = self
            .post(self.endpoint("scroll"))
            .json(&body)
            .send()
            .await
            .map_err(|e| unavailable(SourceKind::Vector, e))?;

        let body: ScrollResponse = check_status(SourceKind::Vector, response)
            .await?
            .json()
            .await
            .map_err(|e| unavailable(SourceKind::Vector, e))?;
        Ok(body.result.points)
    }

    /// Follow same-article clause references breadth-first
    async fn expand_references(&self, seeds: &[Hit], seen: &mut HashSet<String>) -> Vec<Hit> {
        let mut found = Vec::new();
        let mut frontier: Vec<Hit> = seeds.to_vec();

        for depth in 1..=self.config.reference_depth {
            let mut next = Vec::new();
            for hit in &frontier {
                let (Some(law_id), Some(article_id)) = (&hit.law_id, &hit.article_id) else {
                    continue;
                };
                let clauses: HashSet<String> = SAME_ARTICLE_REFERENCE
                    .captures_iter(&hit.text)
                    .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                    .collect();

                for clause in clauses {
                    let score = hit.score * self.config.reference_decay;
                    let points = match self.scroll_clause(law_id, article_id, &clause).await {
                        Ok(points) => points,
                        Err(e) => {
                            warn!("Skipping reference to clause {}: {}", clause, e);
                            continue;
                        }
                    };
                    for point in points {
                        if let Some(referenced) = Hit::from_point(point, score) {
                            if seen.insert(referenced.id.clone()) {
                                debug!(
                                    "Reference depth {}: clause {} of article {:?}",
                                    depth, clause, referenced.article_id
                                );
                                next.push(referenced);
                            }
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            found.extend(next.iter().cloned());
            frontier = next;
        }

        found
    }
}

#[async_trait]
impl SourceAdapter for VectorIndexAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Vector
    }

    async fn search(&self, variants: &[QueryVariant], top_k: usize) -> Result<Vec<Passage>> {
        let texts: Vec<String> = variants
            .iter()
            .take(MAX_VARIANTS)
            .map(|v| v.transformed_text.clone())
            .collect();
        if texts.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| unavailable(SourceKind::Vector, e))?;

        // Variant searches are independent; results keep variant order
        let mut results = Vec::with_capacity(vectors.len());
        let mut last_error = None;
        for outcome in join_all(vectors.iter().map(|v| self.search_vector(v, top_k))).await {
            match outcome {
                Ok(points) => results.push(points),
                Err(e) => {
                    warn!("Vector variant search failed: {}", e);
                    last_error = Some(e);
                }
            }
        }
        if results.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let mut best: HashMap<String, Hit> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for points in results {
            for point in points {
                let score = point.score;
                let Some(hit) = Hit::from_point(point, score) else {
                    continue;
                };
                match best.get_mut(&hit.id) {
                    Some(existing) if existing.score >= hit.score => {}
                    Some(existing) => *existing = hit,
                    None => {
                        order.push(hit.id.clone());
                        best.insert(hit.id.clone(), hit);
                    }
                }
            }
        }

        let mut hits: Vec<Hit> = order.iter().filter_map(|id| best.remove(id)).collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);

        let mut seen: HashSet<String> = hits.iter().map(|h| h.id.clone()).collect();
        let references = self.expand_references(&hits, &mut seen).await;
        hits.extend(references);
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);

        debug!("Vector index returned {} passages", hits.len());
        Ok(hits.into_iter().map(Hit::into_passage).collect())
    }
}
