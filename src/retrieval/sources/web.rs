//! Web search adapter
//!
//! Live search for recent or uncovered topics:
//! - Tavily (default, API key required)
//! - DuckDuckGo Instant Answer API (no key)
//!
//! Results carry their URL as citation and are timestamped at retrieval
//! since their content can change between requests.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use super::{check_status, http_client, unavailable};
use crate::config::{WebProvider, WebSourceConfig};
use crate::core::{Citation, Passage, QueryVariant, SourceAdapter, SourceKind};
use crate::error::Result;

const DUCKDUCKGO_URL: &str = "https://api.duckduckgo.com";

/// DuckDuckGo has no relevance score; results are scored by rank from here
const DUCKDUCKGO_TOP_SCORE: f32 = 0.6;

// ============================================================================
// Tavily
// ============================================================================

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    include_domains: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f32,
}

// ============================================================================
// DuckDuckGo
// ============================================================================

#[derive(Debug, Deserialize)]
struct DuckDuckGoResponse {
    #[serde(rename = "AbstractText")]
    abstract_text: Option<String>,
    #[serde(rename = "AbstractURL")]
    abstract_url: Option<String>,
    #[serde(rename = "Heading")]
    heading: Option<String>,
    #[serde(rename = "RelatedTopics")]
    related_topics: Option<Vec<DuckDuckGoTopic>>,
    #[serde(rename = "Results")]
    results: Option<Vec<DuckDuckGoTopic>>,
}

#[derive(Debug, Deserialize)]
struct DuckDuckGoTopic {
    #[serde(rename = "Text")]
    text: Option<String>,
    #[serde(rename = "FirstURL")]
    first_url: Option<String>,
}

/// A provider-neutral search hit
#[derive(Debug, Clone)]
struct WebHit {
    title: String,
    url: String,
    snippet: String,
    score: f32,
}

/// Live web search
pub struct WebSearchAdapter {
    client: Client,
    config: WebSourceConfig,
}

impl WebSearchAdapter {
    /// Create a new adapter
    pub fn new(config: WebSourceConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            config,
        })
    }

    fn base_url(&self) -> &str {
        let base = self.config.base_url.trim_end_matches('/');
        match self.config.provider {
            WebProvider::DuckDuckGo if base.contains("tavily.com") => DUCKDUCKGO_URL,
            _ => base,
        }
    }

    async fn tavily(&self, query: &str) -> Result<Vec<WebHit>> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| unavailable(SourceKind::Web, "Tavily API key not configured"))?;

        let response = self
            .client
            .post(format!("{}/search", self.base_url()))
            .bearer_auth(api_key.expose_secret())
            .json(&TavilyRequest {
                query,
                max_results: self.config.max_results,
                search_depth: "basic",
                include_domains: self.config.include_domains.clone(),
            })
            .send()
            .await
            .map_err(|e| unavailable(SourceKind::Web, e))?;

        let body: TavilyResponse = check_status(SourceKind::Web, response)
            .await?
            .json()
            .await
            .map_err(|e| unavailable(SourceKind::Web, format!("invalid Tavily response: {}", e)))?;

        Ok(body
            .results
            .into_iter()
            .map(|r| WebHit {
                title: r.title,
                url: r.url,
                snippet: r.content,
                score: r.score,
            })
            .collect())
    }

    async fn duckduckgo(&self, query: &str) -> Result<Vec<WebHit>> {
        let response = self
            .client
            .get(format!("{}/", self.base_url()))
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|e| unavailable(SourceKind::Web, e))?;

        let body: DuckDuckGoResponse = check_status(SourceKind::Web, response)
            .await?
            .json()
            .await
            .map_err(|e| unavailable(SourceKind::Web, format!("invalid DuckDuckGo response: {}", e)))?;

        let mut hits = Vec::new();
        if let (Some(text), Some(url)) = (&body.abstract_text, &body.abstract_url) {
            if !text.is_empty() && !url.is_empty() {
                hits.push((body.heading.clone().unwrap_or_default(), url.clone(), text.clone()));
            }
        }
        let topics = body
            .results
            .into_iter()
            .flatten()
            .chain(body.related_topics.into_iter().flatten());
        for topic in topics {
            if let (Some(text), Some(url)) = (topic.text, topic.first_url) {
                if !text.is_empty() {
                    let title = text.split(" - ").next().unwrap_or_default().to_string();
                    hits.push((title, url, text));
                }
            }
        }

        Ok(hits
            .into_iter()
            .take(self.config.max_results)
            .enumerate()
            .map(|(rank, (title, url, snippet))| WebHit {
                title,
                url,
                snippet,
                score: (DUCKDUCKGO_TOP_SCORE - 0.05 * rank as f32).max(0.1),
            })
            .collect())
    }
}

#[async_trait]
impl SourceAdapter for WebSearchAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Web
    }

    async fn search(&self, variants: &[QueryVariant], top_k: usize) -> Result<Vec<Passage>> {
        let mut seen = HashSet::new();
        let mut passages = Vec::new();
        let mut succeeded = 0usize;
        let mut last_error = None;

        for variant in variants.iter().take(self.config.max_queries.max(1)) {
            let query = variant.transformed_text.as_str();
            let outcome = match self.config.provider {
                WebProvider::Tavily => self.tavily(query).await,
                WebProvider::DuckDuckGo => self.duckduckgo(query).await,
            };
            let hits = match outcome {
                Ok(hits) => hits,
                Err(e) => {
                    warn!("Web search '{}' failed: {}", query, e);
                    last_error = Some(e);
                    continue;
                }
            };
            succeeded += 1;
            debug!("Web search '{}' returned {} results", query, hits.len());

            for hit in hits {
                if !seen.insert(hit.url.clone()) {
                    continue;
                }
                let content = if hit.title.is_empty() {
                    hit.snippet
                } else {
                    format!("{}\n{}", hit.title, hit.snippet)
                };
                passages.push(Passage::new(SourceKind::Web, content, Citation::web(hit.url), hit.score));
            }
        }

        if succeeded == 0 {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        passages.sort_by(|a, b| b.raw_score.total_cmp(&a.raw_score));
        passages.truncate(top_k);
        Ok(passages)
    }
}
