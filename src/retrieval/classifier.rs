//! Query classification
//!
//! Labels a raw question before routing. The keyword classifier runs
//! in-process; the HTTP classifier delegates to a guardrail service that
//! answers with a label. Labels map to a [`RoutePlan`] through an explicit
//! table rather than ad hoc branching in the pipeline.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::{ClassifierConfig, ClassifierMode, RetrievalConfig};
use crate::core::{QueryClass, QueryClassifier, SourceKind};
use crate::error::{Error, Result};
use crate::retrieval::lexicon;

const GREETINGS: &[&str] = &[
    "xin chào", "chào bạn", "chào", "hello", "hi", "hey", "cảm ơn", "cám ơn", "thanks",
    "thank you", "tạm biệt", "bye",
];

const WEB_KEYWORDS: &[&str] = &[
    "mới nhất", "hiện nay", "hiện tại", "gần đây", "tin tức", "năm nay", "hôm nay", "sắp tới",
    "latest", "current", "news", "recent", "today",
];

const COMPARISON_KEYWORDS: &[&str] = &[
    "so sánh", "khác nhau", "khác gì", "thay đổi", "so với", "trước và sau", "compare",
    "difference",
];

/// Adapter order and coverage demanded for one query class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePlan {
    /// Adapters in the order they are tried; empty means canned response
    pub order: Vec<SourceKind>,
    /// Minimum passages for sufficiency
    pub min_coverage: usize,
}

impl RoutePlan {
    /// No retrieval at all
    pub fn bypass(&self) -> bool {
        self.order.is_empty()
    }
}

/// Routing table from query class to retrieval plan
pub fn route(class: QueryClass, config: &RetrievalConfig) -> RoutePlan {
    let base = config.min_coverage.max(1);
    match class {
        QueryClass::Greeting | QueryClass::OutOfDomain => RoutePlan {
            order: Vec::new(),
            min_coverage: 0,
        },
        QueryClass::SimpleLegal | QueryClass::Ambiguous => RoutePlan {
            order: SourceKind::CHAIN.to_vec(),
            min_coverage: base,
        },
        QueryClass::ComplexLegal => RoutePlan {
            order: SourceKind::CHAIN.to_vec(),
            min_coverage: base + config.complex_coverage_bonus,
        },
        QueryClass::WebSearch => RoutePlan {
            order: vec![SourceKind::Web, SourceKind::Vector, SourceKind::Graph],
            min_coverage: base,
        },
    }
}

/// In-process classifier: patterns first, then keywords, then a default
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    /// Create a new keyword classifier
    pub fn new() -> Self {
        Self
    }

    /// Classify without the async wrapper
    pub fn label(&self, text: &str) -> QueryClass {
        let lower = text.trim().to_lowercase();
        if lower.is_empty() {
            return QueryClass::Ambiguous;
        }

        let analysis = lexicon::analyze(text);
        let legal_terms = !analysis.entities.is_empty() || !analysis.facets.is_empty();

        let bare: String = lower
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect();
        if !legal_terms
            && analysis.word_count <= 5
            && GREETINGS.iter().any(|g| lexicon::find_term(&bare, g) == Some(0))
        {
            return QueryClass::Greeting;
        }

        if WEB_KEYWORDS.iter().any(|k| lexicon::find_term(&lower, k).is_some()) {
            return QueryClass::WebSearch;
        }

        let documents = analysis
            .entities
            .iter()
            .filter(|e| lexicon::category_of(e) == lexicon::EntityCategory::Document)
            .count();
        let subjects = analysis
            .entities
            .iter()
            .filter(|e| lexicon::category_of(e) == lexicon::EntityCategory::Subject)
            .count();
        if COMPARISON_KEYWORDS.iter().any(|k| lexicon::find_term(&lower, k).is_some())
            || documents >= 2
            || subjects >= 2
        {
            return QueryClass::ComplexLegal;
        }

        if legal_terms || lexicon::has_legal_keyword(text) || analysis.is_anaphoric() {
            return QueryClass::SimpleLegal;
        }

        if analysis.word_count >= 3 {
            QueryClass::OutOfDomain
        } else {
            QueryClass::Ambiguous
        }
    }
}

#[async_trait]
impl QueryClassifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<QueryClass> {
        let class = self.label(text);
        debug!("Keyword classifier: {}", class);
        Ok(class)
    }
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    #[serde(alias = "class", alias = "category")]
    label: String,
}

/// Remote guardrail classifier
#[derive(Clone)]
pub struct HttpClassifier {
    client: Client,
    url: String,
}

impl HttpClassifier {
    /// Create a classifier posting to `url`
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lexrag/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl QueryClassifier for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<QueryClass> {
        let response = self
            .client
            .post(&self.url)
            .json(&ClassifyRequest { text })
            .send()
            .await
            .map_err(|e| Error::ClassificationUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::ClassificationUnavailable(format!(
                "classifier returned status {}",
                response.status()
            )));
        }

        let body: ClassifyResponse = response
            .json()
            .await
            .map_err(|e| Error::ClassificationUnavailable(format!("invalid response: {}", e)))?;

        body.label
            .parse::<QueryClass>()
            .map_err(|e| Error::ClassificationUnavailable(e.to_string()))
    }
}

/// Build the configured classifier
pub fn build_classifier(config: &ClassifierConfig) -> Result<Box<dyn QueryClassifier>> {
    match config.mode {
        ClassifierMode::Keywords => Ok(Box::new(KeywordClassifier::new())),
        ClassifierMode::Remote => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| Error::Config("classifier.url is required in remote mode".into()))?;
            Ok(Box::new(HttpClassifier::new(url, config.timeout)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_keyword_labels() {
        let c = KeywordClassifier::new();
        assert_eq!(c.label("Xin chào!"), QueryClass::Greeting);
        assert_eq!(c.label("cảm ơn bạn"), QueryClass::Greeting);
        assert_eq!(c.label("Công thức nấu phở là gì?"), QueryClass::OutOfDomain);
        assert_eq!(c.label("Mức phạt không đội mũ bảo hiểm?"), QueryClass::SimpleLegal);
        assert_eq!(c.label("Luật giao thông mới nhất năm 2025?"), QueryClass::WebSearch);
        assert_eq!(
            c.label("So sánh Nghị định 100/2019 và Nghị định 168/2024"),
            QueryClass::ComplexLegal
        );
        assert_eq!(c.label("Còn nếu không có bằng lái thì sao?"), QueryClass::SimpleLegal);
        assert_eq!(c.label("ok"), QueryClass::Ambiguous);
    }

    #[test]
    fn test_greeting_with_question_is_legal() {
        let c = KeywordClassifier::new();
        assert_eq!(c.label("Chào bạn, vượt đèn đỏ phạt bao nhiêu?"), QueryClass::SimpleLegal);
    }

    #[test]
    fn test_routing_table() {
        let config = RetrievalConfig::default();
        assert!(route(QueryClass::Greeting, &config).bypass());
        assert!(route(QueryClass::OutOfDomain, &config).bypass());

        let simple = route(QueryClass::SimpleLegal, &config);
        assert_eq!(simple.order, SourceKind::CHAIN.to_vec());
        assert_eq!(simple.min_coverage, 1);

        let complex = route(QueryClass::ComplexLegal, &config);
        assert_eq!(complex.order, simple.order);
        assert_eq!(complex.min_coverage, 3);

        assert_eq!(route(QueryClass::WebSearch, &config).order[0], SourceKind::Web);
    }

    #[tokio::test]
    async fn test_http_classifier() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/classify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"label": "complex_legal"})))
            .mount(&server)
            .await;

        let classifier = HttpClassifier::new(format!("{}/classify", server.uri()), Duration::from_secs(2)).unwrap();
        let class = classifier.classify("So sánh hai nghị định").await.unwrap();
        assert_eq!(class, QueryClass::ComplexLegal);
    }

    #[tokio::test]
    async fn test_http_classifier_failure_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let classifier = HttpClassifier::new(server.uri(), Duration::from_secs(2)).unwrap();
        let err = classifier.classify("anything").await.unwrap_err();
        assert!(matches!(err, Error::ClassificationUnavailable(_)));
    }

    #[tokio::test]
    async fn test_remote_timeout_is_configurable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"label": "SIMPLE_LEGAL"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let config = ClassifierConfig {
            mode: ClassifierMode::Remote,
            url: Some(server.uri()),
            timeout: Duration::from_millis(50),
        };
        let classifier = build_classifier(&config).unwrap();
        let err = classifier.classify("vượt đèn đỏ").await.unwrap_err();
        assert!(matches!(err, Error::ClassificationUnavailable(_)));
    }

    #[test]
    fn test_remote_mode_requires_url() {
        let config = ClassifierConfig {
            mode: ClassifierMode::Remote,
            url: None,
            ..Default::default()
        };
        assert!(build_classifier(&config).is_err());
    }
}
