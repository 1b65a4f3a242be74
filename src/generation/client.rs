//! OpenRouter answer generator
//!
//! Sends the rendered legal prompt to a chat-completions endpoint. Transport
//! failures, 429 and 5xx responses are retried with exponential backoff up
//! to `max_retries` times; 401 and other client errors fail immediately.

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoffBuilder};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{header, Client, StatusCode};
use secrecy::ExposeSecret;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::prompts::LegalPrompt;
use super::types::{ChatCompletionRequest, ChatCompletionResponse, Message};
use crate::config::GeneratorConfig;
use crate::core::{Citation, GenerationRequest, GenerationResponse, Generator, RankedPassage};
use crate::error::{Error, Result};

static DOCUMENT_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)tài liệu\s+(\d+)").expect("valid document reference regex"));

const INITIAL_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// OpenRouter-compatible generator
pub struct OpenRouterGenerator {
    client: Client,
    config: GeneratorConfig,
    prompt: LegalPrompt,
    retry_interval: Duration,
}

impl OpenRouterGenerator {
    /// Create a new generator
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();

        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", config.api_key.expose_secret()))
                .map_err(|e| Error::Config(format!("Invalid API key format: {}", e)))?,
        );

        if let Some(ref site_url) = config.site_url {
            if let Ok(value) = header::HeaderValue::from_str(site_url) {
                headers.insert("HTTP-Referer", value);
            }
        }
        if let Some(ref site_name) = config.site_name {
            if let Ok(value) = header::HeaderValue::from_str(site_name) {
                headers.insert("X-Title", value);
            }
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(OpenRouterGenerator {
            client,
            config,
            prompt: LegalPrompt::new()?,
            retry_interval: INITIAL_RETRY_INTERVAL,
        })
    }

    /// Configured model
    pub fn model(&self) -> &str {
        &self.config.model
    }

    async fn send_once(
        &self,
        request: &ChatCompletionRequest,
    ) -> std::result::Result<ChatCompletionResponse, backoff::Error<Error>> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| backoff::Error::transient(Error::Http(e)))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<ChatCompletionResponse>()
                .await
                .map_err(|e| backoff::Error::permanent(Error::Generator(format!("invalid response: {}", e))));
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let error_text = response.text().await.unwrap_or_default();

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("Generator rate limited: {}", error_text);
                let err = Error::RateLimit(error_text);
                match retry_after {
                    Some(wait) => backoff::Error::retry_after(err, wait),
                    None => backoff::Error::transient(err),
                }
            }
            StatusCode::UNAUTHORIZED => {
                backoff::Error::permanent(Error::Unauthorized("Invalid API key".to_string()))
            }
            s if s.is_server_error() => {
                backoff::Error::transient(Error::Generator(format!("API error ({}): {}", s, error_text)))
            }
            s => backoff::Error::permanent(Error::Generator(format!("API error ({}): {}", s, error_text))),
        })
    }

    /// Send with retries
    async fn send_request(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry_interval)
            .with_max_interval(self.config.timeout)
            .with_max_elapsed_time(None)
            .build();

        let attempts = AtomicU32::new(0);
        let max_retries = self.config.max_retries;
        let attempts = &attempts;

        retry(policy, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            match self.send_once(request).await {
                Ok(response) => Ok(response),
                Err(backoff::Error::Transient { err, .. }) if attempt >= max_retries => {
                    Err(backoff::Error::permanent(err))
                }
                Err(backoff::Error::Transient { err, retry_after }) => {
                    warn!("Generator attempt {} failed, retrying: {}", attempt + 1, err);
                    Err(backoff::Error::Transient { err, retry_after })
                }
                Err(permanent) => Err(permanent),
            }
        })
        .await
    }
}

/// Citations the answer refers to, by document number or by citation text.
/// Falls back to every ranked citation when the answer names none.
fn used_citations(answer: &str, passages: &[RankedPassage]) -> Vec<Citation> {
    let lowered = answer.to_lowercase();
    let mut referenced: HashSet<usize> = DOCUMENT_REF
        .captures_iter(answer)
        .filter_map(|c| c[1].parse::<usize>().ok())
        .filter(|n| *n >= 1 && *n <= passages.len())
        .map(|n| n - 1)
        .collect();

    for (i, p) in passages.iter().enumerate() {
        if !p.passage.citation.is_empty()
            && lowered.contains(&p.passage.citation.to_string().to_lowercase())
        {
            referenced.insert(i);
        }
    }

    let mut seen = HashSet::new();
    passages
        .iter()
        .enumerate()
        .filter(|(i, _)| referenced.is_empty() || referenced.contains(i))
        .map(|(_, p)| &p.passage.citation)
        .filter(|c| !c.is_empty())
        .filter(|c| seen.insert(c.normalized_key().unwrap_or_else(|| c.to_string())))
        .cloned()
        .collect()
}

#[async_trait]
impl Generator for OpenRouterGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse> {
        if self.config.api_key.expose_secret().is_empty() {
            return Err(Error::Generator("API key not configured".to_string()));
        }

        let chat = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message::system(self.prompt.system()),
                Message::user(self.prompt.user(&request)?),
            ],
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
            stream: false,
        };

        debug!(
            "Generating answer: model={}, passages={}, confident={}",
            chat.model,
            request.ranked_passages.len(),
            request.confidence_flag
        );

        let response = self.send_request(&chat).await?;
        if let Some(ref usage) = response.usage {
            info!("Generator response: model={}, tokens={}", response.model, usage.total_tokens);
        }

        let answer_text = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Generator("empty completion".to_string()))?;

        Ok(GenerationResponse {
            used_citations: used_citations(&answer_text, &request.ranked_passages),
            answer_text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Passage, SourceKind};
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generator(server: &MockServer, max_retries: u32) -> OpenRouterGenerator {
        let config = GeneratorConfig {
            api_key: SecretString::from("sk-test".to_string()),
            base_url: server.uri(),
            site_name: Some("LexRAG".into()),
            max_retries,
            ..Default::default()
        };
        let mut generator = OpenRouterGenerator::new(config).unwrap();
        generator.retry_interval = Duration::from_millis(10);
        generator
    }

    fn ranked(law: &str, article: &str) -> RankedPassage {
        RankedPassage {
            passage: Passage::new(
                SourceKind::Vector,
                "nội dung",
                Citation::law(law).with_article(article),
                0.8,
            ),
            relevance_score: 0.8,
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            question: "Vượt đèn đỏ phạt bao nhiêu?".into(),
            ranked_passages: vec![
                ranked("Nghị định 168/2024/NĐ-CP", "6"),
                ranked("Nghị định 168/2024/NĐ-CP", "7"),
            ],
            recent_turns: vec![],
            confidence_flag: true,
        }
    }

    fn completion(text: &str) -> serde_json::Value {
        json!({
            "id": "gen-1",
            "model": "openai/gpt-4o-mini",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": text}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })
    }

    #[tokio::test]
    async fn test_generate_reports_referenced_citations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(header("x-title", "LexRAG"))
            .and(body_partial_json(json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                "I. Trả lời\nPhạt tiền theo [Tài liệu 2].",
            )))
            .mount(&server)
            .await;

        let response = generator(&server, 0).generate(request()).await.unwrap();
        assert!(response.answer_text.starts_with("I. Trả lời"));
        assert_eq!(response.used_citations.len(), 1);
        assert_eq!(response.used_citations[0].article.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Không có căn cứ.")))
            .mount(&server)
            .await;

        let response = generator(&server, 2).generate(request()).await.unwrap();
        assert_eq!(response.answer_text, "Không có căn cứ.");
        // No document referenced: every ranked citation is reported
        assert_eq!(response.used_citations.len(), 2);
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = generator(&server, 3).generate(request()).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let err = generator(&server, 1).generate(request()).await.unwrap_err();
        assert!(matches!(err, Error::Generator(_)));
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let config = GeneratorConfig::default();
        let err = OpenRouterGenerator::new(config)
            .unwrap()
            .generate(request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Generator(_)));
    }

    #[test]
    fn test_used_citations_by_text() {
        let passages = vec![ranked("Nghị định 168/2024/NĐ-CP", "6"), ranked("Nghị định 100/2019/NĐ-CP", "5")];
        let used = used_citations("Căn cứ Nghị định 100/2019/NĐ-CP, Điều 5.", &passages);
        assert_eq!(used.len(), 1);
        assert_eq!(used[0].article.as_deref(), Some("5"));
    }
}
