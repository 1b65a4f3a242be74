//! Request pipeline
//!
//! Wires every stage for one question:
//!
//! ```text
//! memory -> classify -> transform -> semantic cache -> fallback chain
//!        -> rerank -> generate -> cache write -> memory append
//! ```
//!
//! Requests for the same session are serialized by the memory store's
//! session lock; different sessions run independently. Component faults are
//! absorbed into a [`Degradation`] list on the response. Only a memory store
//! fault fails the request.
//!
//! Every stage after the memory reads runs against the request deadline.
//! A stage that runs out of time falls back the same way as when it fails.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::cache::{CacheLookup, SemanticCache};
use crate::config::{CannedResponses, Config, StorageBackendType};
use crate::core::{
    Citation, Embedder, GenerationRequest, Generator, QueryClass, QueryClassifier, QueryVariant,
    RankedSet, SessionId, SourceAdapter, SourceKind, Turn,
};
use crate::database::{init_pool, PgCacheBackend, PgSessionBackend};
use crate::error::{Error, Result};
use crate::generation::OpenRouterGenerator;
use crate::memory::{CachedEmbedder, EmbeddingService, MemoryStore};
use crate::retrieval::{
    build_adapters, build_classifier, CoordinatorState, EmbeddingScorer, FallbackCoordinator,
    QueryTransformer, Reranker, RetrievalOutcome,
};

/// One user question
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    /// Conversation the question belongs to
    pub session_id: SessionId,
    /// Links the session to earlier ones for cross-session recall
    pub user_identity: Option<String>,
    /// Raw question text
    pub question: String,
}

impl PipelineRequest {
    /// Create an anonymous request
    pub fn new(session_id: impl Into<String>, question: impl Into<String>) -> Self {
        PipelineRequest {
            session_id: session_id.into(),
            user_identity: None,
            question: question.into(),
        }
    }

    /// Attach a user identity
    pub fn with_identity(mut self, user_identity: impl Into<String>) -> Self {
        self.user_identity = Some(user_identity.into());
        self
    }
}

/// A fault the pipeline absorbed while answering
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// An adapter failed; the chain moved on
    AdapterUnavailable {
        /// Failed source
        source: SourceKind,
        /// Error text
        reason: String,
    },
    /// An adapter exceeded its timeout
    AdapterTimeout {
        /// Slow source
        source: SourceKind,
    },
    /// No source produced a passage
    AllSourcesExhausted,
    /// Several antecedents fit; each became a variant
    AmbiguousContext {
        /// Competing antecedents
        candidates: Vec<String>,
    },
    /// Cache skipped for this request
    CacheUnavailable {
        /// Error text
        reason: String,
    },
    /// Classifier failed; treated as a simple legal question
    ClassificationUnavailable {
        /// Error text
        reason: String,
    },
    /// Generator failed; citations returned without an answer
    GeneratorUnavailable {
        /// Error text
        reason: String,
    },
    /// The request deadline cut a stage short
    RequestTimeout,
}

/// Answer with its provenance
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResponse {
    /// Answer text shown to the user
    pub answer: String,
    /// Citations backing the answer
    pub citations: Vec<Citation>,
    /// Retrieval reached the confidence threshold
    pub confident: bool,
    /// Best relevance score, when anything was retrieved
    pub top_score: Option<f32>,
    /// Served from the semantic cache
    pub cached: bool,
    /// Classifier label used for routing
    pub class: QueryClass,
    /// Query variants sent to retrieval
    pub variants: Vec<QueryVariant>,
    /// Coordinator states visited
    pub trace: Vec<CoordinatorState>,
    /// Absorbed faults
    pub degradations: Vec<Degradation>,
    /// Wall time spent on the request
    pub elapsed_ms: u64,
}

/// The retrieval orchestration pipeline
pub struct RetrievalPipeline {
    memory: MemoryStore,
    cache: SemanticCache,
    embedder: Arc<dyn Embedder>,
    classifier: Arc<dyn QueryClassifier>,
    transformer: QueryTransformer,
    coordinator: FallbackCoordinator,
    reranker: Reranker,
    generator: Arc<dyn Generator>,
    canned: CannedResponses,
    request_timeout: Duration,
}

/// Assembles a [`RetrievalPipeline`]; unset stores default to in-process ones
pub struct PipelineBuilder {
    config: Config,
    memory: Option<MemoryStore>,
    cache: Option<SemanticCache>,
    embedder: Option<Arc<dyn Embedder>>,
    classifier: Option<Arc<dyn QueryClassifier>>,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    reranker: Option<Reranker>,
    generator: Option<Arc<dyn Generator>>,
}

impl PipelineBuilder {
    /// Start from a configuration
    pub fn new(config: Config) -> Self {
        PipelineBuilder {
            config,
            memory: None,
            cache: None,
            embedder: None,
            classifier: None,
            adapters: Vec::new(),
            reranker: None,
            generator: None,
        }
    }

    /// Conversational memory
    pub fn memory(mut self, memory: MemoryStore) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Semantic cache
    pub fn cache(mut self, cache: SemanticCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Embedder for fingerprints and reranking
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Query classifier; defaults to the configured one
    pub fn classifier(mut self, classifier: Arc<dyn QueryClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Source adapters, any order
    pub fn adapters(mut self, adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        self.adapters = adapters;
        self
    }

    /// Reranker; defaults to embedding similarity
    pub fn reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Answer generator
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Result<RetrievalPipeline> {
        let config = self.config;
        let embedder = self
            .embedder
            .ok_or_else(|| Error::Config("pipeline requires an embedder".into()))?;
        let generator = self
            .generator
            .ok_or_else(|| Error::Config("pipeline requires a generator".into()))?;
        let classifier = match self.classifier {
            Some(c) => c,
            None => Arc::from(build_classifier(&config.classifier)?),
        };
        let reranker = self.reranker.unwrap_or_else(|| {
            Reranker::new(
                Arc::new(EmbeddingScorer::new(embedder.clone())),
                config.retrieval.rerank_top_n,
                config.retrieval.rerank_threshold,
            )
        });

        Ok(RetrievalPipeline {
            memory: self
                .memory
                .unwrap_or_else(|| MemoryStore::in_memory(config.memory.clone())),
            cache: self
                .cache
                .unwrap_or_else(|| SemanticCache::in_memory(config.cache.clone())),
            embedder,
            classifier,
            transformer: QueryTransformer::new(config.transformer.clone()),
            coordinator: FallbackCoordinator::new(self.adapters, config.retrieval.clone()),
            reranker,
            generator,
            canned: config.canned.clone(),
            request_timeout: config.retrieval.request_timeout,
        })
    }
}

impl RetrievalPipeline {
    /// Start building a pipeline
    pub fn builder(config: Config) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Build the production pipeline: local embeddings, configured storage,
    /// enabled sources and the OpenRouter generator.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedding = EmbeddingService::new()?;
        let embedder: Arc<dyn Embedder> = Arc::new(CachedEmbedder::new(
            Arc::new(embedding),
            config.embedding.cache_capacity,
        ));

        let (memory, cache) = open_stores(config).await?;
        let adapters = build_adapters(&config.sources, embedder.clone(), config.retrieval.adapter_timeout)?;
        let generator = Arc::new(OpenRouterGenerator::new(config.generator.clone())?);

        Self::builder(config.clone())
            .memory(memory)
            .cache(cache)
            .embedder(embedder)
            .adapters(adapters)
            .generator(generator)
            .build()
    }

    /// Conversational memory
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Semantic cache
    pub fn cache(&self) -> &SemanticCache {
        &self.cache
    }

    /// Configured source kinds in chain order
    pub fn sources(&self) -> Vec<SourceKind> {
        self.coordinator.sources()
    }

    /// Answer one question
    pub async fn handle(&self, request: PipelineRequest) -> Result<PipelineResponse> {
        let question = request.question.trim().to_string();
        if question.is_empty() {
            return Err(Error::InvalidInput("Question is empty".into()));
        }

        let _session = self.memory.lock_session(&request.session_id).await;
        let started = Instant::now();
        let deadline = started + self.request_timeout;
        let mut degradations = Vec::new();

        let recent = self
            .memory
            .recent(&request.session_id, self.memory.config().window_size)
            .await?;
        let long_term = self.long_term_turns(&request).await?;

        let class = match timeout(remaining(deadline), self.classifier.classify(&question)).await {
            Ok(Ok(class)) => class,
            Ok(Err(e)) => {
                warn!("Classifier unavailable, assuming SIMPLE_LEGAL: {}", e);
                degradations.push(Degradation::ClassificationUnavailable { reason: e.to_string() });
                QueryClass::SimpleLegal
            }
            Err(_) => {
                warn!("Classifier exceeded the request deadline, assuming SIMPLE_LEGAL");
                degradations.push(Degradation::ClassificationUnavailable {
                    reason: "request deadline reached".into(),
                });
                note_timeout(&mut degradations);
                QueryClass::SimpleLegal
            }
        };
        info!("Session {}: classified as {}", request.session_id, class);

        if class.bypasses_retrieval() {
            let variants = vec![QueryVariant::verbatim(&question)];
            let outcome = self.coordinator.run(class, &variants, deadline).await;
            let answer = match class {
                QueryClass::Greeting => self.canned.greeting.clone(),
                _ => self.canned.out_of_domain.clone(),
            };
            self.remember(&request, &question, Vec::new(), &answer).await?;
            return Ok(PipelineResponse {
                answer,
                citations: Vec::new(),
                confident: false,
                top_score: None,
                cached: false,
                class,
                variants,
                trace: outcome.trace,
                degradations,
                elapsed_ms: elapsed_ms(started),
            });
        }

        let transformation = self
            .transformer
            .transform_with_history(&question, &recent, &long_term);
        if let Some(ref candidates) = transformation.ambiguous {
            degradations.push(Degradation::AmbiguousContext {
                candidates: candidates.clone(),
            });
        }
        let canonical = transformation.canonical_query().to_string();
        debug!(
            "Variants: {:?}",
            transformation
                .variants
                .iter()
                .map(|v| format!("{}: {}", v.rationale_tag, v.transformed_text))
                .collect::<Vec<_>>()
        );

        let fingerprint = if !self.cache.config().enabled {
            None
        } else {
            match timeout(remaining(deadline), self.embedder.embed(&canonical)).await {
                Ok(Ok(v)) => Some(v),
                Ok(Err(e)) => {
                    warn!("Cannot fingerprint query, skipping cache: {}", e);
                    degradations.push(Degradation::CacheUnavailable { reason: e.to_string() });
                    None
                }
                Err(_) => {
                    warn!("Fingerprint exceeded the request deadline, skipping cache");
                    note_timeout(&mut degradations);
                    None
                }
            }
        };

        if let Some(ref fp) = fingerprint {
            match timeout(remaining(deadline), self.cache.lookup(fp)).await {
                Ok(Ok(CacheLookup::Hit { entry, .. })) => {
                    self.remember(
                        &request,
                        &question,
                        transformation.resolved_entities.clone(),
                        &entry.answer_text,
                    )
                    .await?;
                    return Ok(PipelineResponse {
                        answer: entry.answer_text,
                        citations: entry.supporting_citations,
                        confident: true,
                        top_score: None,
                        cached: true,
                        class,
                        variants: transformation.variants,
                        trace: Vec::new(),
                        degradations,
                        elapsed_ms: elapsed_ms(started),
                    });
                }
                Ok(Ok(CacheLookup::Stale { entry, .. })) => {
                    debug!("Ignoring stale cache entry {}", entry.id);
                }
                Ok(Ok(CacheLookup::Miss)) => {}
                Ok(Err(e)) => {
                    warn!("Semantic cache unavailable: {}", e);
                    degradations.push(Degradation::CacheUnavailable { reason: e.to_string() });
                }
                Err(_) => {
                    warn!("Cache lookup exceeded the request deadline");
                    note_timeout(&mut degradations);
                }
            }
        }

        let outcome = self
            .coordinator
            .run(class, &transformation.variants, deadline)
            .await;
        record_retrieval(&outcome, &mut degradations);

        let ranked = match timeout(
            remaining(deadline),
            self.reranker.rerank(&question, outcome.candidates.clone()),
        )
        .await
        {
            Ok(ranked) => ranked,
            Err(_) => {
                warn!("Reranking exceeded the request deadline, using lexical scores");
                note_timeout(&mut degradations);
                self.reranker
                    .rerank_lexical(&question, outcome.candidates.clone())
                    .await
            }
        };
        info!(
            "Reranked {} passages, top score {:?}, sufficient {}",
            ranked.passages.len(),
            ranked.top_score(),
            ranked.sufficient
        );

        let (answer, citations, generated) = self
            .compose(&question, &ranked, &recent, deadline, &mut degradations)
            .await;

        let cacheable = generated
            && ranked.sufficient
            && !degradations
                .iter()
                .any(|d| matches!(d, Degradation::RequestTimeout));
        if let (true, Some(fp)) = (cacheable, fingerprint) {
            if let Err(e) = self.cache.store(fp, &canonical, &answer, citations.clone()).await {
                warn!("Cache write failed: {}", e);
                degradations.push(Degradation::CacheUnavailable { reason: e.to_string() });
            }
        }

        self.remember(&request, &question, transformation.resolved_entities, &answer)
            .await?;

        Ok(PipelineResponse {
            answer,
            citations,
            confident: ranked.sufficient,
            top_score: ranked.top_score(),
            cached: false,
            class,
            variants: transformation.variants,
            trace: outcome.trace,
            degradations,
            elapsed_ms: elapsed_ms(started),
        })
    }

    /// Turns from the user's earlier sessions, most recent first
    async fn long_term_turns(&self, request: &PipelineRequest) -> Result<Vec<Turn>> {
        let identity = match (&request.user_identity, self.memory.config().cross_session) {
            (Some(identity), true) => identity,
            _ => return Ok(Vec::new()),
        };

        let sessions = self
            .memory
            .earlier_sessions(identity, &request.session_id)
            .await?;
        Ok(sessions
            .into_iter()
            .flat_map(|s| s.turns.into_iter().rev())
            .collect())
    }

    /// Produce the answer text. Returns whether the generator wrote it.
    async fn compose(
        &self,
        question: &str,
        ranked: &RankedSet,
        recent: &[Turn],
        deadline: Instant,
        degradations: &mut Vec<Degradation>,
    ) -> (String, Vec<Citation>, bool) {
        if ranked.passages.is_empty() {
            return (self.canned.no_sources.clone(), Vec::new(), false);
        }

        let request = GenerationRequest {
            question: question.to_string(),
            ranked_passages: ranked.passages.clone(),
            recent_turns: recent.to_vec(),
            confidence_flag: ranked.sufficient,
        };

        let budget = remaining(deadline);
        let result = if budget.is_zero() {
            None
        } else {
            timeout(budget, self.generator.generate(request)).await.ok()
        };

        match result {
            Some(Ok(response)) => {
                let citations = if response.used_citations.is_empty() {
                    ranked.citations()
                } else {
                    response.used_citations
                };
                (self.with_disclaimer(response.answer_text), citations, true)
            }
            Some(Err(e)) => {
                warn!("Generator unavailable: {}", e);
                degradations.push(Degradation::GeneratorUnavailable { reason: e.to_string() });
                let citations = ranked.citations();
                (self.degraded_answer(&citations), citations, false)
            }
            None => {
                warn!("Request deadline reached before generation finished");
                note_timeout(degradations);
                let citations = ranked.citations();
                (self.degraded_answer(&citations), citations, false)
            }
        }
    }

    fn with_disclaimer(&self, answer: String) -> String {
        if self.canned.disclaimer.is_empty() || answer.contains(&self.canned.disclaimer) {
            return answer;
        }
        format!("{}\n\n{}", answer.trim_end(), self.canned.disclaimer)
    }

    fn degraded_answer(&self, citations: &[Citation]) -> String {
        if citations.is_empty() {
            return self.canned.no_sources.clone();
        }
        let mut answer = self.canned.degraded.clone();
        for citation in citations {
            answer.push_str("\n- ");
            answer.push_str(&citation.to_string());
        }
        answer
    }

    /// Append the user turn and the answer
    async fn remember(
        &self,
        request: &PipelineRequest,
        question: &str,
        entities: Vec<String>,
        answer: &str,
    ) -> Result<()> {
        let identity = request.user_identity.as_deref();
        self.memory
            .append_for(
                &request.session_id,
                identity,
                Turn::user(&request.session_id, question).with_entities(entities),
            )
            .await?;
        self.memory
            .append_for(
                &request.session_id,
                identity,
                Turn::assistant(&request.session_id, answer),
            )
            .await?;
        Ok(())
    }
}

/// Open the memory store and semantic cache on the configured backend
pub async fn open_stores(config: &Config) -> Result<(MemoryStore, SemanticCache)> {
    match config.storage.backend {
        StorageBackendType::Memory => Ok((
            MemoryStore::in_memory(config.memory.clone()),
            SemanticCache::in_memory(config.cache.clone()),
        )),
        StorageBackendType::Postgres => {
            let pg = config.storage.postgres.as_ref().ok_or_else(|| {
                Error::Config("storage.postgres is required for the postgres backend".into())
            })?;
            let pool = init_pool(pg).await?;
            Ok((
                MemoryStore::new(Arc::new(PgSessionBackend::new(pool.clone())), config.memory.clone()),
                SemanticCache::new(Arc::new(PgCacheBackend::new(pool)), config.cache.clone()),
            ))
        }
    }
}

fn record_retrieval(outcome: &RetrievalOutcome, degradations: &mut Vec<Degradation>) {
    for failure in &outcome.failures {
        degradations.push(if failure.timed_out {
            Degradation::AdapterTimeout {
                source: failure.source,
            }
        } else {
            Degradation::AdapterUnavailable {
                source: failure.source,
                reason: failure.reason.clone(),
            }
        });
    }
    if outcome.exhausted() || (!outcome.bypassed && outcome.candidates.is_empty()) {
        degradations.push(Degradation::AllSourcesExhausted);
    }
    if outcome.deadline_exceeded {
        note_timeout(degradations);
    }
}

/// Time left before `deadline`
fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

fn note_timeout(degradations: &mut Vec<Degradation>) {
    if !degradations.contains(&Degradation::RequestTimeout) {
        degradations.push(Degradation::RequestTimeout);
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
