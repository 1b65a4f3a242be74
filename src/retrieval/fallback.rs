//! Fallback coordinator
//!
//! Drives the retrieval chain as a state machine:
//!
//! ```text
//! NOT_STARTED -> TRY_VECTOR -> TRY_WEB -> TRY_GRAPH -> MERGED -> DONE
//!                     \            \           \
//!                      +------------+-----------+--> MERGED (sufficient)
//! ```
//!
//! Each adapter is tried at most once per request, under its own timeout.
//! Passages collected in earlier states are carried forward, and the chain
//! stops as soon as the collected set is sufficient. `ERROR` is reached only
//! when every adapter in the plan was tried and failed; an adapter that
//! answers with nothing is a normal, empty result, and a chain cut short by
//! the request deadline ends in `DONE` with whatever was collected.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::core::{CandidateSet, Passage, QueryClass, QueryVariant, SourceAdapter, SourceKind};
use crate::retrieval::classifier::{route, RoutePlan};

/// Coordinator states, recorded in order for every request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatorState {
    /// Request accepted
    NotStarted,
    /// Querying the vector index
    TryVector,
    /// Querying web search
    TryWeb,
    /// Querying the knowledge graph
    TryGraph,
    /// Collected passages merged and deduplicated
    Merged,
    /// Finished
    Done,
    /// Every attempted adapter failed
    Error,
}

impl CoordinatorState {
    fn trying(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Vector => CoordinatorState::TryVector,
            SourceKind::Web => CoordinatorState::TryWeb,
            SourceKind::Graph => CoordinatorState::TryGraph,
        }
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoordinatorState::NotStarted => "NOT_STARTED",
            CoordinatorState::TryVector => "TRY_VECTOR",
            CoordinatorState::TryWeb => "TRY_WEB",
            CoordinatorState::TryGraph => "TRY_GRAPH",
            CoordinatorState::Merged => "MERGED",
            CoordinatorState::Done => "DONE",
            CoordinatorState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One failed adapter call
#[derive(Debug, Clone)]
pub struct AdapterFailure {
    /// Which adapter
    pub source: SourceKind,
    /// Call identifier
    pub call_id: Uuid,
    /// Error text
    pub reason: String,
    /// The call hit its timeout
    pub timed_out: bool,
}

/// What the coordinator produced for one request
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    /// Merged candidates in source-priority order
    pub candidates: CandidateSet,
    /// Every state visited, in order
    pub trace: Vec<CoordinatorState>,
    /// Adapters invoked, in order
    pub attempted: Vec<SourceKind>,
    /// Failed or timed-out calls
    pub failures: Vec<AdapterFailure>,
    /// Collected passages met the sufficiency rule
    pub sufficient: bool,
    /// The class skipped retrieval entirely
    pub bypassed: bool,
    /// The request deadline cut the chain short
    pub deadline_exceeded: bool,
}

impl RetrievalOutcome {
    /// Final state of the machine
    pub fn final_state(&self) -> CoordinatorState {
        self.trace.last().copied().unwrap_or(CoordinatorState::NotStarted)
    }

    /// Every attempted adapter failed
    pub fn exhausted(&self) -> bool {
        self.final_state() == CoordinatorState::Error
    }
}

/// Mutable data carried between states
struct Run<'a> {
    variants: &'a [QueryVariant],
    plan: RoutePlan,
    deadline: Instant,
    next: usize,
    collected: Vec<Passage>,
    outcome: RetrievalOutcome,
}

/// Orders and short-circuits the source adapters
pub struct FallbackCoordinator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    config: RetrievalConfig,
}

impl FallbackCoordinator {
    /// Create a coordinator over the enabled adapters
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, config: RetrievalConfig) -> Self {
        Self { adapters, config }
    }

    /// Configured adapter kinds
    pub fn sources(&self) -> Vec<SourceKind> {
        self.adapters.iter().map(|a| a.kind()).collect()
    }

    fn adapter(&self, kind: SourceKind) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.iter().find(|a| a.kind() == kind)
    }

    /// Run the chain for one request
    pub async fn run(
        &self,
        class: QueryClass,
        variants: &[QueryVariant],
        deadline: Instant,
    ) -> RetrievalOutcome {
        let mut run = Run {
            variants,
            plan: route(class, &self.config),
            deadline,
            next: 0,
            collected: Vec::new(),
            outcome: RetrievalOutcome {
                candidates: CandidateSet::default(),
                trace: Vec::new(),
                attempted: Vec::new(),
                failures: Vec::new(),
                sufficient: false,
                bypassed: false,
                deadline_exceeded: false,
            },
        };

        let mut state = CoordinatorState::NotStarted;
        loop {
            run.outcome.trace.push(state);
            state = match state {
                CoordinatorState::NotStarted => self.handle_not_started(&mut run),
                CoordinatorState::TryVector | CoordinatorState::TryWeb | CoordinatorState::TryGraph => {
                    self.handle_try(&mut run).await
                }
                CoordinatorState::Merged => self.handle_merged(&mut run),
                CoordinatorState::Done | CoordinatorState::Error => break,
            };
        }

        debug!(
            "Retrieval trace: {}",
            run.outcome
                .trace
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        run.outcome
    }

    fn handle_not_started(&self, run: &mut Run<'_>) -> CoordinatorState {
        if run.plan.bypass() {
            run.outcome.bypassed = true;
            return CoordinatorState::Done;
        }
        self.advance(run)
    }

    /// Next configured adapter in plan order, or MERGED when none remain
    fn advance(&self, run: &mut Run<'_>) -> CoordinatorState {
        while let Some(kind) = run.plan.order.get(run.next).copied() {
            if self.adapter(kind).is_some() {
                return CoordinatorState::trying(kind);
            }
            run.next += 1;
        }
        CoordinatorState::Merged
    }

    async fn handle_try(&self, run: &mut Run<'_>) -> CoordinatorState {
        let Some(kind) = run.plan.order.get(run.next).copied() else {
            return CoordinatorState::Merged;
        };
        run.next += 1;

        let Some(adapter) = self.adapter(kind) else {
            return self.advance(run);
        };

        let now = Instant::now();
        if now >= run.deadline {
            warn!("Request deadline reached before querying {}", kind);
            run.outcome.deadline_exceeded = true;
            return CoordinatorState::Merged;
        }
        let budget = self.config.adapter_timeout.min(run.deadline - now);

        let call_id = Uuid::new_v4();
        run.outcome.attempted.push(kind);
        let started = Instant::now();

        match timeout(budget, adapter.search(run.variants, self.config.top_k)).await {
            Ok(Ok(mut passages)) => {
                for p in &mut passages {
                    p.source_kind = kind;
                    p.call_id = call_id;
                }
                info!(
                    "{} returned {} passages in {:?} (call {})",
                    kind,
                    passages.len(),
                    started.elapsed(),
                    call_id
                );
                run.collected.extend(passages);
            }
            Ok(Err(e)) => {
                warn!("{} failed (call {}): {}", kind, call_id, e);
                run.outcome.failures.push(AdapterFailure {
                    source: kind,
                    call_id,
                    reason: e.to_string(),
                    timed_out: false,
                });
            }
            Err(_) => {
                warn!("{} timed out after {:?} (call {})", kind, budget, call_id);
                run.outcome.failures.push(AdapterFailure {
                    source: kind,
                    call_id,
                    reason: format!("timed out after {:?}", budget),
                    timed_out: true,
                });
                if Instant::now() >= run.deadline {
                    run.outcome.deadline_exceeded = true;
                    return CoordinatorState::Merged;
                }
            }
        }

        if self.is_sufficient(&merge(run.collected.clone()), run.plan.min_coverage) {
            debug!("Sufficient after {}", kind);
            return CoordinatorState::Merged;
        }
        self.advance(run)
    }

    /// Configured adapters the chain never reached
    fn skipped(&self, run: &Run<'_>) -> usize {
        run.plan.order[run.next.min(run.plan.order.len())..]
            .iter()
            .filter(|kind| self.adapter(**kind).is_some())
            .count()
    }

    fn handle_merged(&self, run: &mut Run<'_>) -> CoordinatorState {
        let attempted = run.outcome.attempted.len();
        let exhausted = attempted > 0
            && run.outcome.failures.len() == attempted
            && !run.outcome.deadline_exceeded
            && self.skipped(run) == 0;
        if exhausted {
            warn!("All {} retrieval sources failed", attempted);
            return CoordinatorState::Error;
        }

        let candidates = merge(std::mem::take(&mut run.collected));
        run.outcome.sufficient = self.is_sufficient(&candidates, run.plan.min_coverage);
        run.outcome.candidates = candidates;
        CoordinatorState::Done
    }

    /// Some passage clears its source threshold and there are enough of them
    pub fn is_sufficient(&self, candidates: &CandidateSet, min_coverage: usize) -> bool {
        let thresholds = &self.config.thresholds;
        let clears = candidates.passages.iter().any(|p| {
            let threshold = match p.source_kind {
                SourceKind::Vector => thresholds.vector,
                SourceKind::Web => thresholds.web,
                SourceKind::Graph => thresholds.graph,
            };
            p.raw_score > threshold
        });
        clears && candidates.len() >= min_coverage
    }
}

/// Normalized content fingerprint for near-duplicate detection
fn content_hash(content: &str) -> u64 {
    let normalized: String = content
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    hasher.finish()
}

/// Order by source priority (stable within a source) and drop duplicates.
/// On duplicate citations the higher-priority source's passage, and so its
/// score, is the one kept.
pub fn merge(mut passages: Vec<Passage>) -> CandidateSet {
    passages.sort_by_key(|p| p.source_kind.priority());

    let mut keys = HashSet::new();
    let mut hashes = HashSet::new();
    let passages = passages
        .into_iter()
        .filter(|p| {
            let key = p.citation.normalized_key();
            let hash = content_hash(&p.content);
            if key.as_ref().is_some_and(|k| keys.contains(k)) || hashes.contains(&hash) {
                return false;
            }
            if let Some(k) = key {
                keys.insert(k);
            }
            hashes.insert(hash);
            true
        })
        .collect();

    CandidateSet { passages }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Citation;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    enum Behaviour {
        Returns(Vec<Passage>),
        Fails,
        Hangs,
    }

    struct FakeAdapter {
        kind: SourceKind,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl FakeAdapter {
        fn new(kind: SourceKind, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                kind,
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        async fn search(&self, _variants: &[QueryVariant], _top_k: usize) -> Result<Vec<Passage>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Returns(p) => Ok(p.clone()),
                Behaviour::Fails => Err(Error::AdapterUnavailable {
                    adapter: self.kind,
                    reason: "connection refused".into(),
                }),
                Behaviour::Hangs => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn passage(kind: SourceKind, content: &str, article: &str, score: f32) -> Passage {
        Passage::new(
            kind,
            content,
            Citation::law("Nghị định 100/2019/NĐ-CP").with_article(article),
            score,
        )
    }

    fn coordinator(adapters: Vec<Arc<FakeAdapter>>) -> FallbackCoordinator {
        let adapters = adapters
            .into_iter()
            .map(|a| a as Arc<dyn SourceAdapter>)
            .collect();
        FallbackCoordinator::new(adapters, RetrievalConfig::default())
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn variants() -> Vec<QueryVariant> {
        vec![QueryVariant::verbatim("Mức phạt vượt đèn đỏ?")]
    }

    use CoordinatorState::*;

    #[tokio::test]
    async fn test_sufficient_vector_stops_chain() {
        let vector = FakeAdapter::new(
            SourceKind::Vector,
            Behaviour::Returns(vec![passage(SourceKind::Vector, "Điều 5 ...", "5", 0.9)]),
        );
        let web = FakeAdapter::new(SourceKind::Web, Behaviour::Returns(Vec::new()));
        let graph = FakeAdapter::new(SourceKind::Graph, Behaviour::Returns(Vec::new()));
        let c = coordinator(vec![vector.clone(), web.clone(), graph.clone()]);

        let outcome = c.run(QueryClass::SimpleLegal, &variants(), far_deadline()).await;

        assert_eq!(outcome.trace, vec![NotStarted, TryVector, Merged, Done]);
        assert!(outcome.sufficient);
        assert_eq!((vector.calls(), web.calls(), graph.calls()), (1, 0, 0));
        assert_ne!(outcome.candidates.passages[0].call_id, Uuid::nil());
    }

    #[tokio::test]
    async fn test_vector_failure_falls_through_to_web() {
        let vector = FakeAdapter::new(SourceKind::Vector, Behaviour::Fails);
        let web = FakeAdapter::new(
            SourceKind::Web,
            Behaviour::Returns(vec![Passage::new(
                SourceKind::Web,
                "Tin mới",
                Citation::web("https://example.vn/a"),
                0.8,
            )]),
        );
        let graph = FakeAdapter::new(SourceKind::Graph, Behaviour::Returns(Vec::new()));
        let c = coordinator(vec![vector.clone(), web.clone(), graph.clone()]);

        let outcome = c.run(QueryClass::SimpleLegal, &variants(), far_deadline()).await;

        assert_eq!(outcome.trace, vec![NotStarted, TryVector, TryWeb, Merged, Done]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].source, SourceKind::Vector);
        assert!(!outcome.exhausted());
        assert_eq!(graph.calls(), 0);
    }

    #[tokio::test]
    async fn test_all_empty_is_merged_not_error() {
        let adapters: Vec<_> = SourceKind::CHAIN
            .iter()
            .map(|k| FakeAdapter::new(*k, Behaviour::Returns(Vec::new())))
            .collect();
        let c = coordinator(adapters.clone());

        let outcome = c.run(QueryClass::SimpleLegal, &variants(), far_deadline()).await;

        assert_eq!(
            outcome.trace,
            vec![NotStarted, TryVector, TryWeb, TryGraph, Merged, Done]
        );
        assert!(outcome.candidates.is_empty());
        assert!(!outcome.sufficient);
        assert!(adapters.iter().all(|a| a.calls() == 1));
    }

    #[tokio::test]
    async fn test_all_failed_is_error() {
        let adapters: Vec<_> = SourceKind::CHAIN
            .iter()
            .map(|k| FakeAdapter::new(*k, Behaviour::Fails))
            .collect();
        let c = coordinator(adapters);

        let outcome = c.run(QueryClass::SimpleLegal, &variants(), far_deadline()).await;

        assert_eq!(
            outcome.trace,
            vec![NotStarted, TryVector, TryWeb, TryGraph, Merged, CoordinatorState::Error]
        );
        assert!(outcome.exhausted());
        assert_eq!(outcome.failures.len(), 3);
    }

    #[tokio::test]
    async fn test_bypass_classes_call_nothing() {
        let vector = FakeAdapter::new(SourceKind::Vector, Behaviour::Returns(Vec::new()));
        let c = coordinator(vec![vector.clone()]);

        for class in [QueryClass::Greeting, QueryClass::OutOfDomain] {
            let outcome = c.run(class, &variants(), far_deadline()).await;
            assert!(outcome.bypassed);
            assert_eq!(outcome.trace, vec![NotStarted, Done]);
        }
        assert_eq!(vector.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let vector = FakeAdapter::new(SourceKind::Vector, Behaviour::Hangs);
        let web = FakeAdapter::new(
            SourceKind::Web,
            Behaviour::Returns(vec![Passage::new(
                SourceKind::Web,
                "Kết quả",
                Citation::web("https://example.vn/b"),
                0.7,
            )]),
        );
        let c = coordinator(vec![vector, web]);

        let outcome = c.run(QueryClass::SimpleLegal, &variants(), far_deadline()).await;

        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].timed_out);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.final_state(), Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_deadline_stops_chain() {
        let vector = FakeAdapter::new(SourceKind::Vector, Behaviour::Hangs);
        let web = FakeAdapter::new(SourceKind::Web, Behaviour::Returns(Vec::new()));
        let c = coordinator(vec![vector, web.clone()]);

        let deadline = Instant::now() + Duration::from_secs(2);
        let outcome = c.run(QueryClass::SimpleLegal, &variants(), deadline).await;

        assert!(outcome.deadline_exceeded);
        assert_eq!(web.calls(), 0);
        assert_eq!(outcome.trace, vec![NotStarted, TryVector, Merged, Done]);
        assert!(!outcome.exhausted());
        assert!(outcome.candidates.is_empty());
        assert!(!outcome.sufficient);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_after_sole_adapter_is_not_exhaustion() {
        let vector = FakeAdapter::new(SourceKind::Vector, Behaviour::Hangs);
        let c = coordinator(vec![vector.clone()]);

        let deadline = Instant::now() + Duration::from_secs(2);
        let outcome = c.run(QueryClass::SimpleLegal, &variants(), deadline).await;

        assert_eq!(vector.calls(), 1);
        assert!(outcome.failures[0].timed_out);
        assert_eq!(outcome.final_state(), Done);
    }

    #[tokio::test]
    async fn test_complex_questions_need_more_coverage() {
        let vector = FakeAdapter::new(
            SourceKind::Vector,
            Behaviour::Returns(vec![passage(SourceKind::Vector, "Điều 5", "5", 0.9)]),
        );
        let graph = FakeAdapter::new(
            SourceKind::Graph,
            Behaviour::Returns(vec![
                passage(SourceKind::Graph, "Điều 6", "6", 0.5),
                passage(SourceKind::Graph, "Điều 7", "7", 0.5),
            ]),
        );
        let c = coordinator(vec![vector.clone(), graph.clone()]);

        let outcome = c.run(QueryClass::ComplexLegal, &variants(), far_deadline()).await;
        assert_eq!(outcome.trace, vec![NotStarted, TryVector, TryGraph, Merged, Done]);
        assert_eq!(outcome.candidates.len(), 3);
        assert!(outcome.sufficient);
    }

    #[test]
    fn test_merge_prefers_higher_priority_duplicate() {
        let graph = passage(SourceKind::Graph, "Nội dung từ đồ thị", "5", 0.4);
        let vector = passage(SourceKind::Vector, "Nội dung từ chỉ mục", "5", 0.9);
        let other = passage(SourceKind::Vector, "Điều 6", "6", 0.7);

        let merged = merge(vec![graph, vector, other]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.passages[0].source_kind, SourceKind::Vector);
        assert!((merged.passages[0].raw_score - 0.9).abs() < 1e-6);
        assert_eq!(merged.passages[1].citation.article.as_deref(), Some("6"));
    }

    #[test]
    fn test_merge_drops_near_duplicate_content() {
        let a = Passage::new(SourceKind::Web, "Phạt  tiền, 400.000 đồng!", Citation::web("https://a.vn"), 0.6);
        let b = Passage::new(SourceKind::Graph, "phạt tiền 400.000 đồng", Citation::default(), 0.5);
        let merged = merge(vec![b, a]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.passages[0].source_kind, SourceKind::Web);
    }
}
