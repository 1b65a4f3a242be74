//! Core types - Shared data model for the retrieval pipeline
//!
//! These types flow between the memory store, the query transformer, the
//! source adapters, the fallback coordinator, the reranker and the semantic
//! cache. Adapter-specific shapes never leave the adapter boundary; everything
//! downstream sees a [`Passage`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::citation::Citation;

/// Session identifier
pub type SessionId = String;

// ============================================================================
// Conversation
// ============================================================================

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person asking
    User,
    /// The pipeline's answer
    Assistant,
}

impl Role {
    /// Stable string form used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(crate::Error::InvalidInput(format!("Unknown role: {}", other))),
        }
    }
}

/// One conversational turn. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Owning session
    pub session_id: SessionId,
    /// Position within the session, assigned by the memory store on append
    pub turn_index: u64,
    /// Speaker
    pub role: Role,
    /// Raw text
    pub text: String,
    /// When the turn was written
    pub timestamp: DateTime<Utc>,
    /// Legal entities mentioned in the turn, if extracted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_entities: Option<Vec<String>>,
}

impl Turn {
    /// Create a new turn; `turn_index` is assigned on append
    pub fn new(session_id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Turn {
            session_id: session_id.into(),
            turn_index: 0,
            role,
            text: text.into(),
            timestamp: Utc::now(),
            extracted_entities: None,
        }
    }

    /// Create a user turn
    pub fn user(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(session_id, Role::User, text)
    }

    /// Create an assistant turn
    pub fn assistant(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(session_id, Role::Assistant, text)
    }

    /// Attach extracted entities
    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.extracted_entities = if entities.is_empty() { None } else { Some(entities) };
        self
    }
}

/// A conversation session, the unit of short-term memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier
    pub session_id: SessionId,
    /// Identity linking sessions for cross-session recall
    pub user_identity: Option<String>,
    /// Creation time (first turn)
    pub created_at: DateTime<Utc>,
    /// Time of the latest turn
    pub last_active_at: DateTime<Utc>,
    /// Archived after inactivity; never deleted
    #[serde(default)]
    pub archived: bool,
    /// Ordered turns
    pub turns: Vec<Turn>,
}

impl Session {
    /// Create an empty session
    pub fn new(session_id: impl Into<String>, user_identity: Option<String>) -> Self {
        let now = Utc::now();
        Session {
            session_id: session_id.into(),
            user_identity,
            created_at: now,
            last_active_at: now,
            archived: false,
            turns: Vec::new(),
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Why a query variant exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RationaleTag {
    /// The question exactly as asked
    Verbatim,
    /// Anaphora/ellipsis replaced with the antecedent from context
    ContextResolved,
    /// The current facet carried over onto the previous topic
    FacetCarryover,
    /// Reduced to its key legal terms
    Narrowed,
    /// Expanded with synonyms
    Broadened,
}

impl fmt::Display for RationaleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RationaleTag::Verbatim => "verbatim",
            RationaleTag::ContextResolved => "context_resolved",
            RationaleTag::FacetCarryover => "facet_carryover",
            RationaleTag::Narrowed => "narrowed",
            RationaleTag::Broadened => "broadened",
        };
        f.write_str(s)
    }
}

/// One reformulation of a user question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryVariant {
    /// The question as the user wrote it
    pub original_text: String,
    /// Text sent to retrieval
    pub transformed_text: String,
    /// Framing used
    pub rationale_tag: RationaleTag,
}

impl QueryVariant {
    /// The verbatim variant
    pub fn verbatim(question: &str) -> Self {
        QueryVariant {
            original_text: question.to_string(),
            transformed_text: question.to_string(),
            rationale_tag: RationaleTag::Verbatim,
        }
    }

    /// A reformulated variant
    pub fn new(question: &str, transformed: impl Into<String>, tag: RationaleTag) -> Self {
        QueryVariant {
            original_text: question.to_string(),
            transformed_text: transformed.into(),
            rationale_tag: tag,
        }
    }
}

/// Classification label from the guardrail classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryClass {
    /// Small talk
    Greeting,
    /// Single-regulation question
    SimpleLegal,
    /// Multi-hop or comparative question
    ComplexLegal,
    /// Current events or uncovered topic
    WebSearch,
    /// Not a legal question
    OutOfDomain,
    /// Classifier could not decide
    Ambiguous,
}

impl QueryClass {
    /// Non-substantive classes bypass retrieval entirely
    pub fn bypasses_retrieval(&self) -> bool {
        matches!(self, QueryClass::Greeting | QueryClass::OutOfDomain)
    }
}

impl fmt::Display for QueryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryClass::Greeting => "GREETING",
            QueryClass::SimpleLegal => "SIMPLE_LEGAL",
            QueryClass::ComplexLegal => "COMPLEX_LEGAL",
            QueryClass::WebSearch => "WEB_SEARCH",
            QueryClass::OutOfDomain => "OUT_OF_DOMAIN",
            QueryClass::Ambiguous => "AMBIGUOUS",
        };
        f.write_str(s)
    }
}

impl FromStr for QueryClass {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GREETING" => Ok(QueryClass::Greeting),
            "SIMPLE_LEGAL" => Ok(QueryClass::SimpleLegal),
            "COMPLEX_LEGAL" => Ok(QueryClass::ComplexLegal),
            "WEB_SEARCH" => Ok(QueryClass::WebSearch),
            "OUT_OF_DOMAIN" => Ok(QueryClass::OutOfDomain),
            "AMBIGUOUS" => Ok(QueryClass::Ambiguous),
            other => Err(crate::Error::InvalidInput(format!("Unknown query class: {}", other))),
        }
    }
}

// ============================================================================
// Retrieval
// ============================================================================

/// Which backend produced a passage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Structured embedding index
    Vector,
    /// Live web search
    Web,
    /// Knowledge graph traversal
    Graph,
}

impl SourceKind {
    /// Default fallback chain order
    pub const CHAIN: [SourceKind; 3] = [SourceKind::Vector, SourceKind::Web, SourceKind::Graph];

    /// Merge priority; lower wins on duplicate citations
    pub fn priority(&self) -> u8 {
        match self {
            SourceKind::Vector => 0,
            SourceKind::Web => 1,
            SourceKind::Graph => 2,
        }
    }

    /// Stable string form
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Vector => "vector",
            SourceKind::Web => "web",
            SourceKind::Graph => "graph",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized retrieved content unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Producing backend
    pub source_kind: SourceKind,
    /// Passage text
    pub content: String,
    /// Legal citation or web origin
    pub citation: Citation,
    /// Backend-native score, normalized to [0, 1]
    pub raw_score: f32,
    /// When the backend returned it
    pub retrieved_at: DateTime<Utc>,
    /// The adapter invocation that produced it, stamped by the coordinator
    #[serde(default = "Uuid::nil")]
    pub call_id: Uuid,
}

impl Passage {
    /// Create a new passage retrieved now
    pub fn new(
        source_kind: SourceKind,
        content: impl Into<String>,
        citation: Citation,
        raw_score: f32,
    ) -> Self {
        Passage {
            source_kind,
            content: content.into(),
            citation,
            raw_score: raw_score.clamp(0.0, 1.0),
            retrieved_at: Utc::now(),
            call_id: Uuid::nil(),
        }
    }
}

/// Merged, deduplicated passages for one request in source-priority order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    /// Passages, vector first, then web, then graph
    pub passages: Vec<Passage>,
}

impl CandidateSet {
    /// Number of passages
    pub fn len(&self) -> usize {
        self.passages.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

/// A passage with its relevance to the original question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPassage {
    /// The passage
    pub passage: Passage,
    /// Reranker score in [0, 1]
    pub relevance_score: f32,
}

/// Reranked candidates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedSet {
    /// Passages, best first
    pub passages: Vec<RankedPassage>,
    /// Top score reached the confidence threshold
    pub sufficient: bool,
}

impl RankedSet {
    /// Highest relevance score, if any
    pub fn top_score(&self) -> Option<f32> {
        self.passages.first().map(|p| p.relevance_score)
    }

    /// Distinct citations in rank order
    pub fn citations(&self) -> Vec<Citation> {
        let mut seen = std::collections::HashSet::new();
        self.passages
            .iter()
            .map(|p| &p.passage.citation)
            .filter(|c| !c.is_empty())
            .filter(|c| seen.insert(c.normalized_key().unwrap_or_else(|| c.to_string())))
            .cloned()
            .collect()
    }
}

// ============================================================================
// Cache
// ============================================================================

/// A cached answer bundle keyed by a semantic fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Entry identifier
    pub id: Uuid,
    /// Embedding of the canonical query
    pub fingerprint: Vec<f32>,
    /// Normalized question that produced the answer
    pub canonical_query: String,
    /// Generated answer
    pub answer_text: String,
    /// Citations backing the answer
    pub supporting_citations: Vec<Citation>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last time a lookup returned this entry
    pub last_hit_at: Option<DateTime<Utc>>,
    /// Number of lookups served
    pub hit_count: u64,
    /// A cited document changed status
    #[serde(default)]
    pub stale: bool,
}

impl CacheEntry {
    /// Create a fresh entry
    pub fn new(
        fingerprint: Vec<f32>,
        canonical_query: impl Into<String>,
        answer_text: impl Into<String>,
        supporting_citations: Vec<Citation>,
    ) -> Self {
        CacheEntry {
            id: Uuid::new_v4(),
            fingerprint,
            canonical_query: canonical_query.into(),
            answer_text: answer_text.into(),
            supporting_citations,
            created_at: Utc::now(),
            last_hit_at: None,
            hit_count: 0,
            stale: false,
        }
    }

    /// Whether any supporting citation falls under `target`
    pub fn cites(&self, target: &Citation) -> bool {
        self.supporting_citations.iter().any(|c| c.falls_under(target))
    }
}

/// Aggregate cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries currently held
    pub total_entries: u64,
    /// Entries flagged stale
    pub stale_entries: u64,
    /// Sum of hit counts
    pub total_hits: u64,
    /// Most frequently served canonical query
    pub most_hit: Option<String>,
}

impl CacheStats {
    /// Average hits per entry
    pub fn efficiency(&self) -> f64 {
        if self.total_entries == 0 {
            0.0
        } else {
            self.total_hits as f64 / self.total_entries as f64
        }
    }
}

/// Cosine similarity of two vectors; 0.0 on length mismatch or zero norm
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_class_round_trip() {
        for class in [
            QueryClass::Greeting,
            QueryClass::SimpleLegal,
            QueryClass::ComplexLegal,
            QueryClass::WebSearch,
            QueryClass::OutOfDomain,
            QueryClass::Ambiguous,
        ] {
            assert_eq!(class.to_string().parse::<QueryClass>().unwrap(), class);
        }
        assert_eq!(" simple_legal ".parse::<QueryClass>().unwrap(), QueryClass::SimpleLegal);
    }

    #[test]
    fn test_bypass_classes() {
        assert!(QueryClass::Greeting.bypasses_retrieval());
        assert!(QueryClass::OutOfDomain.bypasses_retrieval());
        assert!(!QueryClass::Ambiguous.bypasses_retrieval());
    }

    #[test]
    fn test_source_priority_order() {
        let mut kinds = vec![SourceKind::Graph, SourceKind::Vector, SourceKind::Web];
        kinds.sort_by_key(|k| k.priority());
        assert_eq!(kinds, SourceKind::CHAIN.to_vec());
    }

    #[test]
    fn test_passage_score_clamped() {
        let p = Passage::new(SourceKind::Web, "x", Citation::default(), 1.7);
        assert_eq!(p.raw_score, 1.0);
        assert!(p.call_id.is_nil());
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_cache_stats_efficiency() {
        let stats = CacheStats {
            total_entries: 4,
            total_hits: 10,
            ..Default::default()
        };
        assert!((stats.efficiency() - 2.5).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().efficiency(), 0.0);
    }
}
