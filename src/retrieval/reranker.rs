//! Reranking
//!
//! Scores merged candidates against the user's original question, not the
//! transformed variants, so that the answer stays anchored to what was
//! asked. Embedding similarity is the primary signal; when the embedder
//! fails the lexical scorer takes over for that request.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::core::{cosine_similarity, CandidateSet, Embedder, Passage, RankedPassage, RankedSet};
use crate::error::Result;
use crate::retrieval::lexicon;

/// Share of the lexical score carried by lexicon key terms
const KEY_TERM_WEIGHT: f32 = 0.4;

/// Relevance of passages to a question, each in [0, 1]
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Score every passage; output order matches input
    async fn score(&self, question: &str, passages: &[Passage]) -> Result<Vec<f32>>;
}

/// Token and key-term overlap
#[derive(Debug, Clone, Default)]
pub struct LexicalScorer;

impl LexicalScorer {
    fn score_one(question: &str, key_terms: &[String], passage: &str) -> f32 {
        let wanted = lexicon::content_tokens(question);
        if wanted.is_empty() {
            return 0.0;
        }
        let present = lexicon::content_tokens(passage);
        let overlap = wanted.intersection(&present).count() as f32 / wanted.len() as f32;

        if key_terms.is_empty() {
            return overlap;
        }
        let matched = key_terms
            .iter()
            .filter(|t| lexicon::mentions(passage, t))
            .count() as f32
            / key_terms.len() as f32;
        (1.0 - KEY_TERM_WEIGHT) * overlap + KEY_TERM_WEIGHT * matched
    }
}

#[async_trait]
impl RelevanceScorer for LexicalScorer {
    async fn score(&self, question: &str, passages: &[Passage]) -> Result<Vec<f32>> {
        let analysis = lexicon::analyze(question);
        let key_terms: Vec<String> = analysis
            .entities
            .into_iter()
            .chain(analysis.facets)
            .collect();
        Ok(passages
            .iter()
            .map(|p| Self::score_one(question, &key_terms, &p.content))
            .collect())
    }
}

/// Cosine similarity between question and passage embeddings
pub struct EmbeddingScorer {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingScorer {
    /// Create a scorer over an embedder
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl RelevanceScorer for EmbeddingScorer {
    async fn score(&self, question: &str, passages: &[Passage]) -> Result<Vec<f32>> {
        let query = self.embedder.embed(question).await?;
        let texts: Vec<String> = passages.iter().map(|p| p.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        Ok(vectors
            .iter()
            .map(|v| cosine_similarity(&query, v).clamp(0.0, 1.0))
            .collect())
    }
}

/// Orders candidates by relevance and decides confidence
pub struct Reranker {
    scorer: Arc<dyn RelevanceScorer>,
    fallback: LexicalScorer,
    top_n: usize,
    threshold: f32,
}

impl Reranker {
    /// Create a reranker keeping `top_n` passages
    pub fn new(scorer: Arc<dyn RelevanceScorer>, top_n: usize, threshold: f32) -> Self {
        Self {
            scorer,
            fallback: LexicalScorer,
            top_n,
            threshold,
        }
    }

    /// Lexical-only reranker
    pub fn lexical(top_n: usize, threshold: f32) -> Self {
        Self::new(Arc::new(LexicalScorer), top_n, threshold)
    }

    /// Rank candidates for the original question.
    ///
    /// The sort is stable, so ties keep source-priority order. The set is
    /// `sufficient` when the best passage reaches the threshold.
    pub async fn rerank(&self, original_question: &str, candidates: CandidateSet) -> RankedSet {
        if candidates.is_empty() {
            return RankedSet::default();
        }

        let scores = match self.scorer.score(original_question, &candidates.passages).await {
            Ok(scores) if scores.len() == candidates.len() => scores,
            Ok(_) => {
                warn!("Scorer returned a mismatched score count, using lexical scoring");
                self.lexical_scores(original_question, &candidates.passages).await
            }
            Err(e) => {
                warn!("Scorer failed, using lexical scoring: {}", e);
                self.lexical_scores(original_question, &candidates.passages).await
            }
        };

        self.order(candidates, scores)
    }

    /// Rank with token overlap only, for requests with no time left to embed
    pub async fn rerank_lexical(&self, original_question: &str, candidates: CandidateSet) -> RankedSet {
        if candidates.is_empty() {
            return RankedSet::default();
        }
        let scores = self.lexical_scores(original_question, &candidates.passages).await;
        self.order(candidates, scores)
    }

    fn order(&self, candidates: CandidateSet, scores: Vec<f32>) -> RankedSet {
        let mut ranked: Vec<RankedPassage> = candidates
            .passages
            .into_iter()
            .zip(scores)
            .map(|(passage, score)| RankedPassage {
                passage,
                relevance_score: score.clamp(0.0, 1.0),
            })
            .collect();
        ranked.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        ranked.truncate(self.top_n.max(1));

        let sufficient = ranked
            .first()
            .is_some_and(|p| p.relevance_score >= self.threshold);

        RankedSet {
            passages: ranked,
            sufficient,
        }
    }

    async fn lexical_scores(&self, question: &str, passages: &[Passage]) -> Vec<f32> {
        self.fallback
            .score(question, passages)
            .await
            .unwrap_or_else(|_| vec![0.0; passages.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Citation, SourceKind};
    use crate::error::Error;

    fn candidates(contents: &[&str]) -> CandidateSet {
        CandidateSet {
            passages: contents
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    Passage::new(
                        SourceKind::Vector,
                        *c,
                        Citation::law("Nghị định 100/2019/NĐ-CP").with_article((i + 1).to_string()),
                        0.5,
                    )
                })
                .collect(),
        }
    }

    struct FailingScorer;

    #[async_trait]
    impl RelevanceScorer for FailingScorer {
        async fn score(&self, _question: &str, _passages: &[Passage]) -> Result<Vec<f32>> {
            Err(Error::Embedding("model not loaded".into()))
        }
    }

    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(if text.contains("mũ") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn test_lexical_ranking_prefers_matching_passage() {
        let reranker = Reranker::lexical(5, 0.3);
        let set = candidates(&[
            "Phạt tiền người điều khiển xe ô tô chạy quá tốc độ",
            "Phạt tiền người không đội mũ bảo hiểm khi điều khiển xe máy",
        ]);
        let ranked = reranker.rerank("Mức phạt không đội mũ bảo hiểm?", set).await;

        assert_eq!(ranked.passages[0].passage.citation.article.as_deref(), Some("2"));
        assert!(ranked.passages[0].relevance_score > ranked.passages[1].relevance_score);
        assert!(ranked.sufficient);
    }

    #[tokio::test]
    async fn test_truncates_and_flags_low_confidence() {
        let reranker = Reranker::lexical(1, 0.99);
        let set = candidates(&["Văn bản A về đăng kiểm", "Văn bản B về thuế"]);
        let ranked = reranker.rerank("Mức phạt vượt đèn đỏ?", set).await;
        assert_eq!(ranked.passages.len(), 1);
        assert!(!ranked.sufficient);
    }

    #[tokio::test]
    async fn test_ties_keep_input_order() {
        let reranker = Reranker::lexical(5, 0.1);
        let set = candidates(&["không liên quan một", "không liên quan hai"]);
        let ranked = reranker.rerank("vượt đèn đỏ", set).await;
        let articles: Vec<_> = ranked
            .passages
            .iter()
            .map(|p| p.passage.citation.article.clone().unwrap())
            .collect();
        assert_eq!(articles, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_failing_scorer_falls_back_to_lexical() {
        let reranker = Reranker::new(Arc::new(FailingScorer), 5, 0.3);
        let set = candidates(&["Không đội mũ bảo hiểm bị phạt tiền"]);
        let ranked = reranker.rerank("không đội mũ bảo hiểm phạt bao nhiêu", set).await;
        assert_eq!(ranked.passages.len(), 1);
        assert!(ranked.passages[0].relevance_score > 0.3);
    }

    #[tokio::test]
    async fn test_embedding_scorer() {
        let reranker = Reranker::new(Arc::new(EmbeddingScorer::new(Arc::new(AxisEmbedder))), 5, 0.5);
        let set = candidates(&["quá tốc độ", "đội mũ bảo hiểm"]);
        let ranked = reranker.rerank("mũ bảo hiểm", set).await;
        assert_eq!(ranked.passages[0].passage.content, "đội mũ bảo hiểm");
        assert!((ranked.passages[0].relevance_score - 1.0).abs() < 1e-6);
        assert!(ranked.sufficient);
    }

    #[tokio::test]
    async fn test_lexical_rerank_ignores_scorer() {
        let reranker = Reranker::new(Arc::new(FailingScorer), 5, 0.3);
        let set = candidates(&["Phạt tiền xe ô tô", "Không đội mũ bảo hiểm bị phạt tiền"]);
        let ranked = reranker.rerank_lexical("không đội mũ bảo hiểm", set).await;
        assert_eq!(ranked.passages[0].passage.citation.article.as_deref(), Some("2"));
        assert!(ranked.sufficient);
    }

    #[tokio::test]
    async fn test_empty_candidates() {
        let ranked = Reranker::lexical(5, 0.3).rerank("x", CandidateSet::default()).await;
        assert!(ranked.passages.is_empty());
        assert!(!ranked.sufficient);
    }
}
