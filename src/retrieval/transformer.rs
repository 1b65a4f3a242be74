//! Query transformer
//!
//! Rewrites a user question into retrieval variants using conversational
//! context. The verbatim question is always the first variant; further
//! variants resolve anaphora ("nó", "trường hợp đó"), carry the previous
//! facet over to a new topic ("Còn ... thì sao?"), narrow to key terms, or
//! broaden with synonyms.
//!
//! Antecedents are weighted by recency: the most recent user turn weighs 1,
//! each earlier turn is multiplied by `recency_decay`, and long-term turns
//! from earlier sessions always rank below short-term ones.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::config::TransformerConfig;
use crate::core::{QueryVariant, RationaleTag, Role, Turn};
use crate::retrieval::lexicon::{self, Analysis, EntityCategory};

/// Long-term turns count this much less than the oldest short-term turn
const CROSS_SESSION_PENALTY: f32 = 0.5;

/// Result of transforming one question
#[derive(Debug, Clone, Default)]
pub struct Transformation {
    /// Variants, verbatim first
    pub variants: Vec<QueryVariant>,
    /// Entities the question is about once context is applied; stored on the user turn
    pub resolved_entities: Vec<String>,
    /// Competing antecedents when resolution was ambiguous
    pub ambiguous: Option<Vec<String>>,
}

impl Transformation {
    /// Text used as the cache key and for generator context
    pub fn canonical_query(&self) -> &str {
        self.variants
            .iter()
            .find(|v| v.rationale_tag == RationaleTag::FacetCarryover)
            .or_else(|| self.variants.first())
            .map(|v| v.transformed_text.as_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    entity: String,
    category: EntityCategory,
    weight: f32,
    order: usize,
}

/// Context-aware query rewriter
#[derive(Debug, Clone)]
pub struct QueryTransformer {
    config: TransformerConfig,
}

impl Default for QueryTransformer {
    fn default() -> Self {
        Self::new(TransformerConfig::default())
    }
}

impl QueryTransformer {
    /// Create a new transformer
    pub fn new(config: TransformerConfig) -> Self {
        Self { config }
    }

    /// Variants for a question given short-term turns (most recent first)
    pub fn transform(&self, question: &str, context_turns: &[Turn]) -> Vec<QueryVariant> {
        self.transform_with_history(question, context_turns, &[]).variants
    }

    /// Full transformation including long-term turns from earlier sessions
    pub fn transform_with_history(
        &self,
        question: &str,
        context_turns: &[Turn],
        long_term_turns: &[Turn],
    ) -> Transformation {
        let question = question.trim();
        let analysis = lexicon::analyze(question);
        let mut variants = vec![QueryVariant::verbatim(question)];

        let candidates = self.candidates(context_turns, long_term_turns, &analysis);
        let bind = !candidates.is_empty() && self.should_bind(&analysis);

        let (resolutions, ambiguous) = if bind {
            self.resolve(&analysis, &candidates)
        } else {
            (Vec::new(), None)
        };

        for resolution in &resolutions {
            variants.push(QueryVariant::new(
                question,
                substitute(question, &analysis, resolution),
                RationaleTag::ContextResolved,
            ));
        }

        let facet = analysis
            .facets
            .first()
            .cloned()
            .or_else(|| if bind { previous_facet(context_turns, long_term_turns) } else { None });

        // Entities of the question plus whatever the first resolution carries
        // for categories the question does not mention itself
        let mut effective = analysis.entities.clone();
        if let Some(resolution) = resolutions.first() {
            let covered: HashSet<EntityCategory> =
                analysis.entities.iter().map(|e| lexicon::category_of(e)).collect();
            if ambiguous.is_none() || !analysis.entities.is_empty() {
                for entity in resolution {
                    if !covered.contains(&lexicon::category_of(entity)) && !effective.contains(entity) {
                        effective.push(entity.clone());
                    }
                }
            }
        }

        if bind && !effective.is_empty() {
            variants.push(QueryVariant::new(
                question,
                join_terms(facet.as_deref(), &effective),
                RationaleTag::FacetCarryover,
            ));
        }

        let narrowed_terms = if bind { &effective } else { &analysis.entities };
        let mut narrowed_facets: Vec<&str> = analysis.facets.iter().map(String::as_str).collect();
        if narrowed_facets.is_empty() {
            narrowed_facets.extend(facet.as_deref());
        }
        if !narrowed_terms.is_empty() || !narrowed_facets.is_empty() {
            let mut parts: Vec<&str> = narrowed_facets.clone();
            parts.extend(narrowed_terms.iter().map(String::as_str));
            variants.push(QueryVariant::new(question, parts.join(" "), RationaleTag::Narrowed));
        }

        let base = variants
            .iter()
            .rev()
            .find(|v| v.rationale_tag == RationaleTag::FacetCarryover)
            .map(|v| v.transformed_text.clone())
            .unwrap_or_else(|| question.to_string());
        let expansions: Vec<&str> = narrowed_facets
            .iter()
            .copied()
            .chain(narrowed_terms.iter().map(String::as_str))
            .flat_map(lexicon::synonyms)
            .copied()
            .filter(|syn| !lexicon::mentions(&base, syn))
            .collect();
        if !expansions.is_empty() {
            variants.push(QueryVariant::new(
                question,
                format!("{} {}", base, expansions.join(" ")),
                RationaleTag::Broadened,
            ));
        }

        let variants = dedup_and_cap(variants, self.config.max_variants.max(1));

        let resolved_entities = if ambiguous.is_some() {
            analysis.entities.clone()
        } else {
            effective
        };

        debug!(
            "Transformed question into {} variants (bound: {}, ambiguous: {})",
            variants.len(),
            bind,
            ambiguous.is_some()
        );

        Transformation {
            variants,
            resolved_entities,
            ambiguous,
        }
    }

    /// Bind to context on continuation markers, pronouns, or ellipsis.
    /// New entities without any marker are a topic switch.
    fn should_bind(&self, analysis: &Analysis) -> bool {
        if analysis.is_anaphoric() {
            return true;
        }
        analysis.entities.is_empty() && !analysis.facets.is_empty() && analysis.word_count <= 8
    }

    fn candidates(
        &self,
        context_turns: &[Turn],
        long_term_turns: &[Turn],
        analysis: &Analysis,
    ) -> Vec<Candidate> {
        let decay = self.config.recency_decay.clamp(0.0, 1.0);
        let mut best: HashMap<String, Candidate> = HashMap::new();
        let mut order = 0usize;

        let short = context_turns.iter().filter(|t| t.role == Role::User);
        let short_count = short.clone().count();
        let long = long_term_turns.iter().filter(|t| t.role == Role::User);

        let weighted = short
            .enumerate()
            .map(|(i, t)| (t, decay.powi(i as i32)))
            .chain(long.enumerate().map(|(i, t)| {
                (t, decay.powi((short_count + i) as i32) * CROSS_SESSION_PENALTY)
            }));

        for (turn, weight) in weighted {
            for entity in turn_entities(turn) {
                if analysis.entities.contains(&entity) {
                    continue;
                }
                order += 1;
                let category = lexicon::category_of(&entity);
                best.entry(entity.clone())
                    .and_modify(|c| c.weight = c.weight.max(weight))
                    .or_insert(Candidate {
                        entity,
                        category,
                        weight,
                        order,
                    });
            }
        }

        let mut candidates: Vec<Candidate> = best.into_values().collect();
        candidates.sort_by(|a, b| b.weight.total_cmp(&a.weight).then(a.order.cmp(&b.order)));
        candidates
    }

    /// One resolution per plausible antecedent set. Several resolutions are
    /// returned only when a pronoun has competing same-category antecedents.
    fn resolve(
        &self,
        analysis: &Analysis,
        candidates: &[Candidate],
    ) -> (Vec<Vec<String>>, Option<Vec<String>>) {
        let margin = self.config.ambiguity_margin.max(0.0);
        let Some(top) = candidates.first().map(|c| c.weight) else {
            return (Vec::new(), None);
        };

        // Categories in play are those whose best candidate is close to the overall best
        let mut per_category: Vec<(EntityCategory, Vec<&Candidate>)> = Vec::new();
        for candidate in candidates.iter().filter(|c| top - c.weight <= margin) {
            match per_category.iter_mut().find(|(cat, _)| *cat == candidate.category) {
                Some((_, list)) => list.push(candidate),
                None => per_category.push((candidate.category, vec![candidate])),
            }
        }

        let base: Vec<String> = per_category
            .iter()
            .map(|(_, list)| list[0].entity.clone())
            .collect();

        let competing = per_category
            .iter()
            .find(|(cat, list)| *cat != EntityCategory::Document && list.len() > 1);

        match competing {
            Some((category, list)) if analysis.entities.is_empty() => {
                let alternatives: Vec<String> = list.iter().map(|c| c.entity.clone()).collect();
                let resolutions = alternatives
                    .iter()
                    .map(|alt| {
                        per_category
                            .iter()
                            .map(|(cat, list)| {
                                if cat == category {
                                    alt.clone()
                                } else {
                                    list[0].entity.clone()
                                }
                            })
                            .collect()
                    })
                    .collect();
                (resolutions, Some(alternatives))
            }
            Some((category, list)) => {
                // The question names its own entity; keep the whole previous topic
                let mut all = base;
                for c in list.iter().skip(1) {
                    if c.category == *category {
                        all.push(c.entity.clone());
                    }
                }
                (vec![all], None)
            }
            None => (vec![base], None),
        }
    }
}

/// Entities mentioned by a turn, using stored extraction when present
fn turn_entities(turn: &Turn) -> Vec<String> {
    match &turn.extracted_entities {
        Some(entities) => entities.clone(),
        None => lexicon::analyze(&turn.text).entities,
    }
}

fn previous_facet(context_turns: &[Turn], long_term_turns: &[Turn]) -> Option<String> {
    context_turns
        .iter()
        .chain(long_term_turns.iter())
        .filter(|t| t.role == Role::User)
        .find_map(|t| lexicon::analyze(&t.text).facets.into_iter().next())
}

/// Replace the pronoun with the antecedent, or append the antecedent
fn substitute(question: &str, analysis: &Analysis, resolution: &[String]) -> String {
    let antecedent = resolution.join(" ");
    match analysis.pronoun {
        Some((start, end)) if analysis.entities.is_empty() => {
            format!("{}{}{}", &question[..start], antecedent, &question[end..])
        }
        _ => format!("{} (liên quan: {})", question, resolution.join(", ")),
    }
}

fn join_terms(facet: Option<&str>, entities: &[String]) -> String {
    facet
        .into_iter()
        .chain(entities.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop variants with duplicate text, keep the first `cap`. Context-resolved
/// alternatives are ordered right after the verbatim variant so they survive.
fn dedup_and_cap(variants: Vec<QueryVariant>, cap: usize) -> Vec<QueryVariant> {
    let mut seen = HashSet::new();
    variants
        .into_iter()
        .filter(|v| seen.insert(normalize(&v.transformed_text)))
        .take(cap)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(text: &str) -> Turn {
        Turn::user("s1", text)
    }

    fn assistant(text: &str) -> Turn {
        Turn::new("s1", Role::Assistant, text)
    }

    fn tags(variants: &[QueryVariant]) -> Vec<RationaleTag> {
        variants.iter().map(|v| v.rationale_tag).collect()
    }

    #[test]
    fn test_verbatim_always_first() {
        let transformer = QueryTransformer::default();
        for question in ["Mức phạt vượt đèn đỏ?", "Nó thì sao?", "xin chào"] {
            let variants = transformer.transform(question, &[]);
            assert!(!variants.is_empty());
            assert_eq!(variants[0].rationale_tag, RationaleTag::Verbatim);
            assert_eq!(variants[0].transformed_text, question);
        }
    }

    #[test]
    fn test_continuation_references_previous_topic() {
        let transformer = QueryTransformer::default();
        // Most recent first
        let context = vec![
            assistant("Người điều khiển xe máy không đội mũ bảo hiểm bị phạt tiền..."),
            user("Mức phạt không đội mũ bảo hiểm?"),
        ];
        let result =
            transformer.transform_with_history("Còn nếu không có bằng lái thì sao?", &context, &[]);

        assert!(result
            .variants
            .iter()
            .any(|v| v.rationale_tag == RationaleTag::ContextResolved
                && v.transformed_text.contains("mũ bảo hiểm")));

        let carryover = result
            .variants
            .iter()
            .find(|v| v.rationale_tag == RationaleTag::FacetCarryover)
            .unwrap();
        assert_eq!(carryover.transformed_text, "mức phạt giấy phép lái xe");
        assert!(result.ambiguous.is_none());
        assert_eq!(result.canonical_query(), "mức phạt giấy phép lái xe");
    }

    #[test]
    fn test_pronoun_substitution() {
        let transformer = QueryTransformer::default();
        let context = vec![user("Vượt đèn đỏ bằng xe máy bị phạt bao nhiêu?")];
        let result = transformer.transform_with_history("Nó có bị trừ điểm không?", &context, &[]);

        let resolved = &result.variants[1];
        assert_eq!(resolved.rationale_tag, RationaleTag::ContextResolved);
        assert_eq!(resolved.transformed_text, "vượt đèn đỏ xe máy có bị trừ điểm không?");
        assert_eq!(result.resolved_entities, vec!["vượt đèn đỏ", "xe máy"]);
    }

    #[test]
    fn test_topic_switch_does_not_bind() {
        let transformer = QueryTransformer::default();
        let context = vec![user("Mức phạt không đội mũ bảo hiểm?")];
        let variants = transformer.transform("Mức phạt vượt đèn đỏ là bao nhiêu?", &context);

        assert!(!variants.iter().any(|v| v.transformed_text.contains("mũ bảo hiểm")));
        assert!(!tags(&variants).contains(&RationaleTag::ContextResolved));
    }

    #[test]
    fn test_ambiguous_antecedents_emit_both() {
        let transformer = QueryTransformer::default();
        let context = vec![user("Vượt đèn đỏ và không đội mũ bảo hiểm phạt bao nhiêu?")];
        let result = transformer.transform_with_history("Nó có bị trừ điểm không?", &context, &[]);

        let ambiguous = result.ambiguous.clone().unwrap();
        assert_eq!(ambiguous, vec!["vượt đèn đỏ", "mũ bảo hiểm"]);

        let resolved: Vec<&str> = result
            .variants
            .iter()
            .filter(|v| v.rationale_tag == RationaleTag::ContextResolved)
            .map(|v| v.transformed_text.as_str())
            .collect();
        assert_eq!(
            resolved,
            vec!["vượt đèn đỏ có bị trừ điểm không?", "mũ bảo hiểm có bị trừ điểm không?"]
        );
    }

    #[test]
    fn test_recent_turn_outweighs_older() {
        let transformer = QueryTransformer::default();
        let context = vec![
            user("Phạt nồng độ cồn thế nào?"),
            user("Phạt không đội mũ bảo hiểm thế nào?"),
        ];
        let result = transformer.transform_with_history("Nó bị trừ mấy điểm?", &context, &[]);
        assert!(result.ambiguous.is_none());
        assert_eq!(result.variants[1].transformed_text, "nồng độ cồn bị trừ mấy điểm?");
    }

    #[test]
    fn test_short_term_beats_cross_session() {
        let transformer = QueryTransformer::default();
        let short = vec![user("Phạt quá tốc độ bao nhiêu?")];
        let long = vec![user("Phạt không đội mũ bảo hiểm bao nhiêu?")];
        let result = transformer.transform_with_history("Nó bị trừ mấy điểm?", &short, &long);
        assert_eq!(result.variants[1].transformed_text, "quá tốc độ bị trừ mấy điểm?");

        // Without short-term context the long-term turn still resolves
        let result = transformer.transform_with_history("Nó bị trừ mấy điểm?", &[], &long);
        assert_eq!(result.variants[1].transformed_text, "mũ bảo hiểm bị trừ mấy điểm?");
    }

    #[test]
    fn test_ellipsis_binds_without_marker() {
        let transformer = QueryTransformer::default();
        let context = vec![user("Không đội mũ bảo hiểm phạt bao nhiêu?")];
        let variants = transformer.transform("Bị trừ mấy điểm?", &context);
        assert!(variants
            .iter()
            .any(|v| v.rationale_tag == RationaleTag::FacetCarryover
                && v.transformed_text == "trừ điểm mũ bảo hiểm"));
    }

    #[test]
    fn test_stored_entities_are_used() {
        let transformer = QueryTransformer::default();
        let context = vec![user("Còn cái đó thì sao?").with_entities(vec!["nồng độ cồn".into()])];
        let result = transformer.transform_with_history("Nó bị trừ mấy điểm?", &context, &[]);
        assert_eq!(result.variants[1].transformed_text, "nồng độ cồn bị trừ mấy điểm?");
    }

    #[test]
    fn test_broadened_and_capped() {
        let transformer = QueryTransformer::new(TransformerConfig {
            max_variants: 2,
            ..Default::default()
        });
        let variants = transformer.transform("Mức phạt không đội mũ bảo hiểm?", &[]);
        assert_eq!(variants.len(), 2);
        assert_eq!(tags(&variants), vec![RationaleTag::Verbatim, RationaleTag::Narrowed]);

        let variants = QueryTransformer::default().transform("Mức phạt không đội mũ bảo hiểm?", &[]);
        let broadened = variants
            .iter()
            .find(|v| v.rationale_tag == RationaleTag::Broadened)
            .unwrap();
        assert!(broadened.transformed_text.contains("nón bảo hiểm"));
    }

    #[test]
    fn test_out_of_vocabulary_question_is_verbatim_only() {
        let variants = QueryTransformer::default().transform("Công thức nấu phở là gì?", &[]);
        assert_eq!(tags(&variants), vec![RationaleTag::Verbatim]);
    }
}
