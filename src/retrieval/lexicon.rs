//! Traffic-law lexicon
//!
//! Small hand-curated vocabulary of the legal entities and question facets
//! users talk about, with the aliases they use for them. The query
//! transformer uses it to find antecedents, the classifier to recognise
//! legal questions, and the lexical scorer to weight key terms.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::core::citation::{canonical_law_code, law_title};

/// Coarse entity class; antecedents only compete within a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityCategory {
    /// What the violation is about (helmet, alcohol, red light ...)
    Subject,
    /// Kind of vehicle
    Vehicle,
    /// A specific legal document
    Document,
}

struct Entry {
    canonical: &'static str,
    category: EntityCategory,
    aliases: &'static [&'static str],
}

const ENTITIES: &[Entry] = &[
    Entry { canonical: "mũ bảo hiểm", category: EntityCategory::Subject, aliases: &["mũ bảo hiểm", "nón bảo hiểm", "helmet"] },
    Entry { canonical: "giấy phép lái xe", category: EntityCategory::Subject, aliases: &["giấy phép lái xe", "bằng lái xe", "bằng lái", "gplx", "driving license", "driver license"] },
    Entry { canonical: "nồng độ cồn", category: EntityCategory::Subject, aliases: &["nồng độ cồn", "rượu bia", "uống rượu", "uống bia", "say rượu", "alcohol"] },
    Entry { canonical: "vượt đèn đỏ", category: EntityCategory::Subject, aliases: &["vượt đèn đỏ", "đèn đỏ", "vượt đèn", "red light"] },
    Entry { canonical: "quá tốc độ", category: EntityCategory::Subject, aliases: &["chạy quá tốc độ", "quá tốc độ", "vượt tốc độ", "speeding"] },
    Entry { canonical: "điện thoại", category: EntityCategory::Subject, aliases: &["sử dụng điện thoại", "dùng điện thoại", "nghe điện thoại", "điện thoại"] },
    Entry { canonical: "đăng ký xe", category: EntityCategory::Subject, aliases: &["giấy đăng ký xe", "đăng ký xe", "cà vẹt", "biển số"] },
    Entry { canonical: "bảo hiểm bắt buộc", category: EntityCategory::Subject, aliases: &["bảo hiểm bắt buộc", "bảo hiểm trách nhiệm dân sự"] },
    Entry { canonical: "đi sai làn", category: EntityCategory::Subject, aliases: &["đi sai làn", "sai làn", "lấn làn", "đi ngược chiều", "ngược chiều"] },
    Entry { canonical: "dừng đỗ xe", category: EntityCategory::Subject, aliases: &["đỗ xe", "dừng xe", "đậu xe", "đỗ sai"] },
    Entry { canonical: "ma túy", category: EntityCategory::Subject, aliases: &["ma túy", "chất kích thích"] },
    Entry { canonical: "xe máy", category: EntityCategory::Vehicle, aliases: &["xe máy", "xe mô tô", "xe gắn máy", "mô tô", "motorbike", "motorcycle"] },
    Entry { canonical: "ô tô", category: EntityCategory::Vehicle, aliases: &["xe ô tô", "ô tô", "xe hơi", "oto", "car"] },
    Entry { canonical: "xe đạp", category: EntityCategory::Vehicle, aliases: &["xe đạp điện", "xe đạp", "bicycle"] },
    Entry { canonical: "xe tải", category: EntityCategory::Vehicle, aliases: &["xe tải", "xe container", "truck"] },
];

const FACETS: &[(&str, &[&str])] = &[
    ("mức phạt", &["mức phạt", "phạt bao nhiêu", "bị phạt", "xử phạt", "phạt tiền", "tiền phạt", "fine"]),
    ("trừ điểm", &["trừ điểm", "trừ mấy điểm", "bị trừ"]),
    ("tước giấy phép", &["tước bằng", "tước giấy phép", "tước quyền"]),
    ("tạm giữ phương tiện", &["giam xe", "tạm giữ xe", "tạm giữ phương tiện", "bị giữ xe"]),
    ("thủ tục", &["thủ tục", "hồ sơ", "cách nộp", "nộp phạt"]),
    ("điều kiện", &["điều kiện", "độ tuổi", "bao nhiêu tuổi"]),
    ("thời hạn", &["thời hạn", "bao lâu", "hết hạn"]),
];

const SYNONYMS: &[(&str, &[&str])] = &[
    ("mức phạt", &["xử phạt vi phạm hành chính", "phạt tiền"]),
    ("mũ bảo hiểm", &["nón bảo hiểm"]),
    ("giấy phép lái xe", &["bằng lái xe"]),
    ("nồng độ cồn", &["rượu bia"]),
    ("vượt đèn đỏ", &["không chấp hành hiệu lệnh của đèn tín hiệu giao thông"]),
    ("quá tốc độ", &["chạy quá tốc độ quy định"]),
    ("điện thoại", &["sử dụng điện thoại di động khi điều khiển xe"]),
    ("xe máy", &["xe mô tô", "xe gắn máy"]),
    ("ô tô", &["xe ô tô"]),
    ("trừ điểm", &["trừ điểm giấy phép lái xe"]),
    ("tước giấy phép", &["tước quyền sử dụng giấy phép lái xe"]),
    ("tạm giữ phương tiện", &["tạm giữ xe"]),
];

/// Phrases that continue the previous topic when they open a question
const LEADING_MARKERS: &[&str] = &[
    "còn", "vậy còn", "thế còn", "thế", "vậy", "and", "what about", "how about",
];

/// Phrases that continue the previous topic anywhere in a question
const INLINE_MARKERS: &[&str] = &[
    "thì sao", "thế nào nếu", "như vậy", "cũng vậy", "như trên",
];

/// Anaphoric references that can be substituted by an antecedent
const PRONOUNS: &[&str] = &[
    "trường hợp đó", "trường hợp này", "cái đó", "việc đó", "lỗi đó", "lỗi này", "nó", "it", "that",
];

const LEGAL_KEYWORDS: &[&str] = &[
    "luật", "nghị định", "thông tư", "quy định", "pháp luật", "vi phạm", "giao thông", "csgt",
    "cảnh sát", "biên bản", "điều", "khoản", "giấy phép", "phạt", "xử lý", "traffic", "law",
];

const STOPWORDS: &[&str] = &[
    "là", "gì", "thì", "có", "không", "bao", "nhiêu", "của", "và", "cho", "với", "bị", "được",
    "nếu", "sao", "thế", "nào", "khi", "một", "các", "những", "này", "đó", "the", "a", "an", "of",
    "is", "what", "how",
];

static LAW_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:nghị định|nđ|luật|thông tư|tt)\s*\d{1,4}\s*/\s*\d{4}(?:/[\p{L}\p{N}\-]+)?")
        .expect("valid law reference regex")
});

static PRONOUN: Lazy<Regex> = Lazy::new(|| {
    let alternatives = PRONOUNS.join("|");
    Regex::new(&format!(r"(?i)(?:^|[^\p{{L}}\p{{N}}])({})(?:$|[^\p{{L}}\p{{N}}])", alternatives))
        .expect("valid pronoun regex")
});

/// What a piece of text talks about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    /// Canonical entity names in order of appearance
    pub entities: Vec<String>,
    /// Canonical facets in order of appearance
    pub facets: Vec<String>,
    /// Opens with or contains a continuation marker
    pub continues_topic: bool,
    /// Byte range of the first anaphoric reference in the original text
    pub pronoun: Option<(usize, usize)>,
    /// Number of words
    pub word_count: usize,
}

impl Analysis {
    /// Refers back to earlier context
    pub fn is_anaphoric(&self) -> bool {
        self.continues_topic || self.pronoun.is_some()
    }
}

/// Analyse a question or turn
pub fn analyze(text: &str) -> Analysis {
    let lower = text.to_lowercase();

    let mut entities = scan(&lower, ENTITIES.iter().map(|e| (e.canonical, e.aliases)));
    for m in LAW_REFERENCE.find_iter(text) {
        let title = law_title(m.as_str());
        let pos = lower.len().min(m.start());
        entities.push((pos, title));
    }
    entities.sort_by_key(|(pos, _)| *pos);

    let facets = scan(&lower, FACETS.iter().copied());

    let trimmed = lower.trim_start_matches(|c: char| !c.is_alphanumeric());
    let leading = LEADING_MARKERS.iter().any(|m| starts_with_term(trimmed, m));
    let inline = INLINE_MARKERS.iter().any(|m| find_term(&lower, m).is_some());

    let pronoun = PRONOUN
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| (m.start(), m.end()));

    Analysis {
        entities: dedup(entities.into_iter().map(|(_, e)| e)),
        facets: dedup(facets.into_iter().map(|(_, f)| f)),
        continues_topic: leading || inline,
        pronoun,
        word_count: text.split_whitespace().count(),
    }
}

/// Entity class of a canonical name
pub fn category_of(canonical: &str) -> EntityCategory {
    ENTITIES
        .iter()
        .find(|e| e.canonical == canonical)
        .map(|e| e.category)
        .unwrap_or_else(|| {
            if canonical_law_code(canonical).is_some() {
                EntityCategory::Document
            } else {
                EntityCategory::Subject
            }
        })
}

/// Alternative phrasings of a canonical entity or facet
pub fn synonyms(canonical: &str) -> &'static [&'static str] {
    SYNONYMS
        .iter()
        .find(|(term, _)| *term == canonical)
        .map(|(_, syns)| *syns)
        .unwrap_or(&[])
}

/// Whether the text uses general legal vocabulary
pub fn has_legal_keyword(text: &str) -> bool {
    let lower = text.to_lowercase();
    LEGAL_KEYWORDS.iter().any(|k| find_term(&lower, k).is_some())
}

/// Lowercased content words, stopwords removed
pub fn content_tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        .map(String::from)
        .collect()
}

/// Whether `text` mentions `canonical` through any of its aliases
pub fn mentions(text: &str, canonical: &str) -> bool {
    let lower = text.to_lowercase();
    if find_term(&lower, canonical).is_some() {
        return true;
    }
    let aliases = ENTITIES
        .iter()
        .find(|e| e.canonical == canonical)
        .map(|e| e.aliases)
        .or_else(|| FACETS.iter().find(|(c, _)| *c == canonical).map(|(_, a)| *a))
        .unwrap_or(&[]);
    aliases.iter().any(|a| find_term(&lower, a).is_some())
        || synonyms(canonical).iter().any(|s| find_term(&lower, s).is_some())
}

/// Longest-match scan of alias tables; overlapping shorter matches are dropped
fn scan<'a>(
    lower: &str,
    table: impl Iterator<Item = (&'a str, &'a [&'a str])>,
) -> Vec<(usize, String)> {
    let mut matches: Vec<(usize, usize, &str)> = Vec::new();
    for (canonical, aliases) in table {
        for alias in aliases {
            let mut start = 0;
            while let Some(pos) = find_term(&lower[start..], alias) {
                let at = start + pos;
                matches.push((at, at + alias.len(), canonical));
                start = at + alias.len();
            }
        }
    }

    matches.sort_by(|a, b| (b.1 - b.0).cmp(&(a.1 - a.0)).then(a.0.cmp(&b.0)));
    let mut taken: Vec<(usize, usize)> = Vec::new();
    let mut found = Vec::new();
    for (s, e, canonical) in matches {
        if taken.iter().all(|(ts, te)| e <= *ts || s >= *te) {
            taken.push((s, e));
            found.push((s, canonical.to_string()));
        }
    }
    found.sort_by_key(|(pos, _)| *pos);
    found
}

/// Position of `needle` in `hay` on word boundaries
pub(crate) fn find_term(hay: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let mut start = 0;
    while let Some(pos) = hay[start..].find(needle) {
        let at = start + pos;
        let end = at + needle.len();
        let before_ok = hay[..at].chars().next_back().map_or(true, |c| !c.is_alphanumeric());
        let after_ok = hay[end..].chars().next().map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return Some(at);
        }
        start = end;
    }
    None
}

fn starts_with_term(hay: &str, term: &str) -> bool {
    hay.starts_with(term)
        && hay[term.len()..].chars().next().map_or(true, |c| !c.is_alphanumeric())
}

fn dedup(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.filter(|i| seen.insert(i.clone())).collect()
}
