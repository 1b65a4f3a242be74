//! Legal citations
//!
//! Backends spell the same regulation in many ways: curated indexes use
//! `Nghị định 100/2019/NĐ-CP`, users type `NĐ 100/2019`, and some ingested
//! titles lost their diacritics in transit (`Ngh nh 100-2019-N-CP`). All of
//! them fold into one canonical law key (`nd-100-2019`), which is what
//! deduplication and cache invalidation compare.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shown when a passage carries no usable citation
pub const UNKNOWN_SOURCE: &str = "Không xác định nguồn";

/// Display titles for documents whose ingested names were mangled
const KNOWN_DOCUMENTS: &[(&str, &str)] = &[
    ("nd-168-2024", "Nghị định 168/2024/NĐ-CP"),
    ("nd-3-2021", "Nghị định 03/2021/NĐ-CP"),
    ("nd-100-2019", "Nghị định 100/2019/NĐ-CP"),
    ("nd-123-2021", "Nghị định 123/2021/NĐ-CP"),
    ("luat-35-2024", "Luật 35/2024/QH15"),
    ("luat-36-2024", "Luật 36/2024/QH15"),
];

static LAW_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,4})\s*[/\-]\s*(\d{4})").expect("valid law number regex"));

static ARTICLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)điều\s+(\d+[a-z]?)").expect("valid article regex"));

static CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:khoản|mục)\s+(\d+)").expect("valid clause regex"));

static POINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)điểm\s+([a-zđ])\b").expect("valid point regex"));

static ARTICLE_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[,;\s]*\bđiều\s+\d").expect("valid article start regex"));

static BRACKETED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(.*?)\]").expect("valid bracket regex"));

/// Where a passage comes from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Regulation identifier, in whatever spelling the backend used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub law_code: Option<String>,
    /// Article (Điều)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article: Option<String>,
    /// Clause (Khoản)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clause: Option<String>,
    /// Point (Điểm)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<String>,
    /// Origin URL for web passages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Citation {
    /// Citation of a regulation
    pub fn law(code: impl Into<String>) -> Self {
        Citation {
            law_code: Some(code.into()),
            ..Default::default()
        }
    }

    /// Citation of a web page
    pub fn web(url: impl Into<String>) -> Self {
        Citation {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Set the article
    pub fn with_article(mut self, article: impl Into<String>) -> Self {
        self.article = non_blank(article.into());
        self
    }

    /// Set the clause
    pub fn with_clause(mut self, clause: impl Into<String>) -> Self {
        self.clause = non_blank(clause.into());
        self
    }

    /// Set the point
    pub fn with_point(mut self, point: impl Into<String>) -> Self {
        self.point = non_blank(point.into());
        self
    }

    /// No identifying field set
    pub fn is_empty(&self) -> bool {
        self.law_code.is_none() && self.url.is_none()
    }

    /// Parse free text such as `NĐ 100/2019` or
    /// `Nghị định 100/2019/NĐ-CP, Điều 6, Khoản 2, Điểm a`.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.starts_with("http://") || text.starts_with("https://") {
            return Citation::web(text);
        }

        let law_part = match ARTICLE_START.find(text) {
            Some(m) => &text[..m.start()],
            None => text,
        };
        let law_part = law_part.trim().trim_end_matches([',', ';']).trim();

        Citation {
            law_code: non_blank(law_part.to_string()),
            article: capture(&ARTICLE, text),
            clause: capture(&CLAUSE, text),
            point: capture(&POINT, text).map(|p| p.to_lowercase()),
            url: None,
        }
    }

    /// Split a graph document into its citation header and body.
    ///
    /// The first line looks like `[Ngh nh 100-2019-N-CP] Điều 6 Khoản 2`.
    /// When no header is recognised the whole text is returned as body.
    pub fn parse_header(document: &str) -> (Citation, String) {
        let document = document.trim();
        let (first, rest) = match document.split_once('\n') {
            Some((first, rest)) => (first, rest),
            None => (document, ""),
        };

        let law = BRACKETED
            .captures(first)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty());
        let article = capture(&ARTICLE, first);

        if law.is_none() && article.is_none() {
            return (Citation::default(), document.to_string());
        }

        let citation = Citation {
            law_code: law.map(|l| law_title(&l)),
            article,
            clause: capture(&CLAUSE, first),
            point: capture(&POINT, first).map(|p| p.to_lowercase()),
            url: None,
        };

        let body = rest.trim();
        let body = if body.is_empty() { first.to_string() } else { body.to_string() };
        (citation, body)
    }

    /// Canonical law key, falling back to the collapsed raw code
    pub fn law_key(&self) -> Option<String> {
        self.law_code
            .as_deref()
            .map(|code| canonical_law_code(code).unwrap_or_else(|| collapse(code)))
    }

    /// Deduplication key: canonical law plus article, clause and point,
    /// or the normalized URL for web passages.
    pub fn normalized_key(&self) -> Option<String> {
        if let Some(law) = self.law_key() {
            return Some(format!(
                "{}|{}|{}|{}",
                law,
                collapse_opt(&self.article),
                collapse_opt(&self.clause),
                collapse_opt(&self.point)
            ));
        }
        self.url.as_deref().map(|u| format!("url:{}", normalize_url(u)))
    }

    /// Whether this citation lies within `target`: same regulation, and every
    /// level `target` specifies (article, clause, point) matches.
    pub fn falls_under(&self, target: &Citation) -> bool {
        match (self.law_key(), target.law_key()) {
            (Some(mine), Some(theirs)) if mine == theirs => {
                level_matches(&target.article, &self.article)
                    && level_matches(&target.clause, &self.clause)
                    && level_matches(&target.point, &self.point)
            }
            (None, None) => match (&self.url, &target.url) {
                (Some(a), Some(b)) => normalize_url(a) == normalize_url(b),
                _ => false,
            },
            _ => false,
        }
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(code) = &self.law_code {
            parts.push(law_title(code));
        }
        if let Some(article) = &self.article {
            parts.push(format!("Điều {}", article));
        }
        if let Some(clause) = &self.clause {
            parts.push(format!("Khoản {}", clause));
        }
        if let Some(point) = &self.point {
            parts.push(format!("Điểm {}", point));
        }

        if !parts.is_empty() {
            f.write_str(&parts.join(", "))
        } else if let Some(url) = &self.url {
            f.write_str(url)
        } else {
            f.write_str(UNKNOWN_SOURCE)
        }
    }
}

/// Fold any spelling of a regulation number into `{kind}-{number}-{year}`.
///
/// Returns `None` when no `number/year` pair is present.
pub fn canonical_law_code(raw: &str) -> Option<String> {
    let caps = LAW_NUMBER.captures(raw)?;
    let number: u32 = caps.get(1)?.as_str().parse().ok()?;
    let year = caps.get(2)?.as_str();

    let lower = raw.to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let kind = document_kind(&lower, &tokens).unwrap_or("doc");

    Some(format!("{}-{}-{}", kind, number, year))
}

/// Human-readable title for a law code, repairing known mangled names
pub fn law_title(raw: &str) -> String {
    canonical_law_code(raw)
        .and_then(|key| {
            KNOWN_DOCUMENTS
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, title)| title.to_string())
        })
        .unwrap_or_else(|| raw.trim().to_string())
}

fn document_kind(lower: &str, tokens: &[&str]) -> Option<&'static str> {
    let has = |t: &str| tokens.contains(&t);

    if lower.contains("thông tư") || has("tt") {
        Some("tt")
    } else if lower.contains("quyết định") || has("qđ") || has("qd") {
        Some("qd")
    } else if lower.contains("nghị định")
        || lower.contains("ngh nh")
        || has("nđ")
        || has("nd")
        || has("cp")
    {
        Some("nd")
    } else if lower.contains("luật") || lower.contains("lu t") || tokens.iter().any(|t| t.starts_with("qh")) {
        Some("luat")
    } else {
        None
    }
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn level_matches(wanted: &Option<String>, actual: &Option<String>) -> bool {
    match wanted {
        None => true,
        Some(w) => actual.as_ref().is_some_and(|a| collapse(a) == collapse(w)),
    }
}

fn non_blank(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn collapse_opt(s: &Option<String>) -> String {
    s.as_deref().map(collapse).unwrap_or_default()
}

fn normalize_url(raw: &str) -> String {
    match url::Url::parse(raw.trim()) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            let host = parsed.host_str().unwrap_or_default().trim_start_matches("www.").to_string();
            let path = parsed.path().trim_end_matches('/').to_string();
            match parsed.query() {
                Some(q) => format!("{}{}?{}", host, path, q),
                None => format!("{}{}", host, path),
            }
        }
        Err(_) => raw.trim().trim_end_matches('/').to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_law_code_spellings() {
        let expected = Some("nd-100-2019".to_string());
        assert_eq!(canonical_law_code("Nghị định 100/2019/NĐ-CP"), expected);
        assert_eq!(canonical_law_code("NĐ 100/2019"), expected);
        assert_eq!(canonical_law_code("Ngh nh 100-2019-N-CP"), expected);
        assert_eq!(canonical_law_code("nd 100/2019"), expected);
        assert_eq!(canonical_law_code("Luật 35/2024/QH15"), Some("luat-35-2024".into()));
        assert_eq!(canonical_law_code("Lu t 35-2024-QH15"), Some("luat-35-2024".into()));
        assert_eq!(canonical_law_code("Thông tư 24/2023/TT-BCA"), Some("tt-24-2023".into()));
        assert_eq!(canonical_law_code("không có số hiệu"), None);
    }

    #[test]
    fn test_law_title_repairs_mangled_names() {
        assert_eq!(law_title("Ngh nh 168-2024-N-CP"), "Nghị định 168/2024/NĐ-CP");
        assert_eq!(law_title("Ngh nh 03-2021-N-CP"), "Nghị định 03/2021/NĐ-CP");
        assert_eq!(law_title("Lu t 36-2024-QH15"), "Luật 36/2024/QH15");
        assert_eq!(law_title("Thông tư 24/2023/TT-BCA"), "Thông tư 24/2023/TT-BCA");
    }

    #[test]
    fn test_parse_free_text() {
        let c = Citation::parse("Nghị định 100/2019/NĐ-CP, Điều 6, Khoản 2, Điểm a");
        assert_eq!(c.law_code.as_deref(), Some("Nghị định 100/2019/NĐ-CP"));
        assert_eq!(c.article.as_deref(), Some("6"));
        assert_eq!(c.clause.as_deref(), Some("2"));
        assert_eq!(c.point.as_deref(), Some("a"));

        let short = Citation::parse("NĐ 100/2019");
        assert_eq!(short.law_code.as_deref(), Some("NĐ 100/2019"));
        assert!(short.article.is_none());

        let web = Citation::parse("https://thuvienphapluat.vn/van-ban/abc");
        assert!(web.law_code.is_none());
        assert!(web.url.is_some());
    }

    #[test]
    fn test_parse_header() {
        let doc = "[Ngh nh 100-2019-N-CP] Điều 6 Khoản 2\nPhạt tiền từ 200.000 đồng đến 300.000 đồng";
        let (citation, body) = Citation::parse_header(doc);
        assert_eq!(citation.law_code.as_deref(), Some("Nghị định 100/2019/NĐ-CP"));
        assert_eq!(citation.article.as_deref(), Some("6"));
        assert_eq!(citation.clause.as_deref(), Some("2"));
        assert_eq!(body, "Phạt tiền từ 200.000 đồng đến 300.000 đồng");

        let (none, body) = Citation::parse_header("plain text without header");
        assert!(none.is_empty());
        assert_eq!(body, "plain text without header");
    }

    #[test]
    fn test_normalized_key_ignores_spelling() {
        let a = Citation::law("Nghị định 100/2019/NĐ-CP").with_article("6").with_clause("2");
        let b = Citation::law("Ngh nh 100-2019-N-CP").with_article(" 6 ").with_clause("2");
        assert_eq!(a.normalized_key(), b.normalized_key());

        let c = Citation::law("Nghị định 100/2019/NĐ-CP").with_article("7");
        assert_ne!(a.normalized_key(), c.normalized_key());

        let u1 = Citation::web("https://www.example.vn/luat/");
        let u2 = Citation::web("https://example.vn/luat#top");
        assert_eq!(u1.normalized_key(), u2.normalized_key());
        assert_eq!(Citation::default().normalized_key(), None);
    }

    #[test]
    fn test_falls_under() {
        let cited = Citation::law("Nghị định 100/2019/NĐ-CP").with_article("6").with_clause("2");
        assert!(cited.falls_under(&Citation::parse("NĐ 100/2019")));
        assert!(cited.falls_under(&Citation::parse("NĐ 100/2019, Điều 6")));
        assert!(!cited.falls_under(&Citation::parse("NĐ 100/2019, Điều 5")));
        assert!(!cited.falls_under(&Citation::parse("NĐ 168/2024")));
        assert!(!Citation::law("Nghị định 100/2019/NĐ-CP").falls_under(&Citation::parse("NĐ 100/2019, Điều 6")));
    }

    #[test]
    fn test_display() {
        let c = Citation::law("Ngh nh 100-2019-N-CP").with_article("6").with_clause("2");
        assert_eq!(c.to_string(), "Nghị định 100/2019/NĐ-CP, Điều 6, Khoản 2");
        assert_eq!(Citation::default().to_string(), UNKNOWN_SOURCE);
        assert_eq!(Citation::web("https://a.vn").to_string(), "https://a.vn");
    }
}
