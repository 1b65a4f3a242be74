//! Prompt templates
//!
//! The system prompt fixes the answer layout (five numbered sections and a
//! closing note); the user prompt carries the question, the recent turns and
//! the ranked passages rendered as numbered documents.

use handlebars::{no_escape, Handlebars};
use serde::Serialize;

use crate::core::{GenerationRequest, Role};
use crate::error::{Error, Result};

/// A prompt template using Handlebars syntax
pub struct PromptTemplate {
    /// Template name
    name: String,
    /// Handlebars registry
    registry: Handlebars<'static>,
}

impl PromptTemplate {
    /// Create a new prompt template
    pub fn new(name: impl Into<String>, template: &str) -> Result<Self> {
        let name = name.into();
        let mut registry = Handlebars::new();
        // Prompts are plain text, not HTML
        registry.register_escape_fn(no_escape);

        registry
            .register_template_string(&name, template)
            .map_err(|e| Error::Internal(format!("Invalid template: {}", e)))?;

        Ok(PromptTemplate { name, registry })
    }

    /// Render the template with given data
    pub fn render<T: Serialize>(&self, data: &T) -> Result<String> {
        self.registry
            .render(&self.name, data)
            .map_err(|e| Error::Internal(format!("Template render error: {}", e)))
    }
}

/// System prompt for grounded legal answers
pub const LEGAL_QA_SYSTEM_PROMPT: &str = r#"Bạn là trợ lý pháp lý chuyên về pháp luật trật tự, an toàn giao thông đường bộ Việt Nam.

NGUYÊN TẮC
- Chỉ sử dụng thông tin trong phần TÀI LIỆU được cung cấp. Không suy diễn, không bổ sung kiến thức bên ngoài.
- Mỗi kết luận pháp lý phải kèm căn cứ rõ ràng (Điều, Khoản, Điểm, tên văn bản) và dẫn số tài liệu dạng [Tài liệu N].
- Không trích dẫn sai điều, sai khoản hoặc sai phạm vi áp dụng.
- Không dùng từ ngữ suy đoán như "có thể", "thường", "trong thực tế", "theo thông lệ".
- Nếu tài liệu không đủ để trả lời, nói rõ là không có căn cứ trong tài liệu.

HÌNH THỨC TRẢ LỜI
I. Trả lời
   Ngắn gọn, cụ thể, đi thẳng vào nội dung chính của câu hỏi.
II. Mức xử phạt / Hậu quả pháp lý (nếu có)
III. Trường hợp ngoại lệ (nếu không có thì ghi rõ không có căn cứ)
IV. Khuyến nghị cho người hỏi
   Chỉ mang tính tuân thủ pháp luật và an toàn giao thông. Không tư vấn né tránh xử phạt.
V. Căn cứ pháp lý
   Liệt kê đầy đủ, chính xác các điều khoản đã viện dẫn."#;

const LEGAL_QA_USER_TEMPLATE: &str = r#"{{#if history}}HỘI THOẠI TRƯỚC:
{{#each history}}{{this.speaker}}: {{this.text}}
{{/each}}
{{/if}}CÂU HỎI:
{{question}}

TÀI LIỆU (chỉ được sử dụng thông tin dưới đây):
{{#if documents}}{{#each documents}}[Tài liệu {{this.number}}]
{{this.content}}
[Nguồn: {{this.citation}}]
{{#unless @last}}
---

{{/unless}}{{/each}}{{else}}(không có tài liệu)
{{/if}}
{{#unless confident}}
LƯU Ý: Độ liên quan của tài liệu thấp. Nếu tài liệu không trả lời được câu hỏi, hãy nói rõ rằng không tìm thấy căn cứ pháp lý phù hợp thay vì suy đoán.
{{/unless}}
Hãy trả lời đúng theo các yêu cầu đã nêu."#;

#[derive(Debug, Serialize)]
struct HistoryLine {
    speaker: &'static str,
    text: String,
}

#[derive(Debug, Serialize)]
struct Document {
    number: usize,
    content: String,
    citation: String,
}

#[derive(Debug, Serialize)]
struct UserPromptData<'a> {
    question: &'a str,
    history: Vec<HistoryLine>,
    documents: Vec<Document>,
    confident: bool,
}

/// Renders generation requests into chat prompts
pub struct LegalPrompt {
    user: PromptTemplate,
}

impl LegalPrompt {
    /// Compile the templates
    pub fn new() -> Result<Self> {
        Ok(Self {
            user: PromptTemplate::new("legal_qa_user", LEGAL_QA_USER_TEMPLATE)?,
        })
    }

    /// The fixed system prompt
    pub fn system(&self) -> &'static str {
        LEGAL_QA_SYSTEM_PROMPT
    }

    /// Render the user message. Turns are listed oldest first.
    pub fn user(&self, request: &GenerationRequest) -> Result<String> {
        let history = request
            .recent_turns
            .iter()
            .rev()
            .map(|t| HistoryLine {
                speaker: match t.role {
                    Role::User => "Người dùng",
                    Role::Assistant => "Trợ lý",
                },
                text: t.text.clone(),
            })
            .collect();

        let documents = request
            .ranked_passages
            .iter()
            .enumerate()
            .map(|(i, p)| Document {
                number: i + 1,
                content: p.passage.content.clone(),
                citation: p.passage.citation.to_string(),
            })
            .collect();

        self.user.render(&UserPromptData {
            question: &request.question,
            history,
            documents,
            confident: request.confidence_flag,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Citation, Passage, RankedPassage, SourceKind, Turn};

    fn request(confident: bool) -> GenerationRequest {
        GenerationRequest {
            question: "Không đội mũ bảo hiểm phạt bao nhiêu?".into(),
            ranked_passages: vec![RankedPassage {
                passage: Passage::new(
                    SourceKind::Vector,
                    "Phạt tiền từ 400.000 đồng đến 600.000 đồng",
                    Citation::law("Nghị định 168/2024/NĐ-CP").with_article("7").with_clause("2"),
                    0.8,
                ),
                relevance_score: 0.7,
            }],
            recent_turns: vec![
                Turn::assistant("s1", "Xin chào"),
                Turn::user("s1", "Chào bạn"),
            ],
            confidence_flag: confident,
        }
    }

    #[test]
    fn test_template_render() {
        let template = PromptTemplate::new("t", "Hỏi: {{q}} & {{n}}").unwrap();
        let out = template.render(&serde_json::json!({"q": "a<b", "n": 2})).unwrap();
        assert_eq!(out, "Hỏi: a<b & 2");
    }

    #[test]
    fn test_invalid_template_is_internal_error() {
        assert!(matches!(
            PromptTemplate::new("bad", "{{#if}}"),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_user_prompt_numbers_documents_and_orders_history() {
        let prompt = LegalPrompt::new().unwrap();
        let text = prompt.user(&request(true)).unwrap();

        assert!(text.contains("[Tài liệu 1]\nPhạt tiền từ 400.000 đồng đến 600.000 đồng\n[Nguồn: Nghị định 168/2024/NĐ-CP, Điều 7, Khoản 2]"));
        let user_pos = text.find("Người dùng: Chào bạn").unwrap();
        let assistant_pos = text.find("Trợ lý: Xin chào").unwrap();
        assert!(user_pos < assistant_pos);
        assert!(!text.contains("Độ liên quan của tài liệu thấp"));
    }

    #[test]
    fn test_low_confidence_instruction() {
        let prompt = LegalPrompt::new().unwrap();
        let text = prompt.user(&request(false)).unwrap();
        assert!(text.contains("Độ liên quan của tài liệu thấp"));
    }

    #[test]
    fn test_no_documents() {
        let prompt = LegalPrompt::new().unwrap();
        let mut req = request(false);
        req.ranked_passages.clear();
        req.recent_turns.clear();
        let text = prompt.user(&req).unwrap();
        assert!(text.contains("(không có tài liệu)"));
        assert!(!text.contains("HỘI THOẠI TRƯỚC"));
    }
}
