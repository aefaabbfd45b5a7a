use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::normalize::normalize;

/// A single extracted page. `char_offset_start..char_offset_end` is the
/// page's half-open range in the concatenated-document coordinate space;
/// page ranges tile that space with no gaps or overlaps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub page_number: u32,
    pub raw_text: String,
    pub normalized_text: String,
    pub char_offset_start: usize,
    pub char_offset_end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub parser_used: String,
    pub needs_ocr: bool,
    pub avg_chars_per_page: u32,
    pub total_pages: usize,
    pub headers_footers_removed: bool,
}

/// A parsed contract. Immutable once built by the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: Uuid,
    pub filename: String,
    pub page_count: usize,
    pub pages: Vec<Page>,
    pub metadata: DocumentMetadata,
}

impl Document {
    /// Concatenated raw text of all pages; the coordinate space the page
    /// and chunk char ranges address.
    pub fn full_text(&self) -> String {
        self.pages.iter().map(|page| page.raw_text.as_str()).collect()
    }
}

/// A contiguous, page-attributed unit of document text; the granularity of
/// retrieval. Ids are dense and deterministic: `<doc_id>:chunk_<n>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub normalized_text: String,
    pub page_start: u32,
    pub page_end: u32,
    pub char_range: (usize, usize),
}

/// A chunk selected by retrieval for one requirement, with its score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub relevance_score: f64,
    pub requirement_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplianceState {
    #[serde(rename = "Fully Compliant")]
    FullyCompliant,
    #[serde(rename = "Partially Compliant")]
    PartiallyCompliant,
    #[serde(rename = "Non-Compliant")]
    NonCompliant,
}

impl ComplianceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullyCompliant => "Fully Compliant",
            Self::PartiallyCompliant => "Partially Compliant",
            Self::NonCompliant => "Non-Compliant",
        }
    }

    /// Coerce a model-emitted state label: trimmed, case-insensitive.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "fully compliant" => Some(Self::FullyCompliant),
            "partially compliant" => Some(Self::PartiallyCompliant),
            "non-compliant" => Some(Self::NonCompliant),
            _ => None,
        }
    }
}

/// A supporting quote. After grounding, `validated` is always true and the
/// page range is the range of the evidence chunk(s) the quote matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub text: String,
    pub page_start: u32,
    pub page_end: u32,
    pub validated: bool,
}

/// Judgment for one requirement. Produced once by the analyzer, adjusted
/// once by the grounder, immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceResult {
    pub compliance_question: String,
    pub compliance_state: ComplianceState,
    pub confidence: u8,
    pub relevant_quotes: Vec<Quote>,
    pub rationale: String,
    pub evidence_chunks_used: Vec<String>,
}

/// Everything `run_analysis` hands back to the collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub document: Document,
    pub chunks: Vec<Chunk>,
    pub results: Vec<ComplianceResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only conversation over one completed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub session_id: Uuid,
    pub doc_id: Uuid,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(doc_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            doc_id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push(&mut self, role: ChatRole, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role,
            content: content.into(),
            created_at: Utc::now(),
        });
        self.updated_at = Utc::now();
    }
}

/// One grounded chat reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub relevant_quotes: Vec<Quote>,
    pub confidence: u8,
}

impl ChatAnswer {
    /// True when the normalized answer admits it found nothing; such
    /// answers carry zero confidence and no citations.
    pub fn is_not_found(answer: &str) -> bool {
        let normalized = normalize(answer);
        ["cannot find", "can't find", "not found", "no information"]
            .iter()
            .any(|phrase| normalized.contains(phrase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compliance_state_parses_leniently() {
        assert_eq!(
            ComplianceState::parse_lenient("  fully compliant "),
            Some(ComplianceState::FullyCompliant)
        );
        assert_eq!(
            ComplianceState::parse_lenient("NON-COMPLIANT"),
            Some(ComplianceState::NonCompliant)
        );
        assert_eq!(ComplianceState::parse_lenient("compliant-ish"), None);
    }

    #[test]
    fn compliance_state_serializes_to_frozen_labels() {
        let json = serde_json::to_string(&ComplianceState::PartiallyCompliant).unwrap();
        assert_eq!(json, "\"Partially Compliant\"");
    }

    #[test]
    fn compliance_result_matches_wire_schema() {
        let result = ComplianceResult {
            compliance_question: "Q".to_string(),
            compliance_state: ComplianceState::FullyCompliant,
            confidence: 90,
            relevant_quotes: vec![Quote {
                text: "verbatim".to_string(),
                page_start: 2,
                page_end: 2,
                validated: true,
            }],
            rationale: "because".to_string(),
            evidence_chunks_used: vec!["d:chunk_0".to_string()],
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["compliance_state"], "Fully Compliant");
        assert_eq!(value["confidence"], 90);
        assert_eq!(value["relevant_quotes"][0]["validated"], true);
        assert_eq!(value["evidence_chunks_used"][0], "d:chunk_0");
    }

    #[test]
    fn not_found_predicate_matches_inside_longer_sentences() {
        assert!(ChatAnswer::is_not_found(
            "I cannot find that information in the contract."
        ));
        assert!(ChatAnswer::is_not_found("Sorry, but I can\u{2019}t find it."));
        assert!(!ChatAnswer::is_not_found("TLS 1.2 is required on page 3."));
    }

    #[test]
    fn session_push_appends_in_order() {
        let mut session = ChatSession::new(Uuid::new_v4());
        session.push(ChatRole::User, "first");
        session.push(ChatRole::Assistant, "second");
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, ChatRole::User);
        assert_eq!(session.messages[1].content, "second");
    }
}
