//! Free-form questions over a completed document: the second consumer of
//! the retrieval and grounding machinery. Answers come from retrieved
//! evidence only; ungrounded citations are dropped and an explicit
//! "cannot find" reply zeroes the confidence.

use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::catalog::TOP_K;
use crate::error::CoreError;
use crate::llm::{complete_with_retry, CompletionOptions, LlmClient, RetryConfig};
use crate::model::{ChatAnswer, ChatMessage, ChatRole, ChatSession, Chunk, Document, Quote};
use crate::pipeline::analyzer::format_evidence;
use crate::pipeline::grounding::match_quote;
use crate::pipeline::retriever::Bm25Index;

/// Reply used when the model's output never parses.
pub const CHAT_FALLBACK_ANSWER: &str = "I cannot find that information in the contract.";

/// Only the tail of the conversation is spliced into the prompt.
const HISTORY_WINDOW: usize = 4;

const SYSTEM_PROMPT: &str = "You are a contract analysis assistant. Answer questions based \
ONLY on the provided evidence from the contract. If the evidence does not contain enough \
information to answer, reply with a sentence beginning 'I cannot find'. Provide verbatim \
quotes to support your answer.";

/// The retrieval state shared by every message of a session: the document
/// and its BM25 index. Borrows the chunk corpus; must not outlive it.
pub struct ChatContext<'a> {
    document: &'a Document,
    index: Bm25Index<'a>,
}

pub fn build_chat_context<'a>(document: &'a Document, chunks: &'a [Chunk]) -> ChatContext<'a> {
    ChatContext {
        document,
        index: Bm25Index::new(chunks),
    }
}

/// Answer one user message: retrieve evidence for the raw message, prompt
/// the model with the recent history and the evidence, ground the cited
/// quotes, score confidence, and append both turns to the session.
pub async fn chat_answer<L: LlmClient>(
    llm: &L,
    session: &mut ChatSession,
    user_message: &str,
    context: &ChatContext<'_>,
) -> Result<ChatAnswer, CoreError> {
    session.push(ChatRole::User, user_message);

    let evidence = context
        .index
        .retrieve_for_query(user_message, TOP_K, "chat");

    let history = recent_history(session);
    let prompt = build_chat_prompt(user_message, &evidence, &history);
    let options = CompletionOptions {
        temperature: 0.3,
        max_tokens: 500,
        json_mode: true,
        timeout: Duration::from_secs(60),
    };
    let retry = RetryConfig::default();

    let response =
        complete_with_retry(llm, &prompt, Some(SYSTEM_PROMPT), &options, &retry).await?;

    let raw = match parse_chat_response(&response) {
        Some(raw) => raw,
        None => {
            warn!("chat response did not parse, issuing repair prompt");
            let repair_options = CompletionOptions {
                temperature: 0.1,
                ..options
            };
            let repaired = complete_with_retry(
                llm,
                &build_repair_prompt(&response),
                Some(SYSTEM_PROMPT),
                &repair_options,
                &retry,
            )
            .await;

            match repaired.ok().as_deref().and_then(parse_chat_response) {
                Some(raw) => raw,
                None => {
                    warn!("chat repair attempt did not parse, using fallback answer");
                    RawChatAnswer {
                        answer: CHAT_FALLBACK_ANSWER.to_string(),
                        relevant_quotes: Vec::new(),
                    }
                }
            }
        }
    };

    let mut quotes = Vec::new();
    for cited in &raw.relevant_quotes {
        match match_quote(&cited.text, &evidence) {
            Some((page_start, page_end)) => quotes.push(Quote {
                text: cited.text.clone(),
                page_start,
                page_end,
                validated: true,
            }),
            None => {
                let prefix = cited.text.chars().take(30).collect::<String>();
                warn!(prefix = %prefix, "dropping chat citation not found in evidence");
            }
        }
    }

    let confidence = if ChatAnswer::is_not_found(&raw.answer) {
        quotes.clear();
        0
    } else if evidence.is_empty() {
        30
    } else {
        (70 + 10 * quotes.len()).min(100) as u8
    };

    session.push(ChatRole::Assistant, raw.answer.clone());

    info!(
        doc_id = %context.document.doc_id,
        session_id = %session.session_id,
        quotes = quotes.len(),
        confidence,
        "chat answer produced"
    );

    Ok(ChatAnswer {
        answer: raw.answer,
        relevant_quotes: quotes,
        confidence,
    })
}

fn recent_history(session: &ChatSession) -> Vec<&ChatMessage> {
    let skip = session.messages.len().saturating_sub(HISTORY_WINDOW);
    session.messages[skip..].iter().collect()
}

fn build_chat_prompt(
    user_message: &str,
    evidence: &[crate::model::EvidenceChunk],
    history: &[&ChatMessage],
) -> String {
    let mut sections = Vec::new();

    if !history.is_empty() {
        let mut lines = vec!["CONVERSATION HISTORY (last 4 messages):".to_string()];
        for message in history {
            let label = match message.role {
                ChatRole::User => "User",
                ChatRole::Assistant => "Assistant",
            };
            lines.push(format!("{label}: {}", message.content));
        }
        sections.push(lines.join("\n"));
    }

    sections.push(format!(
        "EVIDENCE FROM CONTRACT:\n{}",
        format_evidence(evidence)
    ));

    sections.push(format!(
        "---\n\nUSER QUESTION: {user_message}\n\n\
INSTRUCTIONS: Answer the question using ONLY the evidence above. \
If the evidence does not contain the information needed, reply with a sentence \
beginning 'I cannot find'. Return your response as JSON with this exact format:\n\
{{\n  \"answer\": \"your answer here\",\n  \"relevant_quotes\": [{{\"text\": \"exact quote from evidence\"}}]\n}}"
    ));

    sections.join("\n\n")
}

fn build_repair_prompt(invalid_response: &str) -> String {
    let truncated = invalid_response.chars().take(500).collect::<String>();
    format!(
        "The previous response was not valid JSON. Please fix it.\n\n\
REQUIRED FORMAT:\n\
{{\n  \"answer\": \"your answer here\",\n  \"relevant_quotes\": [{{\"text\": \"exact quote from evidence\"}}]\n}}\n\n\
PREVIOUS OUTPUT (invalid):\n{truncated}\n\n\
Return ONLY valid JSON with the correct format:"
    )
}

#[derive(Debug, Deserialize)]
struct RawChatAnswer {
    answer: String,
    #[serde(default)]
    relevant_quotes: Vec<RawChatQuote>,
}

#[derive(Debug, Deserialize)]
struct RawChatQuote {
    #[serde(default)]
    text: String,
}

fn parse_chat_response(response: &str) -> Option<RawChatAnswer> {
    serde_json::from_str(crate::pipeline::analyzer::extract_json(response)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    use uuid::Uuid;

    use crate::llm::ScriptedLlm;
    use crate::model::{DocumentMetadata, Page};
    use crate::normalize::normalize;

    fn fixture(texts: &[&str]) -> (Document, Vec<Chunk>) {
        let mut pages = Vec::new();
        let mut offset = 0usize;
        for (index, text) in texts.iter().enumerate() {
            let start = offset;
            let end = offset + text.len();
            offset = end;
            pages.push(Page {
                page_number: (index + 1) as u32,
                raw_text: text.to_string(),
                normalized_text: normalize(text),
                char_offset_start: start,
                char_offset_end: end,
            });
        }

        let document = Document {
            doc_id: Uuid::new_v4(),
            filename: "contract.pdf".to_string(),
            page_count: pages.len(),
            metadata: DocumentMetadata {
                parser_used: "lopdf".to_string(),
                needs_ocr: false,
                avg_chars_per_page: 400,
                total_pages: pages.len(),
                headers_footers_removed: false,
            },
            pages,
        };

        let chunks = crate::pipeline::chunker::chunk(
            &document,
            crate::pipeline::chunker::ChunkerConfig::default(),
        );
        (document, chunks)
    }

    #[tokio::test]
    async fn grounded_answer_earns_quote_bonus() {
        let (document, chunks) = fixture(&[
            "All passwords must be at least 12 characters long.",
            "Payment is due within thirty days.",
        ]);
        let context = build_chat_context(&document, &chunks);
        let mut session = ChatSession::new(document.doc_id);

        let llm = ScriptedLlm::new([
            "{\"answer\": \"Passwords require 12 characters minimum.\", \
\"relevant_quotes\": [{\"text\": \"All passwords must be at least 12 characters long.\"}]}",
        ]);

        let answer = chat_answer(&llm, &mut session, "What is the password policy?", &context)
            .await
            .unwrap();

        assert_eq!(answer.confidence, 80);
        assert_eq!(answer.relevant_quotes.len(), 1);
        assert!(answer.relevant_quotes[0].validated);
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, ChatRole::User);
        assert_eq!(session.messages[1].role, ChatRole::Assistant);
    }

    #[tokio::test]
    async fn cannot_find_answers_carry_zero_confidence_and_no_citations() {
        let (document, chunks) = fixture(&["Payment is due within thirty days."]);
        let context = build_chat_context(&document, &chunks);
        let mut session = ChatSession::new(document.doc_id);

        let llm = ScriptedLlm::new([
            "{\"answer\": \"I cannot find that information in the contract.\", \
\"relevant_quotes\": [{\"text\": \"Payment is due within thirty days.\"}]}",
        ]);

        let answer = chat_answer(
            &llm,
            &mut session,
            "What is the cryptocurrency policy?",
            &context,
        )
        .await
        .unwrap();

        assert_eq!(answer.confidence, 0);
        assert!(answer.relevant_quotes.is_empty());
    }

    #[tokio::test]
    async fn hallucinated_citations_are_dropped_but_answer_survives() {
        let (document, chunks) = fixture(&["Payment is due within thirty days."]);
        let context = build_chat_context(&document, &chunks);
        let mut session = ChatSession::new(document.doc_id);

        let llm = ScriptedLlm::new([
            "{\"answer\": \"Payment terms are thirty days.\", \
\"relevant_quotes\": [{\"text\": \"Annual penetration testing is required.\"}]}",
        ]);

        let answer = chat_answer(&llm, &mut session, "What are the payment terms?", &context)
            .await
            .unwrap();

        assert!(answer.relevant_quotes.is_empty());
        assert_eq!(answer.confidence, 70);
    }

    #[tokio::test]
    async fn double_parse_failure_falls_back_to_cannot_find() {
        let (document, chunks) = fixture(&["Payment is due within thirty days."]);
        let context = build_chat_context(&document, &chunks);
        let mut session = ChatSession::new(document.doc_id);

        let llm = ScriptedLlm::new(["<<not json>>", "<<still not json>>"]);

        let answer = chat_answer(&llm, &mut session, "Anything?", &context)
            .await
            .unwrap();

        assert_eq!(answer.answer, CHAT_FALLBACK_ANSWER);
        assert_eq!(answer.confidence, 0);
        assert!(answer.relevant_quotes.is_empty());
        assert_eq!(llm.call_count(), 2);
        assert_eq!(session.messages[1].content, CHAT_FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn prompt_includes_only_the_last_four_messages() {
        let (document, chunks) = fixture(&["Payment is due within thirty days."]);
        let context = build_chat_context(&document, &chunks);
        let mut session = ChatSession::new(document.doc_id);

        session.push(ChatRole::User, "oldest question");
        session.push(ChatRole::Assistant, "oldest answer");
        session.push(ChatRole::User, "middle question");
        session.push(ChatRole::Assistant, "middle answer");

        let llm = ScriptedLlm::new(["{\"answer\": \"Thirty days.\", \"relevant_quotes\": []}"]);

        chat_answer(&llm, &mut session, "And the late fee?", &context)
            .await
            .unwrap();

        let prompt = &llm.calls()[0].prompt;
        assert!(!prompt.contains("oldest question"));
        assert!(prompt.contains("middle answer"));
        assert!(prompt.contains("And the late fee?"));
        assert!(prompt.contains("CONVERSATION HISTORY (last 4 messages):"));
    }

    #[tokio::test]
    async fn quote_bonus_is_capped_at_one_hundred() {
        let (document, chunks) = fixture(&[
            "Clause one: passwords must be rotated quarterly without exception.",
            "Clause two: passwords must never be shared between employees.",
            "Clause three: passwords must be vaulted in an approved secret store.",
            "Clause four: passwords must use salted hashing when stored at rest.",
        ]);
        let context = build_chat_context(&document, &chunks);
        let mut session = ChatSession::new(document.doc_id);

        let llm = ScriptedLlm::new([
            "{\"answer\": \"There are several password obligations.\", \"relevant_quotes\": [\
{\"text\": \"passwords must be rotated quarterly without exception.\"},\
{\"text\": \"passwords must never be shared between employees.\"},\
{\"text\": \"passwords must be vaulted in an approved secret store.\"},\
{\"text\": \"passwords must use salted hashing when stored at rest.\"}]}",
        ]);

        let answer = chat_answer(&llm, &mut session, "List the password rules", &context)
            .await
            .unwrap();

        assert_eq!(answer.relevant_quotes.len(), 4);
        assert_eq!(answer.confidence, 100);
    }

    #[tokio::test]
    async fn empty_corpus_scores_thirty_when_answer_commits() {
        let (document, chunks) = fixture(&[]);
        let context = build_chat_context(&document, &chunks);
        let mut session = ChatSession::new(document.doc_id);

        let llm = ScriptedLlm::new([
            "{\"answer\": \"The contract appears to be empty.\", \"relevant_quotes\": []}",
        ]);

        let answer = chat_answer(&llm, &mut session, "What does it say?", &context)
            .await
            .unwrap();

        assert_eq!(answer.confidence, 30);
    }
}
