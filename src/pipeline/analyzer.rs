use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::catalog::Requirement;
use crate::error::LlmError;
use crate::llm::{complete_with_retry, CompletionOptions, LlmClient, RetryConfig};
use crate::model::{ComplianceResult, ComplianceState, EvidenceChunk, Quote};

/// Rationale of the synthesized result when the model's output never
/// parses. Fixed wording; consumers match on it.
pub const FALLBACK_RATIONALE: &str = "Model output could not be parsed";

/// Issues one judgment prompt per requirement over retrieved evidence only
/// and turns the response into a raw (ungrounded) [`ComplianceResult`].
/// Quote verification is the grounder's job, not this module's.
pub struct Analyzer<'a, L> {
    llm: &'a L,
    retry: RetryConfig,
    timeout: Duration,
}

impl<'a, L: LlmClient> Analyzer<'a, L> {
    pub fn new(llm: &'a L) -> Self {
        Self {
            llm,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Analyze one requirement. Transport failures (after retries) surface
    /// as [`LlmError`]; malformed model output never does — it degrades to
    /// one repair round and then the fallback result.
    pub async fn analyze(
        &self,
        requirement: &Requirement,
        evidence: &[EvidenceChunk],
    ) -> Result<ComplianceResult, LlmError> {
        let prompt = build_prompt(requirement, evidence);
        let options = CompletionOptions {
            temperature: 0.3,
            max_tokens: 800,
            json_mode: true,
            timeout: self.timeout,
        };

        let response =
            complete_with_retry(self.llm, &prompt, None, &options, &self.retry).await?;

        if let Some(raw) = parse_judgment(&response) {
            return Ok(self.finish(requirement, evidence, raw));
        }

        warn!(
            requirement = requirement.id,
            "judgment did not parse, issuing repair prompt"
        );
        let repair_prompt = build_repair_prompt(&response);
        let repair_options = CompletionOptions {
            temperature: 0.1,
            max_tokens: 600,
            json_mode: true,
            timeout: self.timeout,
        };

        match complete_with_retry(self.llm, &repair_prompt, None, &repair_options, &self.retry)
            .await
        {
            Ok(repaired) => match parse_judgment(&repaired) {
                Some(raw) => Ok(self.finish(requirement, evidence, raw)),
                None => {
                    warn!(
                        requirement = requirement.id,
                        "repair attempt did not parse, synthesizing fallback"
                    );
                    Ok(fallback_result(requirement, evidence))
                }
            },
            Err(error) => {
                warn!(
                    requirement = requirement.id,
                    error = %error,
                    "repair request failed, synthesizing fallback"
                );
                Ok(fallback_result(requirement, evidence))
            }
        }
    }

    fn finish(
        &self,
        requirement: &Requirement,
        evidence: &[EvidenceChunk],
        raw: RawJudgment,
    ) -> ComplianceResult {
        let Some(state) = ComplianceState::parse_lenient(&raw.compliance_state) else {
            warn!(
                requirement = requirement.id,
                "unrecognized compliance state, synthesizing fallback"
            );
            return fallback_result(requirement, evidence);
        };

        let confidence = raw.confidence.round().clamp(0.0, 100.0) as u8;
        let relevant_quotes = raw
            .relevant_quotes
            .into_iter()
            .filter(|quote| !quote.text.is_empty())
            .map(|quote| {
                let page_start = quote.page_start.max(1);
                Quote {
                    text: quote.text,
                    page_start,
                    page_end: quote.page_end.max(page_start),
                    validated: false,
                }
            })
            .collect::<Vec<Quote>>();

        info!(
            requirement = requirement.id,
            state = state.as_str(),
            confidence,
            quotes = relevant_quotes.len(),
            "analysis complete"
        );

        ComplianceResult {
            compliance_question: requirement.question.to_string(),
            compliance_state: state,
            confidence,
            relevant_quotes,
            rationale: raw.rationale,
            evidence_chunks_used: evidence_ids(evidence),
        }
    }
}

/// The synthesized judgment used when the model's output cannot be parsed
/// or the requirement's LLM calls failed outright.
pub fn fallback_result(
    requirement: &Requirement,
    evidence: &[EvidenceChunk],
) -> ComplianceResult {
    ComplianceResult {
        compliance_question: requirement.question.to_string(),
        compliance_state: ComplianceState::NonCompliant,
        confidence: 10,
        relevant_quotes: Vec::new(),
        rationale: FALLBACK_RATIONALE.to_string(),
        evidence_chunks_used: evidence_ids(evidence),
    }
}

fn evidence_ids(evidence: &[EvidenceChunk]) -> Vec<String> {
    evidence
        .iter()
        .map(|item| item.chunk.chunk_id.clone())
        .collect()
}

/// Format the evidence block: numbered entries labeled with their page
/// range, raw text as extracted.
pub(crate) fn format_evidence(evidence: &[EvidenceChunk]) -> String {
    if evidence.is_empty() {
        return "[No relevant evidence found in contract]".to_string();
    }

    evidence
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let pages = if item.chunk.page_end == item.chunk.page_start {
                format!("[Pages {}]", item.chunk.page_start)
            } else {
                format!("[Pages {}-{}]", item.chunk.page_start, item.chunk.page_end)
            };
            format!("Evidence {} {}:\n{}", index + 1, pages, item.chunk.text)
        })
        .collect::<Vec<String>>()
        .join("\n\n")
}

fn build_prompt(requirement: &Requirement, evidence: &[EvidenceChunk]) -> String {
    format!(
        "You are a contract compliance analyst. Analyze the following contract evidence and determine compliance.\n\n\
REQUIREMENT:\n{question}\n\n\
RUBRIC:\n{rubric}\n\n\
EVIDENCE (from contract):\n{evidence}\n\n\
TASK:\n\
Based ONLY on the evidence provided above, determine the compliance state and provide your analysis.\n\n\
OUTPUT FORMAT (JSON only, no other text):\n\
{{\n\
  \"compliance_state\": \"Fully Compliant\" | \"Partially Compliant\" | \"Non-Compliant\",\n\
  \"confidence\": <integer 0-100>,\n\
  \"relevant_quotes\": [\n\
    {{\"text\": \"exact quote from evidence\", \"page_start\": <page_num>, \"page_end\": <page_num>}}\n\
  ],\n\
  \"rationale\": \"Brief explanation of determination based on evidence\"\n\
}}\n\n\
IMPORTANT:\n\
- compliance_state must be EXACTLY one of: \"Fully Compliant\", \"Partially Compliant\", \"Non-Compliant\"\n\
- Include only verbatim quotes from the evidence above\n\
- Reference page numbers from evidence labels\n\
- Return ONLY valid JSON, no additional text\n\n\
JSON:",
        question = requirement.question,
        rubric = requirement.rubric,
        evidence = format_evidence(evidence),
    )
}

fn build_repair_prompt(invalid_response: &str) -> String {
    let truncated = invalid_response.chars().take(500).collect::<String>();
    format!(
        "The previous response was not valid JSON. Please fix it.\n\n\
REQUIRED FORMAT:\n\
{{\n\
  \"compliance_state\": \"Fully Compliant\" | \"Partially Compliant\" | \"Non-Compliant\",\n\
  \"confidence\": <integer 0-100>,\n\
  \"relevant_quotes\": [\n\
    {{\"text\": \"quote\", \"page_start\": <page>, \"page_end\": <page>}}\n\
  ],\n\
  \"rationale\": \"explanation\"\n\
}}\n\n\
PREVIOUS OUTPUT (invalid):\n{truncated}\n\n\
Return ONLY valid JSON with the correct format:"
    )
}

#[derive(Debug, Deserialize)]
struct RawJudgment {
    compliance_state: String,
    confidence: f64,
    #[serde(default)]
    relevant_quotes: Vec<RawQuote>,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    #[serde(default)]
    text: String,
    #[serde(default = "default_page")]
    page_start: u32,
    #[serde(default = "default_page")]
    page_end: u32,
}

fn default_page() -> u32 {
    1
}

fn parse_judgment(response: &str) -> Option<RawJudgment> {
    serde_json::from_str(extract_json(response)).ok()
}

/// Slice out the JSON object when the model wrapped it in prose or code
/// fences: everything from the first `{` to the last `}`.
pub(crate) fn extract_json(response: &str) -> &str {
    match (response.find('{'), response.rfind('}')) {
        (Some(start), Some(end)) if end > start => &response[start..=end],
        _ => response,
    }
}
