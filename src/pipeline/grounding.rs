use tracing::{info, warn};

use crate::model::{ComplianceResult, EvidenceChunk, Quote};
use crate::normalize::normalize;

/// Quotes shorter than this after normalization carry no evidentiary
/// weight and are rejected outright.
const MIN_QUOTE_CHARS: usize = 10;

/// Confidence floor for partially grounded results and ceiling for results
/// whose quotes were all removed.
const PARTIAL_REMOVAL_FLOOR: u8 = 20;
const ALL_REMOVED_CEILING: u8 = 30;

pub const NO_VERBATIM_QUOTES_NOTE: &str =
    "No verifiable verbatim quotes found in retrieved evidence";

/// Cross-check every quote the model emitted against the evidence it was
/// shown, dropping anything that is not a verbatim excerpt and adjusting
/// confidence accordingly. The compliance state is never changed here.
pub fn ground(mut result: ComplianceResult, evidence: &[EvidenceChunk]) -> ComplianceResult {
    let original_count = result.relevant_quotes.len();
    if original_count == 0 {
        return result;
    }

    let mut validated = Vec::new();
    for quote in std::mem::take(&mut result.relevant_quotes) {
        match match_quote(&quote.text, evidence) {
            Some((page_start, page_end)) => validated.push(Quote {
                text: quote.text,
                page_start,
                page_end,
                validated: true,
            }),
            None => {
                // Only a short prefix ever reaches the log.
                let prefix = quote.text.chars().take(30).collect::<String>();
                warn!(prefix = %prefix, "dropping quote not found in evidence");
            }
        }
    }

    let validated_count = validated.len();
    let removed_count = original_count - validated_count;

    if removed_count > 0 {
        if validated_count == 0 {
            result.confidence = result.confidence.min(ALL_REMOVED_CEILING);
            result
                .rationale
                .push_str(&format!(" {NO_VERBATIM_QUOTES_NOTE}"));
        } else {
            let penalty = (removed_count * 10).min(20) as u8;
            result.confidence = result
                .confidence
                .saturating_sub(penalty)
                .max(PARTIAL_REMOVAL_FLOOR);
            result.rationale.push_str(&format!(
                " [{removed_count} of {original_count} quotes removed during validation]"
            ));
        }
    }

    info!(
        validated = validated_count,
        removed = removed_count,
        confidence = result.confidence,
        "quote grounding complete"
    );

    result.relevant_quotes = validated;
    result
}

/// Locate a quote inside the evidence set: first as a substring of a single
/// chunk's normalized text (retrieval order), then as a substring of the
/// space-joined normalized text of a document-adjacent chunk pair. Spans
/// across three or more pages are not matched.
///
/// Returns the matched page range, or `None` when the quote must be
/// dropped.
pub(crate) fn match_quote(
    quote_text: &str,
    evidence: &[EvidenceChunk],
) -> Option<(u32, u32)> {
    let normalized = normalize(quote_text);
    if normalized.chars().count() < MIN_QUOTE_CHARS {
        return None;
    }

    for item in evidence {
        if item.chunk.normalized_text.contains(&normalized) {
            return Some((item.chunk.page_start, item.chunk.page_end));
        }
    }

    for first in evidence {
        for second in evidence {
            if first.chunk.page_end + 1 != second.chunk.page_start {
                continue;
            }
            let combined = format!(
                "{} {}",
                first.chunk.normalized_text, second.chunk.normalized_text
            );
            if combined.contains(&normalized) {
                return Some((first.chunk.page_start, second.chunk.page_end));
            }
        }
    }

    None
}
