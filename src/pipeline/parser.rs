use std::collections::{HashMap, HashSet};

use lopdf::Document as PdfFile;
use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ParserError;
use crate::model::{Document, DocumentMetadata, Page};
use crate::normalize::normalize;

/// Below this average page density the document is flagged as likely
/// scanned. The pipeline continues regardless; retrieval over near-empty
/// chunks degrades confidence on its own.
const OCR_DENSITY_THRESHOLD: u32 = 100;

/// An edge line must repeat on at least this many pages to count as a
/// running header or footer.
const EDGE_LINE_REPEAT_THRESHOLD: usize = 3;

/// Extract per-page text from PDF bytes with page provenance.
///
/// Page char ranges tile the concatenated document: page `i`'s
/// `char_offset_end` equals page `i+1`'s `char_offset_start`, covering
/// `[0, total_len)` with no gaps.
pub fn parse(bytes: &[u8], filename: &str) -> Result<Document, ParserError> {
    let pdf =
        PdfFile::load_mem(bytes).map_err(|error| ParserError::Unreadable(error.to_string()))?;
    if pdf.is_encrypted() {
        return Err(ParserError::Encrypted);
    }

    let mut raw_pages = Vec::new();
    for (page_number, _) in pdf.get_pages() {
        match pdf.extract_text(&[page_number]) {
            Ok(text) => raw_pages.push(text),
            Err(error) => {
                warn!(page = page_number, error = %error, "page text extraction failed");
                raw_pages.push(String::new());
            }
        }
    }

    let boilerplate = EdgeBoilerplate::survey(&raw_pages);
    let strip_edges = !boilerplate.is_empty();

    let space_runs = Regex::new(r"[ \t]+").expect("static pattern");
    let blank_runs = Regex::new(r"\n{3,}").expect("static pattern");

    let mut pages = Vec::with_capacity(raw_pages.len());
    let mut offset = 0usize;
    let mut total_chars = 0usize;

    for (index, raw_text) in raw_pages.iter().enumerate() {
        let cleaned = clean_page_text(raw_text, &boilerplate, &space_runs, &blank_runs);
        total_chars += cleaned.trim().chars().count();

        let char_offset_start = offset;
        let char_offset_end = offset + cleaned.len();
        offset = char_offset_end;

        pages.push(Page {
            page_number: (index + 1) as u32,
            normalized_text: normalize(&cleaned),
            raw_text: cleaned,
            char_offset_start,
            char_offset_end,
        });
    }

    let avg_chars_per_page = if pages.is_empty() {
        0
    } else {
        (total_chars / pages.len()) as u32
    };
    let needs_ocr = avg_chars_per_page < OCR_DENSITY_THRESHOLD;
    if needs_ocr {
        warn!(
            filename,
            avg_chars_per_page, "document has minimal extractable text, may need OCR"
        );
    }

    let document = Document {
        doc_id: Uuid::new_v4(),
        filename: filename.to_string(),
        page_count: pages.len(),
        metadata: DocumentMetadata {
            parser_used: "lopdf".to_string(),
            needs_ocr,
            avg_chars_per_page,
            total_pages: pages.len(),
            headers_footers_removed: strip_edges,
        },
        pages,
    };

    info!(
        filename,
        pages = document.page_count,
        chars = total_chars,
        needs_ocr,
        "parsed document"
    );

    Ok(document)
}

fn clean_page_text(
    raw: &str,
    boilerplate: &EdgeBoilerplate,
    space_runs: &Regex,
    blank_runs: &Regex,
) -> String {
    let mut lines = raw.lines().collect::<Vec<&str>>();

    if let Some(position) = lines.iter().position(|line| !line.trim().is_empty()) {
        if boilerplate.headers.contains(&fold_edge_line(lines[position])) {
            debug!(line = %lines[position].trim(), "stripped repeated header line");
            lines.remove(position);
        }
    }
    if let Some(position) = lines.iter().rposition(|line| !line.trim().is_empty()) {
        if boilerplate.footers.contains(&fold_edge_line(lines[position])) {
            debug!(line = %lines[position].trim(), "stripped repeated footer line");
            lines.remove(position);
        }
    }

    let joined = lines.join("\n");
    let collapsed = space_runs.replace_all(&joined, " ");
    let collapsed = blank_runs.replace_all(&collapsed, "\n\n");
    collapsed.trim().to_string()
}

/// The lines that open and close pages throughout the document. A line
/// recurring at the same edge of [`EDGE_LINE_REPEAT_THRESHOLD`] or more
/// pages is running boilerplate, not contract language.
struct EdgeBoilerplate {
    headers: HashSet<String>,
    footers: HashSet<String>,
}

impl EdgeBoilerplate {
    fn survey(pages: &[String]) -> Self {
        let mut header_counts = HashMap::<String, usize>::new();
        let mut footer_counts = HashMap::<String, usize>::new();

        for page in pages {
            let mut nonempty = page
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && line.len() <= 120);
            if let Some(first) = nonempty.next() {
                *header_counts.entry(fold_edge_line(first)).or_insert(0) += 1;
            }
            if let Some(last) = nonempty.last() {
                *footer_counts.entry(fold_edge_line(last)).or_insert(0) += 1;
            }
        }

        let recurring = |counts: HashMap<String, usize>| {
            counts
                .into_iter()
                .filter(|(_, count)| *count >= EDGE_LINE_REPEAT_THRESHOLD)
                .map(|(line, _)| line)
                .collect::<HashSet<String>>()
        };

        Self {
            headers: recurring(header_counts),
            footers: recurring(footer_counts),
        }
    }

    fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.footers.is_empty()
    }
}

/// Fold an edge line for comparison across pages: case and spacing vary
/// between renders of the same header, the words do not.
fn fold_edge_line(line: &str) -> String {
    line.split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_ascii_lowercase()
}
