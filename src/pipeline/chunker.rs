use tracing::info;

use crate::model::{Chunk, Document};

/// Page-based chunking policy. The default (one page per chunk, zero
/// overlap) keeps quote-to-page mapping exact; other settings only trade
/// retrieval granularity.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub pages_per_chunk: usize,
    pub overlap_pages: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            pages_per_chunk: 1,
            overlap_pages: 0,
        }
    }
}

impl ChunkerConfig {
    pub fn new(pages_per_chunk: usize, overlap_pages: usize) -> Self {
        assert!(pages_per_chunk >= 1, "pages_per_chunk must be >= 1");
        assert!(
            overlap_pages < pages_per_chunk,
            "overlap_pages must be < pages_per_chunk"
        );
        Self {
            pages_per_chunk,
            overlap_pages,
        }
    }
}

/// Split a document into addressable, page-attributed chunks with dense
/// deterministic ids `<doc_id>:chunk_<n>`.
pub fn chunk(document: &Document, config: ChunkerConfig) -> Vec<Chunk> {
    let pages = &document.pages;
    let mut chunks = Vec::new();
    if pages.is_empty() {
        return chunks;
    }

    let stride = (config.pages_per_chunk - config.overlap_pages).max(1);
    let mut index = 0usize;
    let mut chunk_index = 0usize;

    while index < pages.len() {
        let end = (index + config.pages_per_chunk).min(pages.len());
        let window = &pages[index..end];

        let text = window
            .iter()
            .map(|page| page.raw_text.as_str())
            .collect::<Vec<&str>>()
            .join("\n\n");
        // Skip empty pages so the joined text stays in normalized form
        // (no double spaces), which quote matching relies on.
        let normalized_text = window
            .iter()
            .map(|page| page.normalized_text.as_str())
            .filter(|text| !text.is_empty())
            .collect::<Vec<&str>>()
            .join(" ");

        chunks.push(Chunk {
            chunk_id: format!("{}:chunk_{}", document.doc_id, chunk_index),
            text,
            normalized_text,
            page_start: window[0].page_number,
            page_end: window[window.len() - 1].page_number,
            char_range: (
                window[0].char_offset_start,
                window[window.len() - 1].char_offset_end,
            ),
        });

        chunk_index += 1;
        index += stride;
    }

    info!(
        doc_id = %document.doc_id,
        chunks = chunks.len(),
        pages_per_chunk = config.pages_per_chunk,
        overlap = config.overlap_pages,
        "chunked document"
    );

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    use uuid::Uuid;

    use crate::model::{DocumentMetadata, Page};
    use crate::normalize::normalize;

    fn document_with_pages(texts: &[&str]) -> Document {
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

        Document {
            doc_id: Uuid::new_v4(),
            filename: "contract.pdf".to_string(),
            page_count: pages.len(),
            metadata: DocumentMetadata {
                parser_used: "lopdf".to_string(),
                needs_ocr: false,
                avg_chars_per_page: 500,
                total_pages: pages.len(),
                headers_footers_removed: false,
            },
            pages,
        }
    }

    #[test]
    fn default_config_yields_one_chunk_per_page() {
        let document = document_with_pages(&["page one text", "page two text", "page three"]);
        let chunks = chunk(&document, ChunkerConfig::default());

        assert_eq!(chunks.len(), 3);
        for (index, chunk) in chunks.iter().enumerate() {
            assert_eq!(
                chunk.chunk_id,
                format!("{}:chunk_{}", document.doc_id, index)
            );
            assert_eq!(chunk.page_start, (index + 1) as u32);
            assert_eq!(chunk.page_end, chunk.page_start);
        }
        assert_eq!(chunks[1].text, "page two text");
    }

    #[test]
    fn chunk_char_ranges_follow_page_offsets() {
        let document = document_with_pages(&["alpha", "beta", "gamma"]);
        let chunks = chunk(&document, ChunkerConfig::default());

        for (chunk, page) in chunks.iter().zip(&document.pages) {
            assert_eq!(
                chunk.char_range,
                (page.char_offset_start, page.char_offset_end)
            );
        }
    }

    #[test]
    fn multi_page_chunks_with_overlap_cover_all_pages() {
        let document = document_with_pages(&["one", "two", "three", "four", "five"]);
        let chunks = chunk(&document, ChunkerConfig::new(2, 1));

        assert_eq!(chunks[0].page_start, 1);
        assert_eq!(chunks[0].page_end, 2);
        assert_eq!(chunks[1].page_start, 2);
        let last = chunks.last().unwrap();
        assert_eq!(last.page_end, 5);
    }

    #[test]
    fn empty_document_produces_no_chunks() {
        let document = document_with_pages(&[]);
        assert!(chunk(&document, ChunkerConfig::default()).is_empty());
    }
}
