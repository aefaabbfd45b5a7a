use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::debug;

use crate::catalog::Requirement;
use crate::model::{Chunk, EvidenceChunk};
use crate::normalize::tokenize;

pub const BM25_K1: f64 = 1.5;
pub const BM25_B: f64 = 0.75;

/// Okapi BM25 index over one document's chunk corpus. Built once per
/// document and shared read-only across all requirements and chat turns;
/// borrows the chunk slice and must not outlive it.
pub struct Bm25Index<'a> {
    chunks: &'a [Chunk],
    term_frequencies: Vec<HashMap<String, f64>>,
    doc_lengths: Vec<f64>,
    avg_doc_length: f64,
    doc_freq: HashMap<String, usize>,
}

impl<'a> Bm25Index<'a> {
    pub fn new(chunks: &'a [Chunk]) -> Self {
        let mut term_frequencies = Vec::with_capacity(chunks.len());
        let mut doc_lengths = Vec::with_capacity(chunks.len());
        let mut doc_freq = HashMap::<String, usize>::new();

        for chunk in chunks {
            let tokens = tokenize(&chunk.normalized_text);
            let mut frequencies = HashMap::<String, f64>::new();
            for token in &tokens {
                *frequencies.entry(token.clone()).or_insert(0.0) += 1.0;
            }
            for term in frequencies.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            doc_lengths.push(tokens.len() as f64);
            term_frequencies.push(frequencies);
        }

        let avg_doc_length = if chunks.is_empty() {
            0.0
        } else {
            (doc_lengths.iter().sum::<f64>() / chunks.len() as f64).max(1.0)
        };

        Self {
            chunks,
            term_frequencies,
            doc_lengths,
            avg_doc_length,
            doc_freq,
        }
    }

    /// Top-K chunks for a requirement's curated keyword query.
    pub fn retrieve_for_requirement(
        &self,
        requirement: &Requirement,
        top_k: usize,
    ) -> Vec<EvidenceChunk> {
        let query_tokens = requirement
            .query_terms
            .iter()
            .flat_map(|term| tokenize(term))
            .collect::<Vec<String>>();
        self.retrieve(&query_tokens, top_k, requirement.id)
    }

    /// Top-K chunks for free-form query text (the chat path).
    pub fn retrieve_for_query(
        &self,
        query: &str,
        top_k: usize,
        label: &str,
    ) -> Vec<EvidenceChunk> {
        self.retrieve(&tokenize(query), top_k, label)
    }

    fn retrieve(
        &self,
        query_tokens: &[String],
        top_k: usize,
        requirement_id: &str,
    ) -> Vec<EvidenceChunk> {
        let scores = (0..self.chunks.len())
            .map(|index| self.score(index, query_tokens))
            .collect::<Vec<f64>>();

        let mut order = (0..self.chunks.len()).collect::<Vec<usize>>();
        order.sort_by(|&left, &right| {
            scores[right]
                .partial_cmp(&scores[left])
                .unwrap_or(Ordering::Equal)
                .then(left.cmp(&right))
        });
        order.truncate(top_k);

        let top_score = order.first().map(|&index| scores[index]).unwrap_or(0.0);

        let evidence = order
            .into_iter()
            .map(|index| EvidenceChunk {
                chunk: self.chunks[index].clone(),
                relevance_score: if top_score > 0.0 {
                    scores[index] / top_score
                } else {
                    0.0
                },
                requirement_id: requirement_id.to_string(),
            })
            .collect::<Vec<EvidenceChunk>>();

        debug!(
            requirement_id,
            retrieved = evidence.len(),
            top_score,
            "retrieved evidence"
        );

        evidence
    }

    fn score(&self, index: usize, query_tokens: &[String]) -> f64 {
        let corpus_size = self.chunks.len() as f64;
        let mut score = 0.0;

        for token in query_tokens {
            let Some(&df) = self.doc_freq.get(token) else {
                continue;
            };
            let term_frequency = match self.term_frequencies[index].get(token) {
                Some(&frequency) => frequency,
                None => continue,
            };

            let df = df as f64;
            let idf = ((corpus_size - df + 0.5) / (df + 0.5) + 1.0).ln();
            let length_norm =
                1.0 - BM25_B + BM25_B * self.doc_lengths[index] / self.avg_doc_length;
            score += idf * term_frequency * (BM25_K1 + 1.0)
                / (term_frequency + BM25_K1 * length_norm);
        }

        score
    }
}
