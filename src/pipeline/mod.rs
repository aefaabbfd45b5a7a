pub mod analyzer;
pub mod chunker;
pub mod grounding;
pub mod parser;
pub mod retriever;

use tracing::{error, info};

use crate::catalog::{catalog, TOP_K};
use crate::error::CoreError;
use crate::llm::LlmClient;
use crate::model::AnalysisOutcome;

use self::analyzer::{fallback_result, Analyzer};
use self::chunker::ChunkerConfig;
use self::grounding::ground;
use self::retriever::Bm25Index;

/// Execute the full evidence-first pipeline over one uploaded contract:
/// parse, chunk, then for each catalog requirement retrieve, analyze, and
/// ground. Requirements run sequentially so a job never has more than one
/// LLM request in flight.
///
/// Parser failure is the only fatal error. A requirement whose LLM calls
/// fail (after retries) degrades to the fallback result without affecting
/// the others.
pub async fn run_analysis<L: LlmClient>(
    llm: &L,
    pdf_bytes: &[u8],
    filename: &str,
) -> Result<AnalysisOutcome, CoreError> {
    let document = parser::parse(pdf_bytes, filename)?;
    let chunks = chunker::chunk(&document, ChunkerConfig::default());

    let index = Bm25Index::new(&chunks);
    let analyzer = Analyzer::new(llm);

    let mut results = Vec::with_capacity(catalog().len());
    for requirement in catalog() {
        let evidence = index.retrieve_for_requirement(requirement, TOP_K);

        let result = match analyzer.analyze(requirement, &evidence).await {
            Ok(result) => result,
            Err(llm_error) => {
                error!(
                    requirement = requirement.id,
                    error = %llm_error,
                    "requirement analysis failed, using fallback result"
                );
                fallback_result(requirement, &evidence)
            }
        };

        results.push(ground(result, &evidence));
    }

    info!(
        doc_id = %document.doc_id,
        results = results.len(),
        needs_ocr = document.metadata.needs_ocr,
        "analysis job complete"
    );

    Ok(AnalysisOutcome {
        document,
        chunks,
        results,
    })
}
