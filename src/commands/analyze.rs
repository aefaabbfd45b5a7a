use std::fs;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use contract_analyzer::model::ComplianceResult;
use contract_analyzer::run_analysis;
use contract_analyzer::util::write_json_pretty;

use crate::cli::AnalyzeArgs;
use crate::commands::{build_transport, display_filename};

#[derive(Debug, Serialize)]
struct AnalysisReport<'a> {
    doc_id: Uuid,
    filename: &'a str,
    page_count: usize,
    needs_ocr: bool,
    avg_chars_per_page: u32,
    results: &'a [ComplianceResult],
}

pub async fn run(args: AnalyzeArgs) -> Result<()> {
    let bytes = fs::read(&args.pdf)
        .with_context(|| format!("failed to read {}", args.pdf.display()))?;
    let filename = display_filename(&args.pdf);
    let llm = build_transport(&args.llm)?;

    let outcome = run_analysis(&llm, &bytes, &filename).await?;

    let report = AnalysisReport {
        doc_id: outcome.document.doc_id,
        filename: &outcome.document.filename,
        page_count: outcome.document.page_count,
        needs_ocr: outcome.document.metadata.needs_ocr,
        avg_chars_per_page: outcome.document.metadata.avg_chars_per_page,
        results: &outcome.results,
    };

    match &args.output {
        Some(path) => {
            write_json_pretty(path, &report)?;
            info!(path = %path.display(), "wrote analysis report");
        }
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(())
}
