use std::fs;

use anyhow::{Context, Result};

use contract_analyzer::chat::{build_chat_context, chat_answer};
use contract_analyzer::model::ChatSession;
use contract_analyzer::pipeline::chunker::{chunk, ChunkerConfig};
use contract_analyzer::pipeline::parser::parse;

use crate::cli::ChatArgs;
use crate::commands::{build_transport, display_filename};

pub async fn run(args: ChatArgs) -> Result<()> {
    let bytes = fs::read(&args.pdf)
        .with_context(|| format!("failed to read {}", args.pdf.display()))?;
    let filename = display_filename(&args.pdf);
    let llm = build_transport(&args.llm)?;

    let document = parse(&bytes, &filename)?;
    let chunks = chunk(&document, ChunkerConfig::default());
    let context = build_chat_context(&document, &chunks);
    let mut session = ChatSession::new(document.doc_id);

    let answer = chat_answer(&llm, &mut session, &args.question, &context).await?;
    println!("{}", serde_json::to_string_pretty(&answer)?);

    Ok(())
}
