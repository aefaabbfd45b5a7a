pub mod analyze;
pub mod chat;

use anyhow::{Context, Result};
use contract_analyzer::llm::{LlmTransport, OllamaClient, OpenAiClient};

use crate::cli::{LlmArgs, LlmMode};

pub fn build_transport(args: &LlmArgs) -> Result<LlmTransport> {
    match args.llm_mode {
        LlmMode::External => {
            let api_key = std::env::var(&args.api_key_env).with_context(|| {
                format!("{} is required for external LLM mode", args.api_key_env)
            })?;
            Ok(LlmTransport::External(OpenAiClient::new(
                api_key,
                args.model.clone(),
            )))
        }
        LlmMode::Local => Ok(LlmTransport::Local(OllamaClient::new(
            args.base_url.clone(),
            args.model.clone(),
        ))),
    }
}

pub fn display_filename(path: &std::path::Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("contract.pdf")
        .to_string()
}
