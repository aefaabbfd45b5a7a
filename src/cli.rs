use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "contract-analyzer",
    version,
    about = "Evidence-first compliance analysis of PDF contracts"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Analyze(AnalyzeArgs),
    Chat(ChatArgs),
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// PDF contract to analyze
    #[arg(long)]
    pub pdf: PathBuf,

    /// Write the report JSON here instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub llm: LlmArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ChatArgs {
    /// PDF contract to question
    #[arg(long)]
    pub pdf: PathBuf,

    /// One-shot question to ask about the contract
    #[arg(long)]
    pub question: String,

    #[command(flatten)]
    pub llm: LlmArgs,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum LlmMode {
    External,
    Local,
}

#[derive(Args, Debug, Clone)]
pub struct LlmArgs {
    #[arg(long, value_enum, default_value_t = LlmMode::Local)]
    pub llm_mode: LlmMode,

    /// Model identifier passed to the provider
    #[arg(long, default_value = "llama3.1")]
    pub model: String,

    /// Base URL of the local LLM server
    #[arg(long, default_value = "http://localhost:11434")]
    pub base_url: String,

    /// Environment variable holding the external API key
    #[arg(long, default_value = "OPENAI_API_KEY")]
    pub api_key_env: String,
}
