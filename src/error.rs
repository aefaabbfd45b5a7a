use std::time::Duration;

use thiserror::Error;

/// Failure to turn uploaded bytes into a readable document. The only error
/// that is fatal to an analysis job.
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("unreadable PDF: {0}")]
    Unreadable(String),

    #[error("PDF is encrypted")]
    Encrypted,
}

/// LLM capability failure, surfaced only after retries are exhausted.
/// Messages carry transport diagnostics, never model output.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid completion payload: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Transient failures are worth retrying; payload-shape failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

/// The error surface the core exposes to its collaborator.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("failed to parse document: {0}")]
    Parser(#[from] ParserError),

    #[error("LLM request failed: {0}")]
    Llm(#[from] LlmError),

    #[error("internal error: {0}")]
    Internal(String),
}
