use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SepiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid assembly level: {0} (expected complete_genome|chromosome|scaffold|contig|none)")]
    InvalidAssemblyLevel(String),

    #[error("malformed search query: {0}")]
    MalformedQuery(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse YAML config: {0}")]
    ConfigParse(String),

    #[error("failed to read protein list at {0}")]
    ProteinListRead(PathBuf),

    #[error("NCBI request failed: {0}")]
    NcbiHttp(String),

    #[error("NCBI returned status {status}: {message}")]
    NcbiStatus { status: u16, message: String },

    #[error("NCBI unavailable after {attempts} attempts: {detail}")]
    Unavailable { attempts: usize, detail: String },

    #[error("malformed NCBI response: {0}")]
    MalformedResponse(String),

    #[error("resolution timed out after {0:?}")]
    Timeout(Duration),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to write report: {0}")]
    Report(String),
}

impl SepiError {
    /// Transport failures a later run may not hit again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SepiError::Unavailable { .. } | SepiError::NcbiHttp(_) | SepiError::Timeout(_)
        )
    }
}
