// src/core/error.rs

use std::path::PathBuf;

/// Fatal errors. Anything surfacing as a `SweepError` aborts the whole run.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("Unknown scanner: {0}")]
    UnknownScanner(String),

    #[error("Scanner '{scanner}' requires the command '{command}', which was not found on PATH")]
    MissingCommand { scanner: String, command: String },

    #[error("Scanner '{0}' refused to initialize; aborting the run")]
    InitVeto(String),

    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Public Suffix List unavailable: {0}")]
    SuffixList(String),

    #[error("Remote backend setup failed: {0}")]
    RemoteSetup(String),
}

impl SweepError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SweepError::Io { path: path.into(), source }
    }
}

pub type SweepResult<T> = Result<T, SweepError>;
