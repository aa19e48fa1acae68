use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode submission: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no backend process running for session '{0}'")]
    NotRunning(String),

    #[error("codex executable not found; set CODEX_PATH or backend.codex_path")]
    CodexNotFound,

    #[error("codex version check failed: {0}")]
    VersionCheck(String),

    #[error("{0} is not handled by the backend client")]
    Unsupported(&'static str),
}
