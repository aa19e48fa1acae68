use thiserror::Error;

#[derive(Error, Debug)]
pub enum TetherError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown session '{0}'")]
    UnknownSession(String),
}
