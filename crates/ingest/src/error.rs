use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("source already registered: {0}")]
    DuplicateSource(String),

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("cursor store I/O error: {0}")]
    CursorStore(#[from] std::io::Error),

    #[error("cursor store corrupt: {0}")]
    CursorFormat(#[from] serde_json::Error),

    #[error("manager already started")]
    AlreadyStarted,
}
