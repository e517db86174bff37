use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    /// Unrecoverable configuration problem; fails `start` before the
    /// manager ever marks the source Running.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("broker error: {0}")]
    Broker(#[from] inflow_broker::BrokerError),

    #[error("filesystem watcher error: {0}")]
    Watch(String),

    #[error("{0}")]
    Other(String),
}

impl AdapterError {
    /// Whether retrying `start` can ever succeed. Config errors cannot be
    /// retried away; everything else goes through the backoff machine.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
