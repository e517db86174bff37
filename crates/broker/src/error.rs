use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker config error: {0}")]
    Config(String),

    #[error("failed to parse broker message: {0}")]
    Parse(String),

    #[error("failed to ack message: {0}")]
    Ack(String),

    #[error("broker provider error: {0}")]
    Provider(String),
}
