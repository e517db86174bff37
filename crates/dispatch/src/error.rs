use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("invalid binding pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("no binding with id {0}")]
    UnknownBinding(Uuid),
}
