use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid XML: {0}")]
    Xml(String),

    #[error("payload is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("invalid extraction regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("line did not match extraction pattern")]
    Unmatched,

    #[error("syslog line did not match expected format")]
    SyslogUnmatched,

    #[error("empty payload")]
    Empty,
}
