use std::path::PathBuf;

use thiserror::Error;

/// Fatal at startup: any failure here aborts bootstrap before a single
/// Modbus socket is opened.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid range in {field}: min={min:?} max={max:?}")]
    InvalidRange {
        field: String,
        min: Option<i64>,
        max: Option<i64>,
    },
    #[error("missing required field: {field}")]
    MissingField { field: String },
}
