use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The whole input could not be loaded (file missing, collaborator down).
    #[error("Source unavailable ({origin}): {message}")]
    SourceUnavailable { origin: String, message: String },

    /// A single record could not be parsed or lacks its natural key.
    #[error("Malformed record at offset {offset} in {origin}: {message}")]
    SourceFormat {
        origin: String,
        offset: usize,
        message: String,
    },
}

impl IngestError {
    pub fn unavailable(origin: impl Into<String>, err: impl std::fmt::Display) -> Self {
        IngestError::SourceUnavailable {
            origin: origin.into(),
            message: err.to_string(),
        }
    }

    pub fn format(origin: impl Into<String>, offset: usize, err: impl std::fmt::Display) -> Self {
        IngestError::SourceFormat {
            origin: origin.into(),
            offset,
            message: err.to_string(),
        }
    }
}
