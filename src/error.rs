//! Error types for element analysis

use crate::sample::FileType;
use serde::{Deserialize, Serialize};

/// Errors raised while analyzing elements or writing results
#[derive(Debug, thiserror::Error)]
pub enum ElementError {
    /// E001: Audio file could not be opened or decoded
    #[error("Audio decode failed: {0}")]
    Decode(String),
    /// E002: MIDI file could not be parsed
    #[error("MIDI parse failed: {0}")]
    Parse(String),
    /// E003: Nothing to analyze in the input (e.g. no notes)
    #[error("{0}")]
    EmptyInput(String),
    /// E004: File extension is not a known audio or MIDI type
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),
    /// E005: A value could not be encoded as JSON
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// E006: Decoded audio is unusable (zero sample rate, NaN samples)
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),
    /// E007: Plot backend failure
    #[error("Rendering failed: {0}")]
    Render(String),
    /// E008: Configuration rejected
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// E009: Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ElementError {
    fn from(err: serde_json::Error) -> Self {
        ElementError::Serialization(err.to_string())
    }
}

impl From<hound::Error> for ElementError {
    fn from(err: hound::Error) -> Self {
        ElementError::Decode(err.to_string())
    }
}

impl From<symphonia::core::errors::Error> for ElementError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        ElementError::Decode(err.to_string())
    }
}

impl From<midly::Error> for ElementError {
    fn from(err: midly::Error) -> Self {
        ElementError::Parse(err.to_string())
    }
}

/// Failure marker stored in place of a fingerprint.
///
/// Serializes as `{"error": <message>, "type": <file type>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionError {
    #[serde(rename = "error")]
    pub message: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
}

impl ExtractionError {
    pub fn new(file_type: FileType, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file_type,
        }
    }

    /// Convert an extractor error into a record for the given file type
    pub fn from_error(file_type: FileType, err: &ElementError) -> Self {
        Self::new(file_type, err.to_string())
    }
}

impl std::fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.file_type.as_str())
    }
}

/// Result type alias for element analysis operations
pub type Result<T> = std::result::Result<T, ElementError>;
