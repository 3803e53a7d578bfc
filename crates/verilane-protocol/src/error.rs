use thiserror::Error;

/// A single backend message that could not be decoded.
///
/// Decoding continues with the next message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed JSON message: {message} in {snippet}")]
    MalformedJson { message: String, snippet: String },

    #[error("Message of type {msg_type} lacks field {field}")]
    MissingField { msg_type: String, field: String },

    #[error("Could not parse output line: {0}")]
    UnexpectedLine(String),

    #[error("Invalid position: {0}")]
    InvalidPosition(String),
}

impl DecodeError {
    pub(crate) fn malformed(err: &serde_json::Error, text: &str) -> Self {
        let snippet: String = text.chars().take(120).collect();
        DecodeError::MalformedJson {
            message: err.to_string(),
            snippet,
        }
    }

    pub(crate) fn missing(msg_type: &str, field: &str) -> Self {
        DecodeError::MissingField {
            msg_type: msg_type.to_string(),
            field: field.to_string(),
        }
    }
}
