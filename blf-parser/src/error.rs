//! Error types for dialog-info parsing

use thiserror::Error;

/// Errors that can occur while decoding a notification body
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The XML reader rejected the document
    #[error("XML deserialization failed: {0}")]
    XmlDeserializationFailed(String),

    /// The document is well-formed but not shaped like dialog-info
    #[error("Invalid XML structure: {0}")]
    InvalidXmlStructure(String),

    /// The root element is not in the namespace the schema variant requires
    #[error("Namespace processing failed: {0}")]
    NamespaceProcessingFailed(String),

    /// A line-state name that is not part of the vocabulary
    #[error("Unknown line state: {0}")]
    UnknownLineState(String),
}

/// Result type alias for parsing operations
pub type ParseResult<T> = Result<T, ParseError>;
