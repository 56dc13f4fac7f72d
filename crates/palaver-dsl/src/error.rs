//! Error types for DSL parsing and tree manipulation.

use thiserror::Error;

/// Result type alias for DSL operations.
pub type Result<T> = std::result::Result<T, DslError>;

/// Errors raised by the DSL layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DslError {
    /// Malformed surface syntax (unbalanced grouping, unterminated
    /// string, empty element, missing `=`, ...).
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// A child node does not satisfy a container's expected kind.
    #[error("Type error: {0}")]
    Type(String),

    /// An invalid mutation, such as replacing a child on a leaf node or
    /// indexing past the end of a container.
    #[error("Node error: {0}")]
    Node(String),
}

impl DslError {
    /// Syntax error with a character position.
    pub fn syntax_at(message: impl Into<String>, position: usize) -> Self {
        DslError::Syntax(format!("{} at position {}", message.into(), position))
    }
}
