use thiserror::Error;

use crate::types::BoundaryState;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that abort an engine call.
///
/// Everything non-fatal (ambiguous boundaries, extraction misses, contamination,
/// timeouts) is recorded as a [`crate::Diagnostic`] on the result instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The source text is not valid Python
    #[error("Parse error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// Invalid engine options
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The run was cancelled before the cross-namespace join
    #[error("Run cancelled before completion")]
    Cancelled,

    /// A boundary state change the lifecycle does not allow
    #[error("Invalid boundary transition: {from:?} -> {to:?}")]
    InvalidTransition { from: BoundaryState, to: BoundaryState },

    /// Namespace not present in the result
    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    /// Tree-sitter error
    #[error("Tree-sitter error: {0}")]
    TreeSitter(String),
}

impl EngineError {
    /// Create a parse error (1-based line and column)
    pub fn parse(line: usize, column: usize, msg: impl Into<String>) -> Self {
        Self::Parse {
            line,
            column,
            message: msg.into(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a tree-sitter error
    pub fn tree_sitter(msg: impl Into<String>) -> Self {
        Self::TreeSitter(msg.into())
    }

    /// Whether this error aborted the whole run
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::InvalidConfig(_) | Self::Cancelled)
    }
}
