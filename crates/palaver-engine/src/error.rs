//! Error types for the resolution and evaluation engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while resolving or evaluating an intent tree.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed DSL surface text or an invalid tree mutation.
    #[error("DSL error: {0}")]
    Dsl(#[from] palaver_dsl::DslError),

    /// The oracle transport failed or returned an unusable response.
    #[error("Oracle error: {0}")]
    Oracle(String),

    /// HTTP/network failure; the only error kind the transport retries.
    #[error("Network error: {0}")]
    Network(String),

    /// An intent names a tool that is not registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A value could not be coerced to a tool's declared argument or
    /// return type.
    #[error("Type cast error: {0}")]
    Cast(String),

    /// A tool invocation reported a failure.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// A QUERY_FILL oracle response carried a non-empty abort message.
    #[error("Query aborted: {0}")]
    QueryAborted(String),

    /// Evaluation reached a placeholder that resolution never replaced.
    #[error("Unresolved DSL node: {0}")]
    UnresolvedNode(&'static str),

    /// Behavior that is deliberately left unimplemented.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Broken internal invariant.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures reported by a tool invocation.
///
/// `AbortAndResolve` is the recoverable kind: the evaluator swaps the
/// failed intent for an error-resolver placeholder so a further
/// resolution pass can repair the tree with the user's help. `Retry`
/// marks transient failures; the engine never retries on its own, hosts
/// may. Everything else is `Failed` and unrecoverable.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool refused in a way the user can repair.
    #[error("{0}")]
    AbortAndResolve(String),

    /// Transient failure; safe to re-issue.
    #[error("{0}")]
    Retry(String),

    /// Unrecoverable failure.
    #[error("{0}")]
    Failed(String),
}

impl EngineError {
    /// True when this error is the recoverable tool failure kind.
    pub fn is_recoverable_tool_failure(&self) -> bool {
        matches!(self, EngineError::Tool(ToolError::AbortAndResolve(_)))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Oracle(format!("malformed response payload: {e}"))
    }
}
