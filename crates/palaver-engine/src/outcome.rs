//! Step and evaluation outcome types.

use palaver_dsl::DslNode;
use serde_json::Value as JsonValue;

use crate::error::EngineError;
use crate::interaction::InteractionRequest;

/// Result of one resolution step.
///
/// Hosts only ever observe `Unchanged` (the tree is exhausted and fully
/// resolved) and `InteractionRequested` (the machine paused for a user
/// answer). `NewDslNodes` and `Abort` circulate between node handlers
/// and the stack machine, which consumes them internally.
#[derive(Debug)]
pub enum ResolutionOutcome {
    /// No changes were made; traversal proceeds (or finished).
    Unchanged,
    /// A placeholder expanded into replacement nodes that must be
    /// substituted for the current node.
    NewDslNodes(Vec<DslNode>),
    /// Resolution is paused until the host supplies a user answer.
    InteractionRequested(InteractionRequest),
    /// The current intent is cancelled, optionally replaced by a new
    /// subtree.
    Abort { replacement: Option<DslNode> },
}

/// Terminal status of an evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationStatus {
    Success,
    /// A tool failed recoverably; the tree now carries an error
    /// resolver and can be repaired by a new resolution pass.
    AbortedRecoverable,
    AbortedUnrecoverable,
}

/// Final result of evaluating a resolved tree.
#[derive(Debug)]
pub struct EvaluationOutcome {
    /// The produced value on success: the root's single child value, or
    /// the list of child values when the root holds several.
    pub value: Option<JsonValue>,
    pub status: EvaluationStatus,
    pub error: Option<EngineError>,
}

impl EvaluationOutcome {
    pub fn success(value: Option<JsonValue>) -> Self {
        Self {
            value,
            status: EvaluationStatus::Success,
            error: None,
        }
    }

    pub fn aborted_recoverable(error: EngineError) -> Self {
        Self {
            value: None,
            status: EvaluationStatus::AbortedRecoverable,
            error: Some(error),
        }
    }

    pub fn aborted_unrecoverable(error: EngineError) -> Self {
        Self {
            value: None,
            status: EvaluationStatus::AbortedUnrecoverable,
            error: Some(error),
        }
    }

    /// True when the run completed successfully.
    pub fn is_success(&self) -> bool {
        self.status == EvaluationStatus::Success
    }
}
