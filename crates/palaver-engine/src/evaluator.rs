//! The evaluation stack machine.
//!
//! Evaluation runs over a fully resolved tree, invoking tools strictly
//! left-to-right depth-first. Every executed intent is replaced in the
//! tree by an `IntentEvaluatedSuccess` wrapper holding its returned
//! value, so re-running evaluation over the same tree (after a
//! recoverable repair elsewhere) never re-invokes a tool — tools may
//! move actuators or mutate external state, and replay must be safe.
//!
//! A tool failure of the recoverable kind swaps the intent for an
//! `IntentRuntimeErrorResolver` carrying the message; the host can then
//! run a fresh resolution pass over the returned tree and evaluate
//! again. Any other failure ends the run unrecoverably.

use std::sync::Arc;

use palaver_dsl::DslNode;
use serde_json::Value as JsonValue;

use crate::error::{EngineError, Result};
use crate::outcome::EvaluationOutcome;
use crate::runtime::RuntimeContext;
use crate::tool::ToolArgs;

/// Fixed table of fuzzy textual quantities.
const FUZZY_QUANTITIES: &[(&str, i64)] = &[
    ("a couple", 2),
    ("couple", 2),
    ("a few", 3),
    ("few", 3),
    ("several", 5),
    ("many", 8),
    ("a dozen", 12),
    ("dozen", 12),
    ("dozens", 24),
];

/// One evaluation frame: the index of the child currently being
/// visited under this frame's node.
#[derive(Debug, Clone, Copy)]
struct EvalFrame {
    index: usize,
}

/// Executes a resolved intent tree.
pub struct Evaluator {
    runtime: Arc<RuntimeContext>,
    root: DslNode,
    stack: Vec<EvalFrame>,
}

impl Evaluator {
    /// Create an evaluator over a deep copy of `tree`.
    pub fn new(runtime: Arc<RuntimeContext>, tree: &DslNode) -> Self {
        Self {
            runtime,
            root: tree.clone(),
            stack: vec![EvalFrame { index: 0 }],
        }
    }

    /// A deep copy of the tree, including any evaluation annotations.
    ///
    /// After an `AbortedRecoverable` outcome this carries the injected
    /// error resolver; hand it to a new `Resolver` to repair.
    pub fn tree(&self) -> DslNode {
        self.root.clone()
    }

    /// Run the tree to completion.
    pub fn evaluate(&mut self) -> EvaluationOutcome {
        let mut completed = false;

        while !self.stack.is_empty() {
            let depth = self.stack.len() - 1;
            let path: Vec<usize> = self.stack[..depth].iter().map(|f| f.index).collect();
            let Some(node) = self.root.node_at(&path) else {
                return EvaluationOutcome::aborted_unrecoverable(EngineError::Internal(format!(
                    "dangling evaluation path {path:?}"
                )));
            };

            match node {
                DslNode::Intent { .. } => match eval_node(&self.runtime, node) {
                    Ok(value) => {
                        let wrapped = DslNode::IntentEvaluatedSuccess {
                            intent: Box::new(node.clone()),
                            value,
                        };
                        if let Err(e) = self.replace_current(&path, wrapped) {
                            return EvaluationOutcome::aborted_unrecoverable(e);
                        }
                        self.pop_and_advance();
                    }
                    Err(error) if error.is_recoverable_tool_failure() => {
                        let resolver_node = DslNode::IntentRuntimeErrorResolver {
                            intent: Box::new(node.clone()),
                            error_message: error.to_string(),
                        };
                        tracing::debug!(
                            intent = node.intent_name().unwrap_or_default(),
                            error = %error,
                            "tool failed recoverably, injecting error resolver"
                        );
                        if let Err(e) = self.replace_current(&path, resolver_node) {
                            return EvaluationOutcome::aborted_unrecoverable(e);
                        }
                        return EvaluationOutcome::aborted_recoverable(error);
                    }
                    Err(error) => {
                        return EvaluationOutcome::aborted_unrecoverable(error);
                    }
                },
                DslNode::NodeList(items) => {
                    if self.stack[depth].index >= items.len() {
                        if depth == 0 {
                            completed = true;
                        }
                        self.pop_and_advance();
                    } else {
                        self.stack.push(EvalFrame { index: 0 });
                    }
                }
                DslNode::IntentEvaluatedSuccess { .. } => {
                    // Already executed on an earlier run; never re-invoke.
                    self.pop_and_advance();
                }
                other => {
                    let error = if other.is_resolved() {
                        EngineError::Internal(format!(
                            "unexpected node kind in evaluation: {}",
                            other.kind_name()
                        ))
                    } else {
                        EngineError::UnresolvedNode(other.kind_name())
                    };
                    return EvaluationOutcome::aborted_unrecoverable(error);
                }
            }
        }

        if !completed {
            return EvaluationOutcome::aborted_unrecoverable(EngineError::Internal(
                "evaluation terminated unexpectedly".to_string(),
            ));
        }

        match self.final_value() {
            Ok(value) => EvaluationOutcome::success(value),
            Err(error) => EvaluationOutcome::aborted_unrecoverable(error),
        }
    }

    /// Replace the node at `path` within its parent. The root itself
    /// has no parent and stays in place.
    fn replace_current(&mut self, path: &[usize], replacement: DslNode) -> Result<()> {
        let Some((&child_index, parent_path)) = path.split_last() else {
            return Ok(());
        };
        let parent = self
            .root
            .node_at_mut(parent_path)
            .ok_or_else(|| EngineError::Internal(format!("dangling parent path {parent_path:?}")))?;
        parent.update_child(child_index, replacement)?;
        Ok(())
    }

    fn pop_and_advance(&mut self) {
        let _ = self.stack.pop();
        if let Some(parent) = self.stack.last_mut() {
            parent.index += 1;
        }
    }

    /// Assemble the final value from the executed tree: the root's
    /// single child value, or the list of child values. Reads only
    /// stored outcomes — no tool runs here.
    fn final_value(&self) -> Result<Option<JsonValue>> {
        let mut values = Vec::new();
        for child in self.root.children() {
            values.push(eval_node(&self.runtime, child)?);
        }
        Ok(match values.len() {
            0 => None,
            1 => values.pop(),
            _ => Some(JsonValue::Array(values)),
        })
    }
}

/// Evaluate a value-kind or evaluable node to its runtime value.
///
/// Scalars are inferred from their literal text (integer, float, bool,
/// then string); typed coercion against a tool's declared argument
/// types happens at the intent dispatch site, where scalar-to-list
/// widening is allowed.
pub(crate) fn eval_node(runtime: &RuntimeContext, node: &DslNode) -> Result<JsonValue> {
    match node {
        DslNode::Value(text) => Ok(infer_scalar(text)),
        DslNode::FuzzyValue(text) => {
            let key = text.trim().to_lowercase();
            FUZZY_QUANTITIES
                .iter()
                .find(|(name, _)| *name == key)
                .map(|&(_, quantity)| JsonValue::from(quantity))
                .ok_or_else(|| EngineError::Cast(format!("unrecognized fuzzy value '{text}'")))
        }
        DslNode::ListValue(items) | DslNode::NodeList(items) => {
            let values = items
                .iter()
                .map(|item| eval_node(runtime, item))
                .collect::<Result<Vec<_>>>()?;
            Ok(JsonValue::Array(values))
        }
        DslNode::Slot { value, .. } => eval_node(runtime, value),
        DslNode::ReturnValue(intent) => eval_node(runtime, intent),
        DslNode::Intent { name, slots } => eval_intent(runtime, name, slots),
        DslNode::PropagateSlots(slots) => {
            let mut map = serde_json::Map::new();
            for slot in slots {
                let DslNode::Slot { name, value } = slot else {
                    return Err(EngineError::Internal(
                        "propagated slot set holds a non-slot node".to_string(),
                    ));
                };
                let _ = map.insert(name.clone(), eval_node(runtime, value)?);
            }
            Ok(JsonValue::Object(map))
        }
        DslNode::IntentEvaluatedSuccess { value, .. } => Ok(value.clone()),
        DslNode::SameAsPreviousIntent => Err(EngineError::NotImplemented(
            "SAME_AS_PREVIOUS_INTENT evaluation".to_string(),
        )),
        unresolved => Err(EngineError::UnresolvedNode(unresolved.kind_name())),
    }
}

/// Dispatch an intent to its tool: evaluate the slots in declared
/// order, coerce each to the declared argument type (widening scalars
/// into one-element lists where the argument is a list), invoke, and
/// cast the result to the declared return type.
fn eval_intent(runtime: &RuntimeContext, name: &str, slots: &[DslNode]) -> Result<JsonValue> {
    let tool = Arc::clone(runtime.get_tool(name)?);
    let schema = tool.schema();

    let mut args = ToolArgs::new();
    for slot in slots {
        let DslNode::Slot {
            name: slot_name,
            value,
        } = slot
        else {
            return Err(EngineError::Internal(format!(
                "intent '{name}' holds a non-slot child"
            )));
        };
        let raw = eval_node(runtime, value)?;
        let spec = schema.arg(slot_name).ok_or_else(|| {
            EngineError::Cast(format!("tool '{name}' has no argument '{slot_name}'"))
        })?;
        let coerced = spec.ty.cast(&raw, true)?;
        let _ = args.insert(slot_name.clone(), coerced);
    }

    tracing::debug!(tool = name, "invoking tool");
    let returned = tool.invoke(&args).map_err(EngineError::Tool)?;

    match &schema.returns {
        Some(ty) => ty.cast(&returned, false),
        None => Ok(JsonValue::Null),
    }
}
