//! Async variant of the evaluation stack machine.
//!
//! Identical traversal and replay semantics to [`Evaluator`], but tool
//! invocations are awaited, for tools that drive hardware or remote
//! services. By default every tool registered in the runtime context is
//! adapted through [`BlockingTool`]; individual tools can be overridden
//! with native async implementations via `with_async_tool`.
//!
//! [`Evaluator`]: crate::evaluator::Evaluator

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use palaver_dsl::DslNode;
use serde_json::Value as JsonValue;

use crate::error::{EngineError, Result};
use crate::evaluator::eval_node;
use crate::outcome::EvaluationOutcome;
use crate::runtime::RuntimeContext;
use crate::tool::{AsyncTool, BlockingTool, ToolArgs};

struct AsyncFrame {
    index: usize,
}

/// Executes a resolved intent tree, awaiting each tool call.
pub struct AsyncEvaluator {
    runtime: Arc<RuntimeContext>,
    tools: HashMap<String, Arc<dyn AsyncTool>>,
    root: DslNode,
    stack: Vec<AsyncFrame>,
}

impl AsyncEvaluator {
    /// Create an async evaluator over a deep copy of `tree`, adapting
    /// the runtime's synchronous tools.
    pub fn new(runtime: Arc<RuntimeContext>, tree: &DslNode) -> Self {
        let tools = runtime
            .tools()
            .iter()
            .map(|tool| {
                (
                    tool.schema().name.clone(),
                    Arc::new(BlockingTool(Arc::clone(tool))) as Arc<dyn AsyncTool>,
                )
            })
            .collect();
        Self {
            runtime,
            tools,
            root: tree.clone(),
            stack: vec![AsyncFrame { index: 0 }],
        }
    }

    /// Register (or override) a native async tool.
    pub fn with_async_tool(mut self, tool: Arc<dyn AsyncTool>) -> Self {
        let _ = self.tools.insert(tool.schema().name.clone(), tool);
        self
    }

    /// A deep copy of the tree, including any evaluation annotations.
    pub fn tree(&self) -> DslNode {
        self.root.clone()
    }

    /// Run the tree to completion, awaiting each intent's tool call.
    pub async fn evaluate(&mut self) -> EvaluationOutcome {
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
                DslNode::Intent { .. } => {
                    let intent = node.clone();
                    match eval_node_async(&self.runtime, &self.tools, &intent).await {
                        Ok(value) => {
                            let wrapped = DslNode::IntentEvaluatedSuccess {
                                intent: Box::new(intent),
                                value,
                            };
                            if let Err(e) = self.replace_current(&path, wrapped) {
                                return EvaluationOutcome::aborted_unrecoverable(e);
                            }
                            self.pop_and_advance();
                        }
                        Err(error) if error.is_recoverable_tool_failure() => {
                            let resolver_node = DslNode::IntentRuntimeErrorResolver {
                                intent: Box::new(intent),
                                error_message: error.to_string(),
                            };
                            if let Err(e) = self.replace_current(&path, resolver_node) {
                                return EvaluationOutcome::aborted_unrecoverable(e);
                            }
                            return EvaluationOutcome::aborted_recoverable(error);
                        }
                        Err(error) => {
                            return EvaluationOutcome::aborted_unrecoverable(error);
                        }
                    }
                }
                DslNode::NodeList(items) => {
                    if self.stack[depth].index >= items.len() {
                        if depth == 0 {
                            completed = true;
                        }
                        self.pop_and_advance();
                    } else {
                        self.stack.push(AsyncFrame { index: 0 });
                    }
                }
                DslNode::IntentEvaluatedSuccess { .. } => {
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

    /// Stored outcomes only; no tool runs here.
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

/// Async value evaluation. Boxed because nested `ReturnValue` intents
/// recurse through an await point.
fn eval_node_async<'a>(
    runtime: &'a RuntimeContext,
    tools: &'a HashMap<String, Arc<dyn AsyncTool>>,
    node: &'a DslNode,
) -> Pin<Box<dyn Future<Output = Result<JsonValue>> + Send + 'a>> {
    Box::pin(async move {
        match node {
            DslNode::Intent { name, slots } => {
                let Some(tool) = tools.get(name.as_str()) else {
                    return Err(EngineError::UnknownTool(name.clone()));
                };
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
                    let raw = eval_node_async(runtime, tools, value).await?;
                    let arg = schema.arg(slot_name).ok_or_else(|| {
                        EngineError::Cast(format!("tool '{name}' has no argument '{slot_name}'"))
                    })?;
                    let _ = args.insert(slot_name.clone(), arg.ty.cast(&raw, true)?);
                }

                tracing::debug!(tool = %name, "invoking async tool");
                let returned = tool.invoke(&args).await.map_err(EngineError::Tool)?;
                match &schema.returns {
                    Some(ty) => ty.cast(&returned, false),
                    None => Ok(JsonValue::Null),
                }
            }
            DslNode::Slot { value, .. } => eval_node_async(runtime, tools, value).await,
            DslNode::ReturnValue(intent) => eval_node_async(runtime, tools, intent).await,
            DslNode::ListValue(items) | DslNode::NodeList(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(eval_node_async(runtime, tools, item).await?);
                }
                Ok(JsonValue::Array(values))
            }
            other => eval_node(runtime, other),
        }
    })
}
