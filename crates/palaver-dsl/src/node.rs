//! The DSL node model.
//!
//! Every node of an intent tree is one variant of [`DslNode`]. The enum
//! gives uniform traversal (`children`, `update_child`, ...), structural
//! equality, resolvedness, and rendering back to the DSL surface form,
//! so the resolution and evaluation machines can walk and rewrite trees
//! with flat `match` dispatch instead of virtual calls.
//!
//! Ownership is strictly tree-local: every parent owns its children, and
//! there are no back-pointers. Mutation happens through the parent via
//! `update_child` / `insert_child` / `remove_child`.

use crate::error::{DslError, Result};
use crate::text::quote_and_escape;

/// Expected child kind of a list container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// Any node is accepted (the tree root, `ABORT_WITH_NEW_INTENTS`).
    Any,
    /// Only value-kind nodes are accepted (`ListValue`).
    Value,
}

/// A node of the symbolic intent tree.
///
/// The placeholder variants (`Ask`, `QueryFill`, `QueryUser`,
/// `QueryGather`, `Abort`, `AbortWithNewDsl`,
/// `IntentRuntimeErrorResolver`) report `is_resolved() == false`; a tree
/// is ready for evaluation once no placeholder remains anywhere in it.
#[derive(Debug, Clone, PartialEq)]
pub enum DslNode {
    /// A literal scalar, stored as its raw surface text.
    Value(String),
    /// A textual quantity ("a few", "several", ...) mapped to an integer
    /// at evaluation time.
    FuzzyValue(String),
    /// An ordered sequence of value-kind nodes.
    ListValue(Vec<DslNode>),
    /// A named argument binding exactly one child value.
    Slot { name: String, value: Box<DslNode> },
    /// A tool invocation; children are uniquely-named `Slot` nodes.
    Intent { name: String, slots: Vec<DslNode> },
    /// An intent used in value position; evaluates to the tool's result.
    ReturnValue(Box<DslNode>),
    /// A question for the user, filling the enclosing slot.
    Ask(String),
    /// A query answered from runtime information without user input.
    QueryFill(String),
    /// A question asked by the user, answered by the system.
    QueryUser(String),
    /// A broad context-gathering query feeding intent generation.
    QueryGather {
        original_intent: String,
        query: String,
    },
    /// Extra slot bindings deferred into the enclosing intent; children
    /// are `Slot` nodes.
    PropagateSlots(Vec<DslNode>),
    /// Placeholder for "the same value as the previous intent's
    /// same-named slot".
    SameAsPreviousIntent,
    /// Cancel the enclosing intent.
    Abort,
    /// Cancel the enclosing intent and continue with a replacement
    /// subtree. The replacement is payload, not a traversable child.
    AbortWithNewDsl(Box<DslNode>),
    /// Replay-safe wrapper installed by the evaluator around an intent
    /// that already executed; holds the returned value.
    IntentEvaluatedSuccess {
        intent: Box<DslNode>,
        value: serde_json::Value,
    },
    /// Wrapper installed by the evaluator around an intent that failed
    /// recoverably; resolved through a further resolution pass.
    IntentRuntimeErrorResolver {
        intent: Box<DslNode>,
        error_message: String,
    },
    /// Heterogeneous node sequence; the tree root is always one.
    NodeList(Vec<DslNode>),
}

impl DslNode {
    /// Build a `Slot` node.
    pub fn slot(name: impl Into<String>, value: DslNode) -> DslNode {
        DslNode::Slot {
            name: name.into(),
            value: Box::new(value),
        }
    }

    /// Build an `Intent` node, checking that every child is a `Slot`
    /// and that slot names are distinct.
    pub fn intent(name: impl Into<String>, slots: Vec<DslNode>) -> Result<DslNode> {
        let name = name.into();
        let mut seen: Vec<&str> = Vec::with_capacity(slots.len());
        for slot in &slots {
            let Some(slot_name) = slot.slot_name() else {
                return Err(DslError::Type(format!(
                    "intent '{name}' child must be a slot, got {}",
                    slot.kind_name()
                )));
            };
            if seen.contains(&slot_name) {
                return Err(DslError::Type(format!(
                    "intent '{name}' has duplicate slot '{slot_name}'"
                )));
            }
            seen.push(slot_name);
        }
        Ok(DslNode::Intent { name, slots })
    }

    /// Build a `ListValue`, checking that every element is value-kind.
    pub fn list_value(items: Vec<DslNode>) -> Result<DslNode> {
        for item in &items {
            if !item.is_value_kind() {
                return Err(DslError::Type(format!(
                    "list value element must be value-kind, got {}",
                    item.kind_name()
                )));
            }
        }
        Ok(DslNode::ListValue(items))
    }

    /// Build a `PropagateSlots`, checking that every element is a `Slot`.
    pub fn propagate_slots(slots: Vec<DslNode>) -> Result<DslNode> {
        for slot in &slots {
            if slot.slot_name().is_none() {
                return Err(DslError::Type(format!(
                    "PROPAGATE_SLOT element must be a slot, got {}",
                    slot.kind_name()
                )));
            }
        }
        Ok(DslNode::PropagateSlots(slots))
    }

    /// Short variant name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            DslNode::Value(_) => "Value",
            DslNode::FuzzyValue(_) => "FuzzyValue",
            DslNode::ListValue(_) => "ListValue",
            DslNode::Slot { .. } => "Slot",
            DslNode::Intent { .. } => "Intent",
            DslNode::ReturnValue(_) => "ReturnValue",
            DslNode::Ask(_) => "Ask",
            DslNode::QueryFill(_) => "QueryFill",
            DslNode::QueryUser(_) => "QueryUser",
            DslNode::QueryGather { .. } => "QueryGather",
            DslNode::PropagateSlots(_) => "PropagateSlots",
            DslNode::SameAsPreviousIntent => "SameAsPreviousIntent",
            DslNode::Abort => "Abort",
            DslNode::AbortWithNewDsl(_) => "AbortWithNewDsl",
            DslNode::IntentEvaluatedSuccess { .. } => "IntentEvaluatedSuccess",
            DslNode::IntentRuntimeErrorResolver { .. } => "IntentRuntimeErrorResolver",
            DslNode::NodeList(_) => "NodeList",
        }
    }

    /// The slot name, when this node is a `Slot`.
    pub fn slot_name(&self) -> Option<&str> {
        match self {
            DslNode::Slot { name, .. } => Some(name),
            _ => None,
        }
    }

    /// The intent name, when this node is an `Intent`.
    pub fn intent_name(&self) -> Option<&str> {
        match self {
            DslNode::Intent { name, .. } => Some(name),
            _ => None,
        }
    }

    /// The static expected child kind of a list container, or `None`
    /// for every other node.
    pub fn expected_child_kind(&self) -> Option<ListKind> {
        match self {
            DslNode::NodeList(_) => Some(ListKind::Any),
            DslNode::ListValue(_) => Some(ListKind::Value),
            _ => None,
        }
    }

    /// True for nodes that evaluate to a plain value and may appear
    /// inside a `ListValue` or as a slot value.
    pub fn is_value_kind(&self) -> bool {
        matches!(
            self,
            DslNode::Value(_)
                | DslNode::FuzzyValue(_)
                | DslNode::ListValue(_)
                | DslNode::ReturnValue(_)
                | DslNode::SameAsPreviousIntent
        )
    }

    /// Ordered children of this node. Leaves return an empty slice.
    ///
    /// `AbortWithNewDsl` is a leaf: its replacement subtree is payload
    /// that must not be traversed (or resolved) before the abort fires.
    pub fn children(&self) -> &[DslNode] {
        match self {
            DslNode::ListValue(items)
            | DslNode::Intent { slots: items, .. }
            | DslNode::PropagateSlots(items)
            | DslNode::NodeList(items) => items,
            DslNode::Slot { value: child, .. }
            | DslNode::ReturnValue(child)
            | DslNode::IntentEvaluatedSuccess { intent: child, .. }
            | DslNode::IntentRuntimeErrorResolver { intent: child, .. } => {
                std::slice::from_ref(child.as_ref())
            }
            _ => &[],
        }
    }

    /// Mutable access to the children. Same shape as [`children`].
    ///
    /// [`children`]: DslNode::children
    pub fn children_mut(&mut self) -> &mut [DslNode] {
        match self {
            DslNode::ListValue(items)
            | DslNode::Intent { slots: items, .. }
            | DslNode::PropagateSlots(items)
            | DslNode::NodeList(items) => items,
            DslNode::Slot { value: child, .. }
            | DslNode::ReturnValue(child)
            | DslNode::IntentEvaluatedSuccess { intent: child, .. }
            | DslNode::IntentRuntimeErrorResolver { intent: child, .. } => {
                std::slice::from_mut(child.as_mut())
            }
            _ => &mut [],
        }
    }

    /// True when the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children().is_empty()
    }

    /// Check that `child` is acceptable at position `index` of this
    /// container, honoring the container's expected kind.
    fn check_child_kind(&self, index: Option<usize>, child: &DslNode) -> Result<()> {
        match self {
            DslNode::NodeList(_) => Ok(()),
            DslNode::ListValue(_) => {
                if child.is_value_kind() {
                    Ok(())
                } else {
                    Err(DslError::Type(format!(
                        "list value element must be value-kind, got {}",
                        child.kind_name()
                    )))
                }
            }
            DslNode::Intent { name, slots } => {
                let Some(slot_name) = child.slot_name() else {
                    return Err(DslError::Type(format!(
                        "intent '{name}' child must be a slot, got {}",
                        child.kind_name()
                    )));
                };
                let duplicate = slots
                    .iter()
                    .enumerate()
                    .any(|(i, s)| Some(i) != index && s.slot_name() == Some(slot_name));
                if duplicate {
                    return Err(DslError::Type(format!(
                        "intent '{name}' already has a slot named '{slot_name}'"
                    )));
                }
                Ok(())
            }
            DslNode::PropagateSlots(_) => {
                if child.slot_name().is_some() {
                    Ok(())
                } else {
                    Err(DslError::Type(format!(
                        "PROPAGATE_SLOT element must be a slot, got {}",
                        child.kind_name()
                    )))
                }
            }
            DslNode::Slot { .. } => Ok(()),
            DslNode::ReturnValue(_)
            | DslNode::IntentEvaluatedSuccess { .. }
            | DslNode::IntentRuntimeErrorResolver { .. } => match child {
                DslNode::Intent { .. } => Ok(()),
                _ => Err(DslError::Type(format!(
                    "{} child must be an intent, got {}",
                    self.kind_name(),
                    child.kind_name()
                ))),
            },
            _ => Err(DslError::Node(format!(
                "{} does not hold children",
                self.kind_name()
            ))),
        }
    }

    /// Replace the child at `index`.
    pub fn update_child(&mut self, index: usize, new: DslNode) -> Result<()> {
        self.check_child_kind(Some(index), &new)?;
        let kind = self.kind_name();
        let children = self.children_mut();
        let len = children.len();
        let Some(slot) = children.get_mut(index) else {
            return Err(DslError::Node(format!(
                "child index {index} out of bounds for {kind} of length {len}"
            )));
        };
        *slot = new;
        Ok(())
    }

    /// Insert a child at `index`, shifting later children right.
    ///
    /// Only growable containers accept insertion; fixed-arity nodes
    /// (`Slot`, `ReturnValue`, the evaluator wrappers) and leaves refuse.
    pub fn insert_child(&mut self, index: usize, new: DslNode) -> Result<()> {
        self.check_child_kind(None, &new)?;
        let kind = self.kind_name();
        match self {
            DslNode::ListValue(items)
            | DslNode::Intent { slots: items, .. }
            | DslNode::PropagateSlots(items)
            | DslNode::NodeList(items) => {
                if index > items.len() {
                    return Err(DslError::Node(format!(
                        "insert index {index} out of bounds for {kind} of length {}",
                        items.len()
                    )));
                }
                items.insert(index, new);
                Ok(())
            }
            _ => Err(DslError::Node(format!("cannot insert a child into {kind}"))),
        }
    }

    /// Remove and return the child at `index`.
    pub fn remove_child(&mut self, index: usize) -> Result<DslNode> {
        let kind = self.kind_name();
        match self {
            DslNode::ListValue(items)
            | DslNode::Intent { slots: items, .. }
            | DslNode::PropagateSlots(items)
            | DslNode::NodeList(items) => {
                if index >= items.len() {
                    return Err(DslError::Node(format!(
                        "remove index {index} out of bounds for {kind} of length {}",
                        items.len()
                    )));
                }
                Ok(items.remove(index))
            }
            _ => Err(DslError::Node(format!("cannot remove a child from {kind}"))),
        }
    }

    /// Follow a child-index path from this node.
    pub fn node_at(&self, path: &[usize]) -> Option<&DslNode> {
        let mut node = self;
        for &index in path {
            node = node.children().get(index)?;
        }
        Some(node)
    }

    /// Follow a child-index path from this node, mutably.
    pub fn node_at_mut(&mut self, path: &[usize]) -> Option<&mut DslNode> {
        let mut node = self;
        for &index in path {
            node = node.children_mut().get_mut(index)?;
        }
        Some(node)
    }

    /// True once no placeholder remains in this subtree.
    pub fn is_resolved(&self) -> bool {
        match self {
            DslNode::Ask(_)
            | DslNode::QueryFill(_)
            | DslNode::QueryUser(_)
            | DslNode::QueryGather { .. }
            | DslNode::Abort
            | DslNode::AbortWithNewDsl(_)
            | DslNode::IntentRuntimeErrorResolver { .. } => false,
            DslNode::IntentEvaluatedSuccess { .. } => true,
            _ => self.children().iter().all(DslNode::is_resolved),
        }
    }

    /// Render the canonical DSL surface form.
    ///
    /// A `NodeList` renders as the comma-joined document form (no
    /// brackets), so rendering the root of a parsed tree reproduces a
    /// parseable document. The evaluator wrappers render as their inner
    /// intent; they have no surface syntax of their own.
    pub fn render(&self) -> String {
        match self {
            DslNode::Value(text) => {
                if text.parse::<i64>().is_ok() || text.parse::<f64>().is_ok() {
                    text.clone()
                } else {
                    quote_and_escape(text)
                }
            }
            DslNode::FuzzyValue(text) => format!("F({})", quote_and_escape(text)),
            DslNode::ListValue(items) => format!("[{}]", render_joined(items)),
            DslNode::Slot { name, value } => format!("{name}={}", value.render()),
            DslNode::Intent { name, slots } => format!("{name}({})", render_joined(slots)),
            DslNode::ReturnValue(intent) => intent.render(),
            DslNode::Ask(question) => format!("ASK({})", quote_and_escape(question)),
            DslNode::QueryFill(query) => format!("QUERY_FILL({})", quote_and_escape(query)),
            DslNode::QueryUser(query) => format!("QUERY_USER({})", quote_and_escape(query)),
            DslNode::QueryGather {
                original_intent,
                query,
            } => format!(
                "QUERY_GATHER({}, {})",
                quote_and_escape(original_intent),
                quote_and_escape(query)
            ),
            DslNode::PropagateSlots(slots) => format!("PROPAGATE_SLOT({})", render_joined(slots)),
            DslNode::SameAsPreviousIntent => "SAME_AS_PREVIOUS_INTENT()".to_string(),
            DslNode::Abort => "ABORT()".to_string(),
            DslNode::AbortWithNewDsl(new_dsl) => {
                format!("ABORT_WITH_NEW_INTENTS([{}])", new_dsl.render())
            }
            DslNode::IntentEvaluatedSuccess { intent, .. }
            | DslNode::IntentRuntimeErrorResolver { intent, .. } => intent.render(),
            DslNode::NodeList(items) => render_joined(items),
        }
    }

    /// Multi-line indented diagnostic form of the subtree.
    pub fn pretty(&self) -> String {
        let mut out = String::new();
        self.pretty_into(&mut out, 0);
        out
    }

    fn pretty_into(&self, out: &mut String, indent: usize) {
        for _ in 0..indent {
            out.push_str("  ");
        }
        match self {
            DslNode::Value(text) => out.push_str(&format!("Value({text})")),
            DslNode::FuzzyValue(text) => out.push_str(&format!("FuzzyValue({text})")),
            DslNode::Slot { name, .. } => out.push_str(&format!("Slot({name})")),
            DslNode::Intent { name, .. } => out.push_str(&format!("Intent({name})")),
            DslNode::Ask(question) => out.push_str(&format!("Ask({question})")),
            DslNode::QueryFill(query) => out.push_str(&format!("QueryFill({query})")),
            DslNode::QueryUser(query) => out.push_str(&format!("QueryUser({query})")),
            DslNode::QueryGather { query, .. } => out.push_str(&format!("QueryGather({query})")),
            DslNode::IntentEvaluatedSuccess { value, .. } => {
                out.push_str(&format!("IntentEvaluatedSuccess(value={value})"));
            }
            DslNode::IntentRuntimeErrorResolver { error_message, .. } => {
                out.push_str(&format!("IntentRuntimeErrorResolver(error={error_message:?})"));
            }
            DslNode::AbortWithNewDsl(_) => out.push_str("AbortWithNewDsl"),
            other => out.push_str(other.kind_name()),
        }
        out.push('\n');
        for child in self.children() {
            child.pretty_into(out, indent + 1);
        }
        if let DslNode::AbortWithNewDsl(new_dsl) = self {
            new_dsl.pretty_into(out, indent + 1);
        }
    }
}

fn render_joined(items: &[DslNode]) -> String {
    items
        .iter()
        .map(DslNode::render)
        .collect::<Vec<_>>()
        .join(", ")
}
