//! The resolution stack machine.
//!
//! The resolver walks the intent tree depth-first with an explicit
//! stack, so a run can pause for user interaction and resume exactly
//! where it stopped: the traversal frames plus the
//! [`ResolutionContext`] are the whole program counter. Each node gets
//! the lifecycle `pre_resolution` → (children, recursively) →
//! `do_resolution` → `post_resolution`, with `on_reentry` fired on the
//! parent between children so propagated slots merge into their intent
//! as soon as they become available.
//!
//! `do_resolution` of the placeholder nodes consults the oracle and
//! yields replacement nodes, which the machine substitutes in place;
//! `ABORT` unwinds to the nearest enclosing node list. One public
//! `step` call runs until the tree is exhausted, an interaction is
//! required, or an error surfaces.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use palaver_dsl::{parse_document, DslNode};
use regex::Regex;

use crate::context::{ResolutionContext, TraversalFrame};
use crate::error::{EngineError, Result};
use crate::interaction::{Interaction, InteractionRequest, NodePath};
use crate::oracle::OracleRequest;
use crate::outcome::ResolutionOutcome;
use crate::prompts::Phase;
use crate::runtime::RuntimeContext;

/// `reasoning:` / `value:` / `abort:` triplet of a QUERY_FILL response.
static QUERY_FILL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)reasoning:\s*(.*?)\nvalue:\s*(.*?)\nabort:\s*(.*)").unwrap()
});

/// `reasoning:` / `user friendly answer:` pair of the query responses.
static FRIENDLY_ANSWER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)reasoning:\s*(.*?)\nuser friendly answer:(.*)").unwrap()
});

/// Result of installing replacement nodes for the current node.
enum Substitution {
    Installed,
    Aborted(Option<DslNode>),
}

/// Orchestrates the resolution of an intent tree.
///
/// A resolver is created either from a raw user prompt (the
/// intent-sequencer oracle produces the initial tree) or from an
/// existing tree (typically one carrying an error resolver after a
/// failed evaluation). Resolution then advances through [`step`]:
///
/// ```no_run
/// # async fn drive(runtime: std::sync::Arc<palaver_engine::RuntimeContext>) ->
/// #     palaver_engine::Result<()> {
/// use palaver_engine::{Interaction, Resolver, ResolutionOutcome};
///
/// let mut resolver = Resolver::from_prompt(runtime, "give me 3 screws").await?;
/// let mut reply: Option<Interaction> = None;
/// loop {
///     match resolver.step(reply.take()).await? {
///         ResolutionOutcome::InteractionRequested(request) => {
///             let answer = "12mm"; // however the host asks the user
///             reply = Some(Interaction::new(request, answer));
///         }
///         _ => break, // tree exhausted and fully resolved
///     }
/// }
/// # Ok(()) }
/// ```
///
/// [`step`]: Resolver::step
pub struct Resolver {
    runtime: Arc<RuntimeContext>,
    ctx: ResolutionContext,
    root: DslNode,
}

impl Resolver {
    /// Create a resolver from a natural-language prompt.
    ///
    /// Invokes the intent-sequencer oracle once, parses its answer as
    /// the root tree, and initializes the traversal stack.
    pub async fn from_prompt(runtime: Arc<RuntimeContext>, prompt: &str) -> Result<Self> {
        let mut ctx = ResolutionContext::new();

        let system = runtime.system_prompt(Phase::IntentSequencer).to_string();
        let request = OracleRequest::new(
            "main",
            Phase::IntentSequencer.adapter(),
            system.clone(),
            prompt,
        );
        let answer = runtime.oracle().complete(request).await?;
        ctx.log_oracle_call("main", system, prompt, &answer);

        let root = parse_document(&answer)?;
        tracing::debug!(dsl = %root.render(), "intent sequencer produced initial tree");

        ctx.call_stack.push(TraversalFrame::start());
        Ok(Self { runtime, ctx, root })
    }

    /// Create a resolver over a deep copy of an existing tree.
    ///
    /// Used to resume after evaluation injected an error resolver. The
    /// root must be a node list.
    pub fn from_tree(runtime: Arc<RuntimeContext>, tree: &DslNode) -> Result<Self> {
        if !matches!(tree, DslNode::NodeList(_)) {
            return Err(EngineError::Internal(format!(
                "resolver root must be a node list, got {}",
                tree.kind_name()
            )));
        }
        let mut ctx = ResolutionContext::new();
        ctx.call_stack.push(TraversalFrame::start());
        Ok(Self {
            runtime,
            ctx,
            root: tree.clone(),
        })
    }

    /// A deep copy of the current tree.
    pub fn tree(&self) -> DslNode {
        self.root.clone()
    }

    /// The resolution state, including the oracle call log.
    pub fn context(&self) -> &ResolutionContext {
        &self.ctx
    }

    /// Advance resolution until the next pause, completion, or error.
    ///
    /// Pass the [`Interaction`] pairing the previous
    /// `InteractionRequested` outcome with the user's answer, or `None`
    /// on the first call. Returns `Unchanged` once the tree is
    /// exhausted; the stack is preserved across pauses so the machine
    /// resumes at the exact frame that requested interaction.
    pub async fn step(&mut self, interaction: Option<Interaction>) -> Result<ResolutionOutcome> {
        let mut interaction = interaction;

        loop {
            let Some(depth) = self.ctx.call_stack.len().checked_sub(1) else {
                return Ok(ResolutionOutcome::Unchanged);
            };

            let path = self.path_for(depth);
            let (is_leaf, child_count) = {
                let node = self.node(&path)?;
                (node.is_leaf(), node.children().len())
            };
            let next_child = self.ctx.call_stack[depth].next_child;

            if is_leaf || next_child >= child_count {
                let outcome = self.do_resolution(&path, interaction.as_mut()).await?;
                match outcome {
                    ResolutionOutcome::Abort { replacement } => {
                        self.unwind_abort(replacement)?;
                    }
                    ResolutionOutcome::InteractionRequested(request) => {
                        return Ok(ResolutionOutcome::InteractionRequested(request));
                    }
                    ResolutionOutcome::Unchanged => {
                        self.post_resolution(&path)?;
                        self.reentry_on_parent()?;
                        let _ = self.ctx.call_stack.pop();
                    }
                    ResolutionOutcome::NewDslNodes(nodes) => {
                        self.post_resolution(&path)?;
                        match self.substitute(nodes)? {
                            Substitution::Aborted(replacement) => {
                                self.unwind_abort(replacement)?;
                            }
                            Substitution::Installed => {
                                let new_path = self.path_for(depth);
                                self.pre_resolution(&new_path)?;
                                self.reentry_on_parent()?;
                            }
                        }
                    }
                }
            } else {
                self.ctx.call_stack[depth].next_child += 1;
                self.ctx.call_stack.push(TraversalFrame::start());
                let child_path = self.path_for(depth + 1);
                self.pre_resolution(&child_path)?;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Stack bookkeeping
    // ─────────────────────────────────────────────────────────────────

    /// Child-index path of the node owned by the frame at `depth`.
    ///
    /// Frame `k`'s node is the child the frame below most recently
    /// descended into, so the path is the prefix of `next_child - 1`
    /// values.
    fn path_for(&self, depth: usize) -> Vec<usize> {
        (0..depth)
            .map(|i| self.ctx.call_stack[i].next_child - 1)
            .collect()
    }

    fn node(&self, path: &[usize]) -> Result<&DslNode> {
        self.root
            .node_at(path)
            .ok_or_else(|| EngineError::Internal(format!("dangling traversal path {path:?}")))
    }

    fn node_mut(&mut self, path: &[usize]) -> Result<&mut DslNode> {
        self.root
            .node_at_mut(path)
            .ok_or_else(|| EngineError::Internal(format!("dangling traversal path {path:?}")))
    }

    // ─────────────────────────────────────────────────────────────────
    // Lifecycle hooks
    // ─────────────────────────────────────────────────────────────────

    fn pre_resolution(&mut self, path: &[usize]) -> Result<()> {
        match self.node(path)? {
            DslNode::Intent { name, .. } => {
                let name = name.clone();
                self.ctx.push_intent_frame(name);
            }
            DslNode::Slot { name, .. } => {
                let slot_name = name.clone();
                let mut other_slots = BTreeMap::new();
                if let Some((_, parent_path)) = path.split_last() {
                    if let Some(DslNode::Intent { slots, .. }) = self.root.node_at(parent_path) {
                        for sibling in slots {
                            if let DslNode::Slot { name: other, value } = sibling {
                                if *other != slot_name {
                                    other_slots.insert(other.clone(), value.render());
                                }
                            }
                        }
                    }
                }
                self.ctx.set_current_slot(slot_name, other_slots);
            }
            _ => {}
        }
        Ok(())
    }

    fn post_resolution(&mut self, path: &[usize]) -> Result<()> {
        match self.node(path)? {
            DslNode::Intent { .. } => self.ctx.pop_intent_frame(),
            DslNode::Slot { .. } => self.ctx.clear_current_slot(),
            _ => {}
        }
        Ok(())
    }

    /// Fire the reentry hook on the parent of the current node: an
    /// intent merges any propagated slots that resolution of the
    /// current child produced.
    fn reentry_on_parent(&mut self) -> Result<()> {
        let len = self.ctx.call_stack.len();
        if len < 2 {
            return Ok(());
        }
        let parent_path = self.path_for(len - 2);
        if matches!(self.node(&parent_path)?, DslNode::Intent { .. }) {
            self.merge_propagated(&parent_path)?;
        }
        Ok(())
    }

    /// Merge pending propagated slot sets into the intent at
    /// `intent_path`: same-named slots get their value replaced,
    /// unmatched names are appended as new slots.
    fn merge_propagated(&mut self, intent_path: &[usize]) -> Result<()> {
        if !self.ctx.has_pending_propagations() {
            return Ok(());
        }
        let propagations = self.ctx.take_propagated_slots();
        let intent = self.node_mut(intent_path)?;

        for slots in propagations {
            for slot in slots {
                let Some(slot_name) = slot.slot_name().map(str::to_string) else {
                    return Err(EngineError::Internal(
                        "propagated slot set holds a non-slot node".to_string(),
                    ));
                };
                let existing = intent
                    .children()
                    .iter()
                    .position(|s| s.slot_name() == Some(slot_name.as_str()));
                tracing::trace!(
                    intent = intent.intent_name().unwrap_or_default(),
                    slot = %slot_name,
                    replaced = existing.is_some(),
                    "merging propagated slot"
                );
                match existing {
                    Some(index) => intent.update_child(index, slot)?,
                    None => {
                        let end = intent.children().len();
                        intent.insert_child(end, slot)?;
                    }
                }
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────
    // Node resolution
    // ─────────────────────────────────────────────────────────────────

    async fn do_resolution(
        &mut self,
        path: &[usize],
        interaction: Option<&mut Interaction>,
    ) -> Result<ResolutionOutcome> {
        let node = self.node(path)?.clone();
        match node {
            DslNode::Ask(question) => {
                self.ask_protocol(path, &question, Phase::SlotResolver, None, interaction)
                    .await
            }
            DslNode::QueryFill(query) => self.do_query_fill(&query).await,
            DslNode::QueryUser(query) => self.do_query_user(path, &query, interaction).await,
            DslNode::QueryGather {
                original_intent,
                query,
            } => self.do_query_gather(&original_intent, &query).await,
            DslNode::IntentRuntimeErrorResolver {
                intent,
                error_message,
            } => {
                self.ask_protocol(
                    path,
                    &error_message,
                    Phase::ErrorResolver,
                    Some(intent.render()),
                    interaction,
                )
                .await
            }
            DslNode::Abort => Ok(ResolutionOutcome::Abort { replacement: None }),
            DslNode::AbortWithNewDsl(new_dsl) => Ok(ResolutionOutcome::Abort {
                replacement: Some(*new_dsl),
            }),
            _ => Ok(ResolutionOutcome::Unchanged),
        }
    }

    /// Shared question/answer protocol of `Ask`, `QueryUser` reentry,
    /// and the error resolver.
    ///
    /// Without a matching unconsumed answer, pause with an interaction
    /// request. With one, consume it, hand the full clarification
    /// context to the phase oracle, and substitute whatever DSL it
    /// returns.
    async fn ask_protocol(
        &mut self,
        path: &[usize],
        question: &str,
        phase: Phase,
        failed_intent: Option<String>,
        interaction: Option<&mut Interaction>,
    ) -> Result<ResolutionOutcome> {
        let Some(interaction) = interaction.filter(|i| {
            !i.answer.consumed && i.request.requester.as_slice() == path
        }) else {
            return Ok(ResolutionOutcome::InteractionRequested(
                self.interaction_request(path, question),
            ));
        };

        interaction.answer.consumed = true;
        let user_answer = interaction.answer.content.clone();

        // A clarification chain keeps pointing at the question that
        // started it.
        let source_question = self
            .ctx
            .clarified()
            .first()
            .map(|round| round.question.clone())
            .unwrap_or_else(|| question.to_string());

        let mut block = format!(
            "resolution_context:\n  intent: {}\n  slot: {}\n{}\n",
            self.ctx.current_intent().unwrap_or("none"),
            self.ctx.current_slot().unwrap_or("none"),
            self.ctx.format_clarified_yaml(),
        );
        if let Some(failed) = failed_intent {
            block.push_str(&format!("  failed_intent: {failed}\n  error: {question}\n"));
        }
        block.push_str(&format!(
            "  current_question: {source_question}\n  current_user_answer: {user_answer}"
        ));

        let nodes = self.consult_oracle_for_dsl(phase, block).await?;
        self.ctx
            .push_clarified(NodePath::new(path.to_vec()), question, user_answer);
        Ok(ResolutionOutcome::NewDslNodes(nodes))
    }

    async fn do_query_fill(&mut self, query: &str) -> Result<ResolutionOutcome> {
        let answer = self.consult_query_oracle(Phase::QueryFill, query).await?;

        let value = match QUERY_FILL_RE.captures(&answer) {
            Some(captures) => {
                let abort = captures[3].trim();
                if !abort.is_empty() {
                    return Err(EngineError::QueryAborted(abort.to_string()));
                }
                captures[2].trim().to_string()
            }
            None => "unknown".to_string(),
        };

        Ok(ResolutionOutcome::NewDslNodes(vec![DslNode::Value(value)]))
    }

    async fn do_query_user(
        &mut self,
        path: &[usize],
        query: &str,
        interaction: Option<&mut Interaction>,
    ) -> Result<ResolutionOutcome> {
        if let Some(interaction) = interaction {
            if !interaction.answer.consumed && interaction.request.requester.as_slice() == path {
                // The user has seen the answer; their follow-up either
                // continues the slot under resolution or opens a fresh
                // request.
                let inside_slot =
                    self.ctx.current_intent().is_some() && self.ctx.current_slot().is_some();
                let phase = if inside_slot {
                    Phase::SlotResolver
                } else {
                    Phase::IntentSequencer
                };
                let message = interaction.request.message.clone();
                return self
                    .ask_protocol(path, &message, phase, None, Some(interaction))
                    .await;
            }
        }

        let answer = self.consult_query_oracle(Phase::QueryUser, query).await?;
        let friendly = friendly_answer(&answer);
        Ok(ResolutionOutcome::InteractionRequested(
            self.interaction_request(path, &friendly),
        ))
    }

    async fn do_query_gather(
        &mut self,
        original_intent: &str,
        query: &str,
    ) -> Result<ResolutionOutcome> {
        let answer = self.consult_query_oracle(Phase::QueryGather, query).await?;
        let gathered = friendly_answer(&answer);

        let block = format!(
            "intent context:\n  original_request: {original_intent}\n  gathered_information: {gathered}"
        );
        let nodes = self
            .consult_oracle_for_dsl(Phase::IntentSequencer, block)
            .await?;
        Ok(ResolutionOutcome::NewDslNodes(nodes))
    }

    fn interaction_request(&self, path: &[usize], message: &str) -> InteractionRequest {
        InteractionRequest {
            message: message.to_string(),
            expected_type: "str".to_string(),
            slot_name: self.ctx.current_slot().map(str::to_string),
            requester: NodePath::new(path.to_vec()),
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Oracle round trips
    // ─────────────────────────────────────────────────────────────────

    /// Call a query phase with the dynamic per-slot user prompt and
    /// return the raw answer.
    async fn consult_query_oracle(&mut self, phase: Phase, question: &str) -> Result<String> {
        let system = self.runtime.system_prompt(phase).to_string();
        let user_prompt = self.runtime.user_prompt_dynamic_query(&self.ctx, question);
        let request = OracleRequest::new(phase.label(), phase.adapter(), system.clone(), &user_prompt);
        let answer = self.runtime.oracle().complete(request).await?;
        self.ctx
            .log_oracle_call(phase.label(), system, user_prompt, &answer);
        Ok(answer)
    }

    /// Call a DSL-producing phase and parse its answer into replacement
    /// nodes.
    async fn consult_oracle_for_dsl(
        &mut self,
        phase: Phase,
        assistant_block: String,
    ) -> Result<Vec<DslNode>> {
        let system = self.runtime.system_prompt(phase).to_string();
        let request = OracleRequest::new(
            phase.label(),
            phase.adapter(),
            system.clone(),
            &assistant_block,
        );
        let answer = self.runtime.oracle().complete(request).await?;
        self.ctx
            .log_oracle_call(phase.label(), system, assistant_block, &answer);

        let parsed = parse_document(&answer)?;
        tracing::debug!(phase = phase.label(), dsl = %parsed.render(), "oracle produced dsl");
        let DslNode::NodeList(children) = parsed else {
            return Err(EngineError::Internal(
                "parsed document is not a node list".to_string(),
            ));
        };
        Ok(children)
    }

    // ─────────────────────────────────────────────────────────────────
    // Tree surgery
    // ─────────────────────────────────────────────────────────────────

    /// Install replacement nodes for the current node. Control elements
    /// are split out first: aborts take over the step, propagated slot
    /// sets queue for the next intent reentry, and the remaining core
    /// replaces the node (wrapped in a node list when there are
    /// several).
    fn substitute(&mut self, nodes: Vec<DslNode>) -> Result<Substitution> {
        let mut core: Vec<DslNode> = Vec::with_capacity(nodes.len());

        for node in nodes {
            match node {
                DslNode::Abort => return Ok(Substitution::Aborted(None)),
                DslNode::AbortWithNewDsl(new_dsl) => {
                    return Ok(Substitution::Aborted(Some(*new_dsl)));
                }
                DslNode::PropagateSlots(slots) => self.ctx.add_propagated_slots(slots),
                other => core.push(other),
            }
        }

        if core.is_empty() {
            return Err(EngineError::Internal(
                "resolution produced no replacement nodes".to_string(),
            ));
        }
        let new_node = if core.len() == 1 {
            core.remove(0)
        } else {
            DslNode::NodeList(core)
        };

        let depth = self.ctx.call_stack.len() - 1;
        if depth == 0 {
            return Err(EngineError::Internal(
                "cannot substitute the tree root".to_string(),
            ));
        }
        let parent_path = self.path_for(depth - 1);
        let child_index = self.ctx.call_stack[depth - 1].next_child - 1;

        let old = self.node(&self.path_for(depth))?.render();
        tracing::trace!(%old, new = %new_node.render(), "substituting resolved node");

        self.node_mut(&parent_path)?.update_child(child_index, new_node)?;
        self.ctx.call_stack[depth].next_child = 0;
        Ok(Substitution::Installed)
    }

    /// Unwind an abort: pop frames to the nearest enclosing node list,
    /// clear the clarification state, then either substitute the
    /// replacement for the aborted child or remove it (pulling the
    /// cursor back so the next sibling is still visited).
    fn unwind_abort(&mut self, replacement: Option<DslNode>) -> Result<()> {
        loop {
            let Some(depth) = self.ctx.call_stack.len().checked_sub(1) else {
                return Err(EngineError::Internal(
                    "abort without an enclosing node list".to_string(),
                ));
            };
            let path = self.path_for(depth);
            if matches!(self.node(&path)?, DslNode::NodeList(_)) {
                break;
            }
            let _ = self.ctx.call_stack.pop();
        }

        tracing::trace!("clearing intent state and clarified questions after abort");
        self.ctx.clear_clarified();
        self.ctx.reset_state();

        let depth = self.ctx.call_stack.len() - 1;
        let next_child = self.ctx.call_stack[depth].next_child;
        if next_child == 0 {
            return Err(EngineError::Internal(
                "abort surfaced before the list entered a child".to_string(),
            ));
        }
        let child_index = next_child - 1;
        let list_path = self.path_for(depth);

        match replacement {
            Some(node) => {
                tracing::trace!(new = %node.render(), "abort replaces the current intent");
                self.node_mut(&list_path)?.update_child(child_index, node)?;
                self.ctx.call_stack.push(TraversalFrame::start());
                let new_path = self.path_for(depth + 1);
                self.pre_resolution(&new_path)?;
            }
            None => {
                tracing::trace!("abort removes the current intent");
                let _ = self.node_mut(&list_path)?.remove_child(child_index)?;
                self.ctx.call_stack[depth].next_child = child_index;
            }
        }
        Ok(())
    }
}

/// Extract the `user friendly answer:` section of a query response,
/// falling back to "unknown" when the shape is missing.
fn friendly_answer(answer: &str) -> String {
    FRIENDLY_ANSWER_RE
        .captures(answer)
        .map(|captures| captures[2].trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
