//! Mutable state of a resolution run.
//!
//! The [`ResolutionContext`] is owned by one `Resolver` for the
//! duration of a run. Together with the traversal call stack it forms
//! the machine's program counter: suspending for user interaction is
//! just returning to the host with this state intact.

use std::collections::{BTreeMap, VecDeque};
use std::io::Write;

use chrono::{DateTime, Utc};
use palaver_dsl::DslNode;
use serde::Serialize;

use crate::interaction::NodePath;

/// One frame of the traversal call stack: the index of the next child
/// to visit under the node this frame denotes. Node identity is derived
/// from the stack itself — frame `k`'s node is child `frames[k-1].
/// next_child - 1` of frame `k-1`'s node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalFrame {
    pub next_child: usize,
}

impl TraversalFrame {
    pub fn start() -> Self {
        Self { next_child: 0 }
    }
}

/// Per-intent prompt state: the intent under resolution, the slot being
/// filled, and the sibling slots rendered as DSL text.
#[derive(Debug, Clone, Default)]
pub struct IntentStateFrame {
    pub intent: String,
    pub slot: Option<String>,
    pub other_slots: BTreeMap<String, String>,
}

/// A clarification round: which node asked, what was asked, and what
/// the user answered.
#[derive(Debug, Clone, PartialEq)]
pub struct ClarifiedQuestion {
    pub requester: NodePath,
    pub question: String,
    pub answer: String,
}

/// One oracle round trip, kept for traceability and training-data
/// export. The system prompt carries the instructions, the assistant
/// block the call-specific context, and the answer the model output; a
/// corrected answer plus the two prompts is exactly one fine-tuning
/// sample.
#[derive(Debug, Clone, Serialize)]
pub struct OracleCallLog {
    pub description: String,
    pub system_prompt: String,
    pub assistant: String,
    pub answer: String,
    pub at: DateTime<Utc>,
}

/// Mutable state for a resolution run.
#[derive(Debug, Default)]
pub struct ResolutionContext {
    /// Stack of intent prompt-state frames; the top frame names the
    /// intent and slot currently being resolved.
    state: Vec<IntentStateFrame>,
    /// Propagated slot sets waiting to be merged into an enclosing
    /// intent on reentry.
    pending_propagations: VecDeque<Vec<DslNode>>,
    /// Questions clarified so far for the slot under resolution;
    /// cleared on abort.
    clarified: Vec<ClarifiedQuestion>,
    /// The traversal call stack.
    pub call_stack: Vec<TraversalFrame>,
    /// Append-only log of oracle calls.
    oracle_logs: Vec<OracleCallLog>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    // ─────────────────────────────────────────────────────────────────
    // Intent state frames
    // ─────────────────────────────────────────────────────────────────

    pub fn push_intent_frame(&mut self, intent: impl Into<String>) {
        self.state.push(IntentStateFrame {
            intent: intent.into(),
            ..Default::default()
        });
    }

    pub fn pop_intent_frame(&mut self) {
        // May be empty after an abort cleared the state mid-tree.
        let _ = self.state.pop();
    }

    pub fn set_current_slot(&mut self, slot: impl Into<String>, other_slots: BTreeMap<String, String>) {
        if let Some(frame) = self.state.last_mut() {
            frame.slot = Some(slot.into());
            frame.other_slots = other_slots;
        }
    }

    pub fn clear_current_slot(&mut self) {
        if let Some(frame) = self.state.last_mut() {
            frame.slot = None;
            frame.other_slots.clear();
        }
    }

    /// The intent currently being resolved, if any.
    pub fn current_intent(&self) -> Option<&str> {
        self.state.last().map(|f| f.intent.as_str())
    }

    /// The slot currently being resolved, if any.
    pub fn current_slot(&self) -> Option<&str> {
        self.state.last().and_then(|f| f.slot.as_deref())
    }

    /// Clear all intent state frames (abort path).
    pub fn reset_state(&mut self) {
        self.state.clear();
    }

    // ─────────────────────────────────────────────────────────────────
    // Propagated slots
    // ─────────────────────────────────────────────────────────────────

    /// Queue a propagated slot set for the next intent reentry.
    pub fn add_propagated_slots(&mut self, slots: Vec<DslNode>) {
        self.pending_propagations.push_back(slots);
    }

    /// Consume and return all pending propagated slot sets, in FIFO
    /// order.
    pub fn take_propagated_slots(&mut self) -> Vec<Vec<DslNode>> {
        self.pending_propagations.drain(..).collect()
    }

    pub fn has_pending_propagations(&self) -> bool {
        !self.pending_propagations.is_empty()
    }

    // ─────────────────────────────────────────────────────────────────
    // Clarified questions
    // ─────────────────────────────────────────────────────────────────

    pub fn push_clarified(&mut self, requester: NodePath, question: impl Into<String>, answer: impl Into<String>) {
        self.clarified.push(ClarifiedQuestion {
            requester,
            question: question.into(),
            answer: answer.into(),
        });
    }

    pub fn clarified(&self) -> &[ClarifiedQuestion] {
        &self.clarified
    }

    pub fn clear_clarified(&mut self) {
        self.clarified.clear();
    }

    /// The `previous_questions_and_answers` YAML block for prompt
    /// assembly.
    pub fn format_clarified_yaml(&self) -> String {
        if self.clarified.is_empty() {
            return "  previous_questions_and_answers: []".to_string();
        }
        let mut out = String::from("  previous_questions_and_answers:");
        for round in &self.clarified {
            out.push_str(&format!(
                "\n    - question: {}\n      answer: {}",
                round.question, round.answer
            ));
        }
        out
    }

    /// The `other_slots` YAML block for prompt assembly.
    pub fn format_other_slots_yaml(&self, padding: &str) -> String {
        match self.state.last().map(|f| &f.other_slots) {
            Some(slots) if !slots.is_empty() => {
                let mut out = format!("{padding}other_slots:");
                for (name, value) in slots {
                    out.push_str(&format!("\n{padding}  {name}: {value}"));
                }
                out
            }
            _ => format!("{padding}other_slots: {{}}"),
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Oracle call log
    // ─────────────────────────────────────────────────────────────────

    pub fn log_oracle_call(
        &mut self,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
        assistant: impl Into<String>,
        answer: impl Into<String>,
    ) {
        self.oracle_logs.push(OracleCallLog {
            description: description.into(),
            system_prompt: system_prompt.into(),
            assistant: assistant.into(),
            answer: answer.into(),
            at: Utc::now(),
        });
    }

    pub fn oracle_logs(&self) -> &[OracleCallLog] {
        &self.oracle_logs
    }

    /// Render the call log in the `$` / `>` / `<` delimited text form
    /// used for manual review of a session.
    pub fn format_call_log(&self) -> String {
        if self.oracle_logs.is_empty() {
            return String::new();
        }
        let mut out = String::from("---");
        for log in &self.oracle_logs {
            out.push_str(&format!(
                "\n$\n{}\n>\n{}\n<\n{}\n---\n",
                log.system_prompt, log.assistant, log.answer
            ));
        }
        out
    }

    /// Export the call log as JSONL, one call per line.
    pub fn export_call_logs_jsonl(&self, mut writer: impl Write) -> std::io::Result<()> {
        for log in &self.oracle_logs {
            let line = serde_json::to_string(log)?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_frame_stack() {
        let mut ctx = ResolutionContext::new();
        assert!(ctx.current_intent().is_none());

        ctx.push_intent_frame("retrieve_screw");
        ctx.set_current_slot("length", BTreeMap::from([("count".to_string(), "2".to_string())]));
        assert_eq!(ctx.current_intent(), Some("retrieve_screw"));
        assert_eq!(ctx.current_slot(), Some("length"));

        ctx.clear_current_slot();
        assert!(ctx.current_slot().is_none());

        ctx.pop_intent_frame();
        assert!(ctx.current_intent().is_none());
        // Popping an empty stack is tolerated (post-abort).
        ctx.pop_intent_frame();
    }

    #[test]
    fn test_propagated_slots_fifo() {
        let mut ctx = ResolutionContext::new();
        ctx.add_propagated_slots(vec![DslNode::slot("a", DslNode::Value("1".to_string()))]);
        ctx.add_propagated_slots(vec![DslNode::slot("b", DslNode::Value("2".to_string()))]);
        assert!(ctx.has_pending_propagations());

        let drained = ctx.take_propagated_slots();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0][0].slot_name(), Some("a"));
        assert_eq!(drained[1][0].slot_name(), Some("b"));
        assert!(!ctx.has_pending_propagations());
    }

    #[test]
    fn test_clarified_yaml_block() {
        let mut ctx = ResolutionContext::new();
        assert_eq!(
            ctx.format_clarified_yaml(),
            "  previous_questions_and_answers: []"
        );

        ctx.push_clarified(NodePath::new(vec![0]), "how many?", "5");
        let block = ctx.format_clarified_yaml();
        assert!(block.contains("- question: how many?"));
        assert!(block.contains("answer: 5"));
    }

    #[test]
    fn test_other_slots_yaml_block() {
        let mut ctx = ResolutionContext::new();
        assert_eq!(ctx.format_other_slots_yaml("  "), "  other_slots: {}");

        ctx.push_intent_frame("retrieve_screw");
        ctx.set_current_slot(
            "length",
            BTreeMap::from([("count".to_string(), "2".to_string())]),
        );
        let block = ctx.format_other_slots_yaml("  ");
        assert_eq!(block, "  other_slots:\n    count: 2");
    }

    #[test]
    fn test_call_log_text_form() {
        let mut ctx = ResolutionContext::new();
        assert_eq!(ctx.format_call_log(), "");

        ctx.log_oracle_call("intent_sequencer", "sys", "add 2 and 3", "add(a=2, b=3)");
        let text = ctx.format_call_log();
        assert!(text.starts_with("---\n$\nsys\n>\nadd 2 and 3\n<\nadd(a=2, b=3)\n---"));
    }

    #[test]
    fn test_export_call_logs_jsonl() {
        let mut ctx = ResolutionContext::new();
        ctx.log_oracle_call("query_fill", "sys", "ctx", "value: 3");
        ctx.log_oracle_call("slot_resolver", "sys2", "ctx2", "12");

        let mut buffer = Vec::new();
        ctx.export_call_logs_jsonl(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["description"], "query_fill");
        assert_eq!(first["answer"], "value: 3");
        assert!(first["at"].is_string());
    }

    #[test]
    fn test_export_call_logs_to_file() {
        let mut ctx = ResolutionContext::new();
        ctx.log_oracle_call("main", "sys", "prompt", "dsl");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calls.jsonl");
        let file = std::fs::File::create(&path).unwrap();
        ctx.export_call_logs_jsonl(file).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"description\":\"main\""));
    }
}
