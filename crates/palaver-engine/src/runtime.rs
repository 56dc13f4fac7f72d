//! Session-wide runtime configuration.
//!
//! A [`RuntimeContext`] is built once per session and then read-only:
//! the tool registry, the query sources, the oracle handle, and the six
//! precompiled phase system prompts. The resolver and evaluator both
//! borrow it for the duration of a run.

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::ResolutionContext;
use crate::error::{EngineError, Result};
use crate::oracle::Oracle;
use crate::prompts::{
    self, Phase,
};
use crate::tool::{QuerySource, Tool};

/// Registry and prompt configuration shared by every step of a session.
pub struct RuntimeContext {
    oracle: Arc<dyn Oracle>,
    tools: Vec<Arc<dyn Tool>>,
    tool_index: HashMap<String, usize>,
    query_sources: Vec<Arc<dyn QuerySource>>,

    prompt_query_fill: String,
    prompt_query_user: String,
    prompt_query_gather: String,
    prompt_intent_sequencer: String,
    prompt_slot_resolver: String,
    prompt_error_resolver: String,
}

impl RuntimeContext {
    /// Build a runtime context, precompiling one system prompt per
    /// oracle phase from the tool and query-source catalogs.
    pub fn new(
        oracle: Arc<dyn Oracle>,
        tools: Vec<Arc<dyn Tool>>,
        query_sources: Vec<Arc<dyn QuerySource>>,
    ) -> Self {
        let yaml_tools = tools
            .iter()
            .map(|t| t.schema().to_schema_yaml())
            .collect::<Vec<_>>()
            .join("\n");
        let yaml_sources = query_sources
            .iter()
            .map(|s| s.describe())
            .collect::<Vec<_>>()
            .join("\n");

        let tool_index = tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.schema().name.clone(), i))
            .collect();

        Self {
            prompt_query_fill: prompts::compile_query_fill(&yaml_tools, &yaml_sources),
            prompt_query_user: prompts::compile_query_user(&yaml_tools, &yaml_sources),
            prompt_query_gather: prompts::compile_query_gather(&yaml_tools, &yaml_sources),
            prompt_intent_sequencer: prompts::compile_intent_sequencer(&yaml_tools, &yaml_sources),
            prompt_slot_resolver: prompts::compile_slot_resolver(&yaml_tools, &yaml_sources),
            prompt_error_resolver: prompts::compile_error_resolver(&yaml_tools, &yaml_sources),
            oracle,
            tools,
            tool_index,
            query_sources,
        }
    }

    /// The oracle transport for this session.
    pub fn oracle(&self) -> &Arc<dyn Oracle> {
        &self.oracle
    }

    /// Look up a tool by name.
    pub fn get_tool(&self, name: &str) -> Result<&Arc<dyn Tool>> {
        self.tool_index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| EngineError::UnknownTool(name.to_string()))
    }

    /// All registered tools, in registration order.
    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    /// The precompiled system prompt for a phase.
    pub fn system_prompt(&self, phase: Phase) -> &str {
        match phase {
            Phase::QueryFill => &self.prompt_query_fill,
            Phase::QueryUser => &self.prompt_query_user,
            Phase::QueryGather => &self.prompt_query_gather,
            Phase::IntentSequencer => &self.prompt_intent_sequencer,
            Phase::SlotResolver => &self.prompt_slot_resolver,
            Phase::ErrorResolver => &self.prompt_error_resolver,
        }
    }

    /// Build the per-query user prompt for the QUERY_FILL, QUERY_USER
    /// and QUERY_GATHER phases: the current intent and slot, the sibling
    /// slots, the question, and the live query-source information.
    ///
    /// Intent and slot read "none" when the user asked a bare question
    /// outside any intent.
    pub fn user_prompt_dynamic_query(&self, ctx: &ResolutionContext, question: &str) -> String {
        let runtime_info = self
            .query_sources
            .iter()
            .map(|s| s.describe())
            .collect::<Vec<_>>()
            .join("\n");
        let runtime_info = if runtime_info.is_empty() {
            "    (none)".to_string()
        } else {
            runtime_info
                .lines()
                .map(|line| format!("    {line}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "query context:\n  intent: {}\n  slot: {}\n{}\n  question: {}\n  runtime_information:\n{}\n",
            ctx.current_intent().unwrap_or("none"),
            ctx.current_slot().unwrap_or("none"),
            ctx.format_other_slots_yaml("  "),
            question,
            runtime_info,
        )
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("oracle", &self.oracle.name())
            .field(
                "tools",
                &self.tools.iter().map(|t| &t.schema().name).collect::<Vec<_>>(),
            )
            .field(
                "query_sources",
                &self.query_sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
