//! System prompts for the oracle phases.
//!
//! Each phase prompt is precompiled once per [`RuntimeContext`]
//! construction by splicing the tool schema catalog (and, where useful,
//! the query-source catalog) into a fixed template. The prompts pin the
//! response shapes the engine parses: DSL text for the sequencing and
//! resolving phases, labeled `reasoning:` / `value:` / `abort:` or
//! `user friendly answer:` lines for the query phases.
//!
//! [`RuntimeContext`]: crate::runtime::RuntimeContext

/// Resolution phases that consult the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    QueryFill,
    QueryUser,
    QueryGather,
    IntentSequencer,
    SlotResolver,
    ErrorResolver,
}

impl Phase {
    /// Short label used in call logs and traces.
    pub fn label(self) -> &'static str {
        match self {
            Phase::QueryFill => "query_fill",
            Phase::QueryUser => "query_user",
            Phase::QueryGather => "query_gather",
            Phase::IntentSequencer => "intent_sequencer",
            Phase::SlotResolver => "slot_resolver",
            Phase::ErrorResolver => "error_resolver",
        }
    }

    /// Adapter the oracle server should apply for this phase.
    pub fn adapter(self) -> &'static str {
        match self {
            Phase::QueryFill | Phase::QueryUser | Phase::QueryGather => "query-responder",
            Phase::IntentSequencer => "intent-sequencer",
            Phase::SlotResolver => "slot-resolver",
            Phase::ErrorResolver => "error-resolver",
        }
    }
}

fn sources_section(yaml_sources: &str) -> String {
    if yaml_sources.is_empty() {
        "QUERY_FILL cannot be used as no information can be retrieved at runtime.".to_string()
    } else {
        format!(
            "You have access to the following sources that can be queried to fill in missing \
             information using QUERY_FILL:\n{yaml_sources}"
        )
    }
}

pub fn compile_query_fill(yaml_tools: &str, _yaml_sources: &str) -> String {
    format!(
        "You are a precise agent that answers questions according to the scope defined by the \
         intents below:\n\n{yaml_tools}\n\nanswer on three lines as follows:\n\
         reasoning: your reasoning to answer the question. Investigate each item of the 'query \
         context' section, with special attention to 'runtime_information'. Pay attention to the \
         type you return; if a single value is asked for and several qualify, return only one.\n\
         value: the value of the requested slot, with no explanation. When returning a list use \
         [...].\n\
         abort: if the answer cannot be deduced, the error message; empty otherwise"
    )
}

pub fn compile_query_user(yaml_tools: &str, _yaml_sources: &str) -> String {
    format!(
        "You are a precise agent that answers user questions according to the scope defined by \
         the intents below:\n\n{yaml_tools}\n\nanswer on two lines as follows:\n\
         reasoning: your reasoning to answer the question. Investigate each item of the 'query \
         context' section, with special attention to 'runtime_information'.\n\
         user friendly answer: the value with just enough explanation, as if answering a \
         colleague in a hurry. If the answer cannot be deduced, the error message"
    )
}

pub fn compile_query_gather(yaml_tools: &str, _yaml_sources: &str) -> String {
    format!(
        "You are a precise agent that gathers the information needed to assemble complete \
         intents, within the scope defined below:\n\n{yaml_tools}\n\nanswer on two lines as \
         follows:\n\
         reasoning: your reasoning to answer the question. Investigate each item of the 'query \
         context' section, with special attention to 'runtime_information'.\n\
         user friendly answer: the detailed answer to the question. If the answer cannot be \
         deduced, the error message"
    )
}

pub fn compile_intent_sequencer(yaml_tools: &str, yaml_sources: &str) -> String {
    format!(
        "You are a precise intent sequencer. You parse the user's prompt and split it into \
         atomic intents that match one of the defined intents below:\n\n{yaml_tools}\n\n{}",
        sources_section(yaml_sources)
    )
}

pub fn compile_slot_resolver(yaml_tools: &str, yaml_sources: &str) -> String {
    format!(
        "You are a precise slot resolver. You resolve one slot at a time based on the current \
         resolution context, but the user may change or override the task. Here are the \
         available intents:\n\n{yaml_tools}\n\nIf the user's answer does not directly resolve \
         to a value, return a QUERY_FILL(...), QUERY_USER(...) or a follow-up ASK(...).\n\n{}",
        sources_section(yaml_sources)
    )
}

pub fn compile_error_resolver(yaml_tools: &str, yaml_sources: &str) -> String {
    format!(
        "You are a precise error resolver. A tool call failed and the user was told why; you \
         turn their follow-up into a corrected intent or a new value. Here are the available \
         intents:\n\n{yaml_tools}\n\nIf the user's answer does not directly resolve to a value, \
         return a QUERY_FILL(...), QUERY_USER(...) or a follow-up ASK(...).\n\n{}",
        sources_section(yaml_sources)
    )
}
