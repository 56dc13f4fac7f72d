//! palaver-engine: intent resolution and evaluation
//!
//! This crate drives the Palaver intent-resolution loop over the trees
//! defined in `palaver-dsl`:
//! - `Resolver`: a resumable depth-first stack machine that expands
//!   placeholders by consulting the oracle and the user, one `step` at
//!   a time
//! - `Evaluator`: a second stack machine dispatching resolved intents
//!   to typed tools, with replay-safe success wrappers and recoverable
//!   failure injection
//! - `RuntimeContext`: the per-session tool registry, query sources,
//!   and precompiled oracle phase prompts
//! - `Oracle`: the language-model transport abstraction, with HTTP and
//!   mock implementations
//!
//! A host drives a session as: build a `RuntimeContext`, create a
//! `Resolver` from the user's prompt, loop `step` feeding back user
//! answers until `Unchanged`, then `Evaluator::evaluate`. On an
//! `AbortedRecoverable` outcome, resolve the returned tree again and
//! re-evaluate; executed intents are never re-invoked.

pub mod async_evaluator;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod interaction;
pub mod oracle;
pub mod outcome;
pub mod prompts;
pub mod resolver;
pub mod runtime;
pub mod tool;

// Testing utilities - available in test builds
#[cfg(test)]
pub mod testing;

pub use async_evaluator::AsyncEvaluator;
pub use context::{ClarifiedQuestion, IntentStateFrame, OracleCallLog, ResolutionContext, TraversalFrame};
pub use error::{EngineError, Result, ToolError};
pub use evaluator::Evaluator;
pub use interaction::{Interaction, InteractionAnswer, InteractionRequest, NodePath};
pub use oracle::{HttpOracle, MockOracle, Oracle, OracleConfig, OracleRequest, with_retry};
pub use outcome::{EvaluationOutcome, EvaluationStatus, ResolutionOutcome};
pub use prompts::Phase;
pub use resolver::Resolver;
pub use runtime::RuntimeContext;
pub use tool::{
    ArgSpec, AsyncTool, BlockingTool, QuerySource, StaticQuerySource, Tool, ToolArgs, ToolSchema,
    ValueType,
};
