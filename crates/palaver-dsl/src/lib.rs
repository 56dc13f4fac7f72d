//! palaver-dsl: symbolic intent DSL infrastructure
//!
//! This crate provides the data layer of the Palaver intent-resolution
//! engine:
//! - A tagged node model for intent trees (`DslNode`) with uniform
//!   traversal, mutation, and structural equality
//! - A recursive-descent parser from the DSL surface syntax
//! - Canonical rendering back to the surface syntax and a diagnostic
//!   pretty-printer
//!
//! The surface syntax is a comma-separated sequence of elements: literals,
//! lists, tool calls with named arguments (`add(a=2, b=3)`), and a fixed
//! set of placeholder and control call-heads (`ASK`, `QUERY_FILL`,
//! `QUERY_USER`, `QUERY_GATHER`, `F`, `PROPAGATE_SLOT`,
//! `SAME_AS_PREVIOUS_INTENT`, `ABORT`, `ABORT_WITH_NEW_INTENTS`).
//!
//! Resolution and evaluation semantics live in `palaver-engine`; this
//! crate has no I/O and performs no oracle or tool calls.

pub mod error;
pub mod node;
pub mod parser;
pub mod text;

pub use error::{DslError, Result};
pub use node::{DslNode, ListKind};
pub use parser::{parse_document, parse_element};
pub use text::{quote_and_escape, split_top_level, strip_quotes};
