//! Recursive-descent parser for the DSL surface syntax.
//!
//! The grammar is a comma-separated sequence of elements; an element is
//! a number, a quoted string, a bracketed list, or a call. Reserved
//! call-heads (`F`, `ASK`, `QUERY_FILL`, `QUERY_USER`, `QUERY_GATHER`,
//! `SAME_AS_PREVIOUS_INTENT`, `PROPAGATE_SLOT`, `ABORT_WITH_NEW_INTENTS`,
//! `ABORT`) build their dedicated node variants; any other call-head is
//! a tool intent with `name=value` arguments.
//!
//! An intent appearing in value position (as a slot value or list
//! element) is wrapped in `ReturnValue`, so its result feeds the
//! enclosing expression; intents at the document's top level stay bare.

use crate::error::{DslError, Result};
use crate::node::{DslNode, ListKind};
use crate::text::{split_top_level, strip_quotes};

/// Parse a top-level DSL document into its root `NodeList`.
///
/// The input is split at top-level commas and each element is parsed
/// with intents kept bare (not wrapped as values).
pub fn parse_document(input: &str) -> Result<DslNode> {
    let items = split_top_level(input)?
        .iter()
        .map(|element| parse_element(element, false))
        .collect::<Result<Vec<_>>>()?;
    Ok(DslNode::NodeList(items))
}

/// Parse a single DSL element.
///
/// `wrap_intent_as_value` controls whether a bare intent becomes a
/// `ReturnValue` (value position) or stays an `Intent` (statement
/// position). Bracketed lists in value position become `ListValue`
/// containers and enforce value-kind elements.
pub fn parse_element(text: &str, wrap_intent_as_value: bool) -> Result<DslNode> {
    parse_element_in(text, wrap_intent_as_value, ListKind::Value)
}

fn parse_element_in(text: &str, wrap_intent_as_value: bool, list_kind: ListKind) -> Result<DslNode> {
    let text = text.trim();

    if text.is_empty() {
        return Err(DslError::Syntax("empty element".to_string()));
    }

    if text.starts_with('[') && text.ends_with(']') {
        return parse_list(&text[1..text.len() - 1], wrap_intent_as_value, list_kind);
    }

    if is_quoted(text) {
        return Ok(DslNode::Value(text[1..text.len() - 1].to_string()));
    }

    if let Some(open_paren) = text.find('(') {
        if text.ends_with(')') {
            let name = text[..open_paren].trim();
            let args = text[open_paren + 1..text.len() - 1].trim();
            return parse_call(name, args, wrap_intent_as_value);
        }
    }

    // Bare numbers and identifiers are literal values.
    Ok(DslNode::Value(text.to_string()))
}

fn parse_list(interior: &str, wrap_intent_as_value: bool, list_kind: ListKind) -> Result<DslNode> {
    let items = split_top_level(interior)?
        .iter()
        .map(|element| parse_element_in(element, wrap_intent_as_value, list_kind))
        .collect::<Result<Vec<_>>>()?;

    match list_kind {
        ListKind::Any => Ok(DslNode::NodeList(items)),
        ListKind::Value => DslNode::list_value(items),
    }
}

fn parse_call(name: &str, args: &str, wrap_intent_as_value: bool) -> Result<DslNode> {
    match name {
        "F" => Ok(DslNode::FuzzyValue(strip_quotes(args)?.to_string())),
        "ASK" => Ok(DslNode::Ask(strip_quotes(args)?.to_string())),
        "QUERY_FILL" => Ok(DslNode::QueryFill(strip_quotes(args)?.to_string())),
        "QUERY_USER" => Ok(DslNode::QueryUser(strip_quotes(args)?.to_string())),
        "QUERY_GATHER" => {
            let parts = split_top_level(args)?;
            if parts.len() != 2 {
                return Err(DslError::Syntax(format!(
                    "QUERY_GATHER expects two arguments, got {}",
                    parts.len()
                )));
            }
            Ok(DslNode::QueryGather {
                original_intent: strip_quotes(&parts[0])?.to_string(),
                query: strip_quotes(&parts[1])?.to_string(),
            })
        }
        "SAME_AS_PREVIOUS_INTENT" => {
            expect_no_args("SAME_AS_PREVIOUS_INTENT", args)?;
            Ok(DslNode::SameAsPreviousIntent)
        }
        "PROPAGATE_SLOT" => {
            DslNode::propagate_slots(parse_named_args("PROPAGATE_SLOT", args)?)
        }
        "ABORT_WITH_NEW_INTENTS" => {
            let args = args.trim();
            if !(args.starts_with('[') && args.ends_with(']')) {
                return Err(DslError::Syntax(
                    "ABORT_WITH_NEW_INTENTS expects a list argument".to_string(),
                ));
            }
            let new_dsl = parse_list(&args[1..args.len() - 1], false, ListKind::Any)?;
            Ok(DslNode::AbortWithNewDsl(Box::new(new_dsl)))
        }
        "ABORT" => {
            expect_no_args("ABORT", args)?;
            Ok(DslNode::Abort)
        }
        _ => {
            let intent = parse_intent(name, args)?;
            if wrap_intent_as_value {
                Ok(DslNode::ReturnValue(Box::new(intent)))
            } else {
                Ok(intent)
            }
        }
    }
}

/// Parse a tool intent call body: comma-separated `name=value` pairs,
/// each value parsed recursively in value position.
pub fn parse_intent(name: &str, args: &str) -> Result<DslNode> {
    DslNode::intent(name, parse_named_args(&format!("intent '{name}'"), args)?)
}

fn parse_named_args(head: &str, args: &str) -> Result<Vec<DslNode>> {
    let mut slots = Vec::new();
    for arg in split_top_level(args)? {
        let Some((key, value)) = arg.split_once('=') else {
            return Err(DslError::Syntax(format!(
                "{head} argument '{arg}' is missing '='"
            )));
        };
        slots.push(DslNode::slot(
            key.trim(),
            parse_element(value.trim(), true)?,
        ));
    }
    Ok(slots)
}

fn expect_no_args(head: &str, args: &str) -> Result<()> {
    if args.trim().is_empty() {
        Ok(())
    } else {
        Err(DslError::Syntax(format!("{head} takes no arguments")))
    }
}

fn is_quoted(text: &str) -> bool {
    text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\'')))
}
