//! Tool trait, typed schemas, and runtime value coercion.
//!
//! Intents dispatch to tools by name. Each tool carries a typed schema
//! (argument names with declared types, plus an optional return type)
//! that drives two things: coercion of evaluated DSL values into the
//! tool's expected runtime types, and the schema text embedded into the
//! oracle's phase prompts so the model knows what it may call.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value as JsonValue;

use crate::error::{EngineError, ToolError};

/// Declared type of a tool argument or return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    Int,
    Float,
    Bool,
    Str,
    List(Box<ValueType>),
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Int => write!(f, "int"),
            ValueType::Float => write!(f, "float"),
            ValueType::Bool => write!(f, "bool"),
            ValueType::Str => write!(f, "str"),
            ValueType::List(inner) => write!(f, "list[{inner}]"),
        }
    }
}

impl ValueType {
    /// A list of this type.
    pub fn list_of(inner: ValueType) -> ValueType {
        ValueType::List(Box::new(inner))
    }

    /// Coerce `value` into this type.
    ///
    /// Strings coerce to numbers and booleans when their text parses;
    /// numbers coerce to strings. With `allow_scalar_to_list`, a scalar
    /// coerces to a one-element list of the declared element type —
    /// used at intent argument sites so "give me screw 12" can satisfy
    /// a `list[int]` argument.
    pub fn cast(
        &self,
        value: &JsonValue,
        allow_scalar_to_list: bool,
    ) -> Result<JsonValue, EngineError> {
        match self {
            ValueType::Int => match value {
                JsonValue::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                JsonValue::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(JsonValue::from)
                    .map_err(|_| cast_error(value, self)),
                _ => Err(cast_error(value, self)),
            },
            ValueType::Float => match value {
                JsonValue::Number(_) => {
                    let n = value.as_f64().ok_or_else(|| cast_error(value, self))?;
                    Ok(JsonValue::from(n))
                }
                JsonValue::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(JsonValue::from)
                    .map_err(|_| cast_error(value, self)),
                _ => Err(cast_error(value, self)),
            },
            ValueType::Bool => match value {
                JsonValue::Bool(_) => Ok(value.clone()),
                JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(JsonValue::Bool(true)),
                    "false" => Ok(JsonValue::Bool(false)),
                    _ => Err(cast_error(value, self)),
                },
                _ => Err(cast_error(value, self)),
            },
            ValueType::Str => match value {
                JsonValue::String(_) => Ok(value.clone()),
                JsonValue::Number(n) => Ok(JsonValue::String(n.to_string())),
                JsonValue::Bool(b) => Ok(JsonValue::String(b.to_string())),
                _ => Err(cast_error(value, self)),
            },
            ValueType::List(inner) => match value {
                JsonValue::Array(items) => {
                    let cast_items = items
                        .iter()
                        .map(|item| inner.cast(item, false))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(JsonValue::Array(cast_items))
                }
                // Oracle answers carry lists as their surface text.
                JsonValue::String(s) if s.trim().starts_with('[') => {
                    let parsed: JsonValue = serde_json::from_str(s.trim())
                        .map_err(|_| cast_error(value, self))?;
                    match parsed {
                        JsonValue::Array(_) => self.cast(&parsed, false),
                        _ => Err(cast_error(value, self)),
                    }
                }
                _ if allow_scalar_to_list => {
                    Ok(JsonValue::Array(vec![inner.cast(value, false)?]))
                }
                _ => Err(cast_error(value, self)),
            },
        }
    }
}

fn cast_error(value: &JsonValue, ty: &ValueType) -> EngineError {
    EngineError::Cast(format!("cannot cast {value} to {ty}"))
}

/// One declared tool argument.
#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub name: String,
    pub ty: ValueType,
    pub description: String,
}

impl ArgSpec {
    pub fn new(name: impl Into<String>, ty: ValueType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            description: description.into(),
        }
    }
}

/// Typed signature of a tool.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub args: Vec<ArgSpec>,
    /// Declared return type; `None` means the tool returns the unit
    /// value.
    pub returns: Option<ValueType>,
    pub return_description: String,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            args: Vec::new(),
            returns: None,
            return_description: String::new(),
        }
    }

    /// Add an argument.
    pub fn with_arg(
        mut self,
        name: impl Into<String>,
        ty: ValueType,
        description: impl Into<String>,
    ) -> Self {
        self.args.push(ArgSpec::new(name, ty, description));
        self
    }

    /// Declare the return type.
    pub fn with_return(mut self, ty: ValueType, description: impl Into<String>) -> Self {
        self.returns = Some(ty);
        self.return_description = description.into();
        self
    }

    /// Find an argument spec by name.
    pub fn arg(&self, name: &str) -> Option<&ArgSpec> {
        self.args.iter().find(|a| a.name == name)
    }

    /// Render this schema as the YAML block embedded into oracle
    /// prompts.
    pub fn to_schema_yaml(&self) -> String {
        let mut out = format!("- intent: {}\n  description: {}\n", self.name, self.description);
        if self.args.is_empty() {
            out.push_str("  slots: []\n");
        } else {
            out.push_str("  slots:\n");
            for arg in &self.args {
                out.push_str(&format!(
                    "    - name: {}\n      type: {}\n      description: {}\n",
                    arg.name, arg.ty, arg.description
                ));
            }
        }
        match &self.returns {
            Some(ty) => out.push_str(&format!(
                "  return:\n    type: {}\n    description: {}\n",
                ty, self.return_description
            )),
            None => out.push_str("  return: none\n"),
        }
        out
    }
}

/// Named arguments passed to a tool invocation.
pub type ToolArgs = BTreeMap<String, JsonValue>;

/// A callable tool the evaluator can dispatch to.
///
/// Invocation is synchronous: tools are in-process typed callables, and
/// evaluation runs on the caller's thread. Tools signal failures
/// through [`ToolError`]; `AbortAndResolve` failures are repairable
/// through a further resolution pass.
pub trait Tool: Send + Sync {
    /// The tool's typed signature.
    fn schema(&self) -> &ToolSchema;

    /// Invoke the tool with already-coerced named arguments.
    fn invoke(&self, args: &ToolArgs) -> Result<JsonValue, ToolError>;
}

/// A tool whose invocation awaits I/O (device commands, remote APIs).
///
/// Used by the async evaluator; the synchronous evaluator only
/// dispatches [`Tool`]s. A sync tool can serve both through
/// [`BlockingTool`].
#[async_trait::async_trait]
pub trait AsyncTool: Send + Sync {
    /// The tool's typed signature.
    fn schema(&self) -> &ToolSchema;

    /// Invoke the tool with already-coerced named arguments.
    async fn invoke(&self, args: &ToolArgs) -> Result<JsonValue, ToolError>;
}

/// Adapter exposing a synchronous tool through the async interface.
pub struct BlockingTool(pub std::sync::Arc<dyn Tool>);

#[async_trait::async_trait]
impl AsyncTool for BlockingTool {
    fn schema(&self) -> &ToolSchema {
        self.0.schema()
    }

    async fn invoke(&self, args: &ToolArgs) -> Result<JsonValue, ToolError> {
        self.0.invoke(args)
    }
}

/// A source of dynamic runtime information injected into oracle prompts
/// (inventory state, sensor readings, ...). Descriptions are rebuilt on
/// every prompt so they reflect the current state.
pub trait QuerySource: Send + Sync {
    /// Unique name for this source.
    fn name(&self) -> &str;

    /// Current description of the information this source provides.
    fn describe(&self) -> String;
}

/// A query source backed by a fixed description, for static catalogs
/// and tests.
pub struct StaticQuerySource {
    name: String,
    description: String,
}

impl StaticQuerySource {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

impl QuerySource for StaticQuerySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}
