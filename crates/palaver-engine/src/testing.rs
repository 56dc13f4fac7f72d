//! Test fixtures: a small workshop tool set with a shared call trace.
//!
//! The tools mirror the flows the engine has to handle: pure
//! arithmetic (`add`, `multiply`), list arguments (`add_list`), string
//! arguments (`say`), a tool with no return (`beep`), a tool that
//! fails recoverably when stock runs out (`retrieve_screw`, 2 in
//! stock), and one that always fails hard (`explode`).

use std::sync::{Arc, Mutex};

use serde_json::{json, Value as JsonValue};

use crate::oracle::MockOracle;
use crate::runtime::RuntimeContext;
use crate::tool::{StaticQuerySource, Tool, ToolArgs, ToolError, ToolSchema, ValueType};

/// Screws on hand in the fixture inventory.
const SCREWS_IN_STOCK: i64 = 2;

/// Shared, cloneable record of every tool invocation.
#[derive(Clone, Default)]
pub struct CallTrace {
    calls: Arc<Mutex<Vec<(String, JsonValue)>>>,
}

impl CallTrace {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, name: &str, args: &ToolArgs) {
        let args = JsonValue::Object(args.clone().into_iter().collect());
        self.calls.lock().unwrap().push((name.to_string(), args));
    }

    /// All invocations so far, in order.
    pub fn calls(&self) -> Vec<(String, JsonValue)> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of invocations so far.
    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

struct FixtureTool {
    schema: ToolSchema,
    trace: CallTrace,
    run: fn(&ToolArgs) -> Result<JsonValue, ToolError>,
}

impl Tool for FixtureTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    fn invoke(&self, args: &ToolArgs) -> Result<JsonValue, ToolError> {
        self.trace.record(&self.schema.name, args);
        (self.run)(args)
    }
}

fn workshop_tools(trace: &CallTrace) -> Vec<Arc<dyn Tool>> {
    let tool = |schema: ToolSchema, run: fn(&ToolArgs) -> Result<JsonValue, ToolError>| {
        Arc::new(FixtureTool {
            schema,
            trace: trace.clone(),
            run,
        }) as Arc<dyn Tool>
    };

    vec![
        tool(
            ToolSchema::new("add", "Add two numbers.")
                .with_arg("a", ValueType::Int, "first number to add")
                .with_arg("b", ValueType::Int, "second number to add")
                .with_return(ValueType::Int, "the sum of a and b"),
            |args| Ok(json!(args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0))),
        ),
        tool(
            ToolSchema::new("multiply", "Multiply two numbers.")
                .with_arg("a", ValueType::Int, "first number to multiply")
                .with_arg("b", ValueType::Int, "second number to multiply")
                .with_return(ValueType::Int, "the product of a and b"),
            |args| Ok(json!(args["a"].as_i64().unwrap_or(0) * args["b"].as_i64().unwrap_or(0))),
        ),
        tool(
            ToolSchema::new("add_list", "Add all the numbers in the list.")
                .with_arg("v", ValueType::list_of(ValueType::Int), "numbers to add")
                .with_return(ValueType::Int, "the sum of the numbers"),
            |args| {
                let sum: i64 = args["v"]
                    .as_array()
                    .map(|items| items.iter().filter_map(JsonValue::as_i64).sum())
                    .unwrap_or(0);
                Ok(json!(sum))
            },
        ),
        tool(
            ToolSchema::new("retrieve_screw", "Retrieve screws of a given length.")
                .with_arg("count", ValueType::Int, "number of screws to retrieve")
                .with_arg("length", ValueType::Int, "length of the screws in millimeters")
                .with_return(ValueType::Str, "confirmation message"),
            |args| {
                let count = args["count"].as_i64().unwrap_or(0);
                let length = args["length"].as_i64().unwrap_or(0);
                if count > SCREWS_IN_STOCK {
                    return Err(ToolError::AbortAndResolve(format!(
                        "only {SCREWS_IN_STOCK} available"
                    )));
                }
                Ok(json!(format!("retrieved {count} screws of {length}mm")))
            },
        ),
        tool(
            ToolSchema::new("say", "Repeat a message back.")
                .with_arg("text", ValueType::Str, "message to repeat")
                .with_return(ValueType::Str, "the spoken message"),
            |args| Ok(json!(format!("said: {}", args["text"].as_str().unwrap_or("")))),
        ),
        tool(ToolSchema::new("beep", "Emit a beep."), |_args| Ok(JsonValue::Null)),
        tool(
            ToolSchema::new("explode", "Always fails.").with_return(ValueType::Str, "never"),
            |_args| Err(ToolError::Failed("boom".to_string())),
        ),
    ]
}

fn build_runtime(oracle: MockOracle, trace: &CallTrace) -> Arc<RuntimeContext> {
    Arc::new(RuntimeContext::new(
        Arc::new(oracle),
        workshop_tools(trace),
        vec![Arc::new(StaticQuerySource::new(
            "inventory",
            format!("inventory:\n  screws: {SCREWS_IN_STOCK} of 12mm"),
        ))],
    ))
}

/// Runtime over the workshop tools with the given oracle.
pub fn runtime_with_oracle(oracle: MockOracle) -> Arc<RuntimeContext> {
    build_runtime(oracle, &CallTrace::new())
}

/// Runtime over the workshop tools with scripted oracle responses.
pub fn calculator_runtime(responses: Vec<&str>) -> Arc<RuntimeContext> {
    runtime_with_oracle(MockOracle::new(responses))
}

/// Runtime plus the call trace its tools record into.
pub fn calculator_runtime_with_trace(responses: Vec<&str>) -> (Arc<RuntimeContext>, CallTrace) {
    let trace = CallTrace::new();
    let runtime = build_runtime(MockOracle::new(responses), &trace);
    (runtime, trace)
}
