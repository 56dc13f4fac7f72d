//! Cross-crate integration and E2E tests
//!
//! These tests drive full sessions through the public API: oracle
//! response → parsed tree → resolution (with user interactions) →
//! evaluation → recovery, using a scripted mock oracle and a small
//! workshop tool set with a shared call trace.

use std::sync::{Arc, Mutex};

use palaver_dsl::{parse_document, DslNode};
use palaver_engine::{
    Evaluator, EvaluationStatus, Interaction, MockOracle, Resolver, ResolutionOutcome,
    RuntimeContext, StaticQuerySource, Tool, ToolArgs, ToolError, ToolSchema, ValueType,
};
use serde_json::{json, Value as JsonValue};

/// Screws on hand in the fixture inventory.
const SCREWS_IN_STOCK: i64 = 2;

#[derive(Clone, Default)]
struct CallTrace {
    calls: Arc<Mutex<Vec<(String, JsonValue)>>>,
}

impl CallTrace {
    fn record(&self, name: &str, args: &ToolArgs) {
        let args = JsonValue::Object(args.clone().into_iter().collect());
        self.calls.lock().unwrap().push((name.to_string(), args));
    }

    fn calls(&self) -> Vec<(String, JsonValue)> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

struct WorkshopTool {
    schema: ToolSchema,
    trace: CallTrace,
    run: fn(&ToolArgs) -> Result<JsonValue, ToolError>,
}

impl Tool for WorkshopTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    fn invoke(&self, args: &ToolArgs) -> Result<JsonValue, ToolError> {
        self.trace.record(&self.schema.name, args);
        (self.run)(args)
    }
}

/// Build a runtime over the workshop tools with scripted oracle
/// responses, returning the shared call trace alongside.
fn workshop_runtime(responses: Vec<&str>) -> (Arc<RuntimeContext>, CallTrace) {
    let trace = CallTrace::default();
    let tool = |schema: ToolSchema, run: fn(&ToolArgs) -> Result<JsonValue, ToolError>| {
        Arc::new(WorkshopTool {
            schema,
            trace: trace.clone(),
            run,
        }) as Arc<dyn Tool>
    };

    let tools = vec![
        tool(
            ToolSchema::new("add", "Add two numbers.")
                .with_arg("a", ValueType::Int, "first number to add")
                .with_arg("b", ValueType::Int, "second number to add")
                .with_return(ValueType::Int, "the sum of a and b"),
            |args| Ok(json!(args["a"].as_i64().unwrap() + args["b"].as_i64().unwrap())),
        ),
        tool(
            ToolSchema::new("multiply", "Multiply two numbers.")
                .with_arg("a", ValueType::Int, "first number to multiply")
                .with_arg("b", ValueType::Int, "second number to multiply")
                .with_return(ValueType::Int, "the product of a and b"),
            |args| Ok(json!(args["a"].as_i64().unwrap() * args["b"].as_i64().unwrap())),
        ),
        tool(
            ToolSchema::new("add_list", "Add all the numbers in the list.")
                .with_arg("v", ValueType::list_of(ValueType::Int), "numbers to add")
                .with_return(ValueType::Int, "the sum of the numbers"),
            |args| {
                let sum: i64 = args["v"].as_array().unwrap().iter().filter_map(JsonValue::as_i64).sum();
                Ok(json!(sum))
            },
        ),
        tool(
            ToolSchema::new("retrieve_screw", "Retrieve screws of a given length.")
                .with_arg("count", ValueType::Int, "number of screws to retrieve")
                .with_arg("length", ValueType::Int, "length of the screws in millimeters")
                .with_return(ValueType::Str, "confirmation message"),
            |args| {
                let count = args["count"].as_i64().unwrap();
                let length = args["length"].as_i64().unwrap();
                if count > SCREWS_IN_STOCK {
                    return Err(ToolError::AbortAndResolve(format!(
                        "only {SCREWS_IN_STOCK} available"
                    )));
                }
                Ok(json!(format!("retrieved {count} screws of {length}mm")))
            },
        ),
    ];

    let runtime = Arc::new(RuntimeContext::new(
        Arc::new(MockOracle::new(responses)),
        tools,
        vec![Arc::new(StaticQuerySource::new(
            "inventory",
            format!("inventory:\n  screws: {SCREWS_IN_STOCK} of 12mm"),
        ))],
    ));
    (runtime, trace)
}

/// Drive a resolver to completion, answering every interaction from
/// the scripted `answers` in order.
async fn resolve_with_answers(resolver: &mut Resolver, answers: &[&str]) -> DslNode {
    let mut answers = answers.iter();
    let mut reply: Option<Interaction> = None;
    loop {
        match resolver.step(reply.take()).await.unwrap() {
            ResolutionOutcome::InteractionRequested(request) => {
                let answer = answers.next().expect("ran out of scripted answers");
                reply = Some(Interaction::new(request, *answer));
            }
            ResolutionOutcome::Unchanged => break,
            other => panic!("unexpected outcome surfaced to the host: {other:?}"),
        }
    }
    assert!(resolver.tree().is_resolved(), "tree unresolved after Unchanged");
    resolver.tree()
}

// ─────────────────────────────────────────────────────────────────────
// End-to-end scenarios
// ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_e2e_pure_arithmetic_intent() {
    let (runtime, trace) = workshop_runtime(vec!["add(a=2, b=3)"]);

    let mut resolver = Resolver::from_prompt(runtime.clone(), "add 2 and 3").await.unwrap();
    let tree = resolve_with_answers(&mut resolver, &[]).await;

    let outcome = Evaluator::new(runtime, &tree).evaluate();
    assert_eq!(outcome.status, EvaluationStatus::Success);
    assert_eq!(outcome.value, Some(json!(5)));
    assert_eq!(trace.calls(), vec![("add".to_string(), json!({"a": 2, "b": 3}))]);
}

#[tokio::test]
async fn test_e2e_nested_intents() {
    let (runtime, trace) = workshop_runtime(vec!["multiply(a=4, b=add(a=2, b=3))"]);

    let mut resolver = Resolver::from_prompt(runtime.clone(), "add 2 and 3, then multiply by 4")
        .await
        .unwrap();
    let tree = resolve_with_answers(&mut resolver, &[]).await;

    let outcome = Evaluator::new(runtime, &tree).evaluate();
    assert_eq!(outcome.value, Some(json!(20)));
    assert_eq!(
        trace.calls(),
        vec![
            ("add".to_string(), json!({"a": 2, "b": 3})),
            ("multiply".to_string(), json!({"a": 4, "b": 5})),
        ]
    );
}

#[tokio::test]
async fn test_e2e_fuzzy_values() {
    let (runtime, trace) = workshop_runtime(vec!["add(a=F(\"a couple\"), b=F(\"a few\"))"]);

    let mut resolver = Resolver::from_prompt(runtime.clone(), "add a couple and a few")
        .await
        .unwrap();
    let tree = resolve_with_answers(&mut resolver, &[]).await;

    let outcome = Evaluator::new(runtime, &tree).evaluate();
    assert_eq!(outcome.value, Some(json!(5)));
    assert_eq!(trace.calls(), vec![("add".to_string(), json!({"a": 2, "b": 3}))]);
}

#[tokio::test]
async fn test_e2e_list_argument() {
    let (runtime, trace) = workshop_runtime(vec!["add_list(v=[2,3,4])"]);

    let mut resolver = Resolver::from_prompt(runtime.clone(), "sum 2, 3 and 4").await.unwrap();
    let tree = resolve_with_answers(&mut resolver, &[]).await;

    let outcome = Evaluator::new(runtime, &tree).evaluate();
    assert_eq!(outcome.value, Some(json!(9)));
    assert_eq!(trace.calls(), vec![("add_list".to_string(), json!({"v": [2, 3, 4]}))]);
}

#[tokio::test]
async fn test_e2e_query_fill_autoresolution() {
    let (runtime, _trace) = workshop_runtime(vec![
        "add(a=2, b=QUERY_FILL(\"second prime number\"))",
        "reasoning: the second prime is 3\nvalue: 3\nabort:",
    ]);

    let mut resolver = Resolver::from_prompt(runtime.clone(), "add 2 and the second prime")
        .await
        .unwrap();
    let outcome = resolver.step(None).await.unwrap();
    assert!(matches!(outcome, ResolutionOutcome::Unchanged));
    assert_eq!(resolver.tree().render(), "add(a=2, b=3)");

    let outcome = Evaluator::new(runtime, &resolver.tree()).evaluate();
    assert_eq!(outcome.value, Some(json!(5)));
}

#[tokio::test]
async fn test_e2e_ask_interaction() {
    let (runtime, trace) = workshop_runtime(vec![
        "retrieve_screw(count=2, length=ASK(\"what length?\"))",
        "12",
    ]);

    let mut resolver = Resolver::from_prompt(runtime.clone(), "give me 2 screws").await.unwrap();

    let first = resolver.step(None).await.unwrap();
    let ResolutionOutcome::InteractionRequested(request) = first else {
        panic!("expected an interaction request");
    };
    assert_eq!(request.message, "what length?");

    let second = resolver
        .step(Some(Interaction::new(request, "12mm")))
        .await
        .unwrap();
    assert!(matches!(second, ResolutionOutcome::Unchanged));
    assert_eq!(resolver.tree().render(), "retrieve_screw(count=2, length=12)");

    let outcome = Evaluator::new(runtime, &resolver.tree()).evaluate();
    assert_eq!(outcome.status, EvaluationStatus::Success);
    assert_eq!(
        trace.calls(),
        vec![("retrieve_screw".to_string(), json!({"count": 2, "length": 12}))]
    );
}

#[tokio::test]
async fn test_e2e_recoverable_failure_and_repair() {
    let (runtime, trace) = workshop_runtime(vec!["retrieve_screw(count=2, length=12)"]);

    let tree = parse_document("retrieve_screw(count=4, length=12)").unwrap();
    let mut evaluator = Evaluator::new(runtime.clone(), &tree);
    let outcome = evaluator.evaluate();
    assert_eq!(outcome.status, EvaluationStatus::AbortedRecoverable);
    assert_eq!(outcome.error.unwrap().to_string(), "only 2 available");

    // The returned tree carries the error resolver in place of the
    // failed intent; a fresh resolver repairs it with the user's help.
    let annotated = evaluator.tree();
    let mut resolver = Resolver::from_tree(runtime.clone(), &annotated).unwrap();

    let first = resolver.step(None).await.unwrap();
    let ResolutionOutcome::InteractionRequested(request) = first else {
        panic!("expected the failure message as a question");
    };
    assert_eq!(request.message, "only 2 available");

    let second = resolver
        .step(Some(Interaction::new(request, "ok give me those 2")))
        .await
        .unwrap();
    assert!(matches!(second, ResolutionOutcome::Unchanged));

    let outcome = Evaluator::new(runtime, &resolver.tree()).evaluate();
    assert_eq!(outcome.status, EvaluationStatus::Success);
    assert_eq!(outcome.value, Some(json!("retrieved 2 screws of 12mm")));
    assert_eq!(
        trace.calls(),
        vec![
            ("retrieve_screw".to_string(), json!({"count": 4, "length": 12})),
            ("retrieve_screw".to_string(), json!({"count": 2, "length": 12})),
        ]
    );
}

#[tokio::test]
async fn test_e2e_propagate_slot() {
    let (runtime, _trace) = workshop_runtime(vec!["5, PROPAGATE_SLOT(length=12)"]);

    let tree = parse_document(
        "retrieve_screw(count=ASK(\"how many?\"), length=ASK(\"what length?\"))",
    )
    .unwrap();
    let mut resolver = Resolver::from_tree(runtime, &tree).unwrap();

    let first = resolver.step(None).await.unwrap();
    let ResolutionOutcome::InteractionRequested(request) = first else {
        panic!("expected an interaction request");
    };
    assert_eq!(request.message, "how many?");

    // One answer fills both slots: the propagated length overwrites the
    // second ASK, so no further interaction is needed.
    let second = resolver
        .step(Some(Interaction::new(request, "5 of length 12")))
        .await
        .unwrap();
    assert!(matches!(second, ResolutionOutcome::Unchanged));
    assert_eq!(resolver.tree().render(), "retrieve_screw(count=5, length=12)");
}

#[tokio::test]
async fn test_e2e_replay_safety_across_recovery() {
    // Two intents: the first succeeds, the second fails recoverably.
    // After repair, re-evaluation must not re-run the first intent.
    let (runtime, trace) = workshop_runtime(vec!["retrieve_screw(count=1, length=12)"]);

    let tree = parse_document("add(a=2, b=3), retrieve_screw(count=4, length=12)").unwrap();
    let mut evaluator = Evaluator::new(runtime.clone(), &tree);
    let outcome = evaluator.evaluate();
    assert_eq!(outcome.status, EvaluationStatus::AbortedRecoverable);
    assert_eq!(trace.count(), 2);

    let mut resolver = Resolver::from_tree(runtime.clone(), &evaluator.tree()).unwrap();
    let ResolutionOutcome::InteractionRequested(request) = resolver.step(None).await.unwrap()
    else {
        panic!("expected the failure message as a question");
    };
    let outcome = resolver
        .step(Some(Interaction::new(request, "just one then")))
        .await
        .unwrap();
    assert!(matches!(outcome, ResolutionOutcome::Unchanged));

    let outcome = Evaluator::new(runtime, &resolver.tree()).evaluate();
    assert_eq!(outcome.status, EvaluationStatus::Success);
    assert_eq!(
        outcome.value,
        Some(json!([5, "retrieved 1 screws of 12mm"]))
    );
    // add ran exactly once across both evaluation passes.
    let add_calls = trace.calls().iter().filter(|(name, _)| name == "add").count();
    assert_eq!(add_calls, 1);
}

#[tokio::test]
async fn test_e2e_oracle_log_collects_session() {
    let (runtime, _trace) = workshop_runtime(vec![
        "retrieve_screw(count=2, length=ASK(\"what length?\"))",
        "12",
    ]);

    let mut resolver = Resolver::from_prompt(runtime, "give me 2 screws").await.unwrap();
    resolve_with_answers(&mut resolver, &["12mm"]).await;

    let logs = resolver.context().oracle_logs();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].description, "main");
    assert_eq!(logs[1].description, "slot_resolver");

    let text = resolver.context().format_call_log();
    assert!(text.contains("give me 2 screws"));
    assert!(text.contains("current_user_answer: 12mm"));

    let mut buffer = Vec::new();
    resolver.context().export_call_logs_jsonl(&mut buffer).unwrap();
    assert_eq!(String::from_utf8(buffer).unwrap().lines().count(), 2);
}

#[tokio::test]
async fn test_render_parse_round_trip_on_resolved_trees() {
    let (runtime, _trace) = workshop_runtime(vec![
        "retrieve_screw(count=2, length=ASK(\"what length?\"))",
        "12",
    ]);

    let mut resolver = Resolver::from_prompt(runtime, "give me 2 screws").await.unwrap();
    let tree = resolve_with_answers(&mut resolver, &["12mm"]).await;

    let reparsed = parse_document(&tree.render()).unwrap();
    assert_eq!(tree, reparsed);
}
