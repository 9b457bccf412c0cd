//! End-to-end behaviour of the step composites and the plan-execute
//! scheduler through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use conductor_core::agent::{Agent, AgentError, BoxAgent, FnAgent};
use conductor_core::event::{EventBus, drain};
use conductor_core::workflow::{
    AgentStep, FunctionStep, Parallel, PlanExecuteScheduler, Pipeline, Router, Step, StepError, WorkflowContext,
};
use conductor_types::event::WorkflowEvent;
use conductor_types::message::ChatMessage;
use conductor_types::task::TaskStatus;
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

fn scripted_planner(plan: &'static str) -> BoxAgent {
    BoxAgent::new(FnAgent::new("planner", move |_: &str, _: &[ChatMessage]| Ok(json!(plan))))
}

fn echo_summarizer() -> BoxAgent {
    BoxAgent::new(FnAgent::new("summarizer", |prompt: &str, _: &[ChatMessage]| Ok(json!(prompt))))
}

fn subtask_id(prompt: &str) -> String {
    prompt
        .lines()
        .find_map(|l| l.strip_prefix("Subtask ["))
        .and_then(|l| l.split_once(']'))
        .map(|(id, _)| id.to_string())
        .unwrap_or_default()
}

/// Async executor that records start/finish order, sleeps a little so
/// concurrent tasks overlap, and fails the IDs it was told to fail.
struct RecordingExecutor {
    log: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
    failing: Vec<&'static str>,
}

impl Agent for RecordingExecutor {
    fn name(&self) -> &str {
        "executor"
    }

    async fn invoke(&self, task: &str, _history: &[ChatMessage]) -> Result<Value, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id = subtask_id(task);
        self.log.lock().unwrap().push(format!("start:{id}"));
        tokio::time::sleep(Duration::from_millis(15)).await;
        self.log.lock().unwrap().push(format!("end:{id}"));

        if self.failing.contains(&id.as_str()) {
            return Err(AgentError::invocation("executor", format!("{id} could not be completed")));
        }
        Ok(json!(format!("result of {id}")))
    }
}

struct Harness {
    log: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
}

impl Harness {
    fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn executor(&self, failing: Vec<&'static str>) -> BoxAgent {
        BoxAgent::new(RecordingExecutor {
            log: self.log.clone(),
            calls: self.calls.clone(),
            failing,
        })
    }

    fn position(&self, entry: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{entry} not recorded"))
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pipeline_steps_see_earlier_writes_in_order() {
    let upper = BoxAgent::new(FnAgent::new("upper", |task: &str, _: &[ChatMessage]| {
        Ok(json!(task.to_uppercase()))
    }));

    let pipeline = Pipeline::new("report", vec![])
        .then(FunctionStep::sync("prepare", |ctx| {
            let topic = ctx.get_text("topic")?;
            Ok(json!(format!("notes on {topic}")))
        })
        .with_output_key("notes"))
        .then(AgentStep::new("shout", upper).with_input_key("notes").with_output_key("loud"))
        .then(FunctionStep::sync("finish", |ctx| Ok(json!(format!("{}!", ctx.get_text("loud")?)))));

    let ctx = WorkflowContext::from([("topic", json!("rust"))]);
    let out = pipeline.run(&ctx).await.unwrap();

    assert_eq!(out, json!("NOTES ON RUST!"));
    assert_eq!(ctx.get("notes"), Some(json!("notes on rust")));
    assert_eq!(ctx.get("loud"), Some(json!("NOTES ON RUST")));
}

#[tokio::test]
async fn rerunning_a_pipeline_on_fresh_contexts_is_deterministic() {
    let counter = BoxAgent::new(FnAgent::new("len", |task: &str, _: &[ChatMessage]| Ok(json!(task.len()))));
    let pipeline = Pipeline::new("p", vec![])
        .then(AgentStep::new("measure", counter).with_output_key("length"))
        .then(FunctionStep::sync("double", |ctx| {
            let n: u64 = ctx.get_as("length")?;
            Ok(json!(n * 2))
        }));

    let first = pipeline.execute(WorkflowContext::from([("task", json!("abcd"))])).await.unwrap();
    let second = pipeline.execute(WorkflowContext::from([("task", json!("abcd"))])).await.unwrap();
    assert_eq!(first, json!(8));
    assert_eq!(first, second);
}

#[tokio::test]
async fn nested_failure_carries_the_step_chain() {
    let inner = Pipeline::new("inner", vec![])
        .then(FunctionStep::sync("ok", |_| Ok(Value::Null)))
        .then(FunctionStep::sync("needs_config", |ctx| Ok(ctx.require("config")?)));
    let outer = Pipeline::new("outer", vec![]).then(FunctionStep::sync("warmup", |_| Ok(Value::Null))).then(inner);

    let err = outer.run(&WorkflowContext::new()).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "step #1 'inner' failed: step #1 'needs_config' failed: missing context key 'config'"
    );
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[tokio::test]
async fn router_returns_the_first_true_route_over_the_default() {
    let constant = |name: &'static str| FunctionStep::sync(name, move |_| Ok(json!(name)));
    let router = Router::new("router")
        .route(|_| false, constant("s1"))
        .route(|_| true, constant("s2"))
        .default_step(constant("s3"));

    for _ in 0..3 {
        assert_eq!(router.run(&WorkflowContext::new()).await.unwrap(), json!("s2"));
    }
}

// ---------------------------------------------------------------------------
// Parallel
// ---------------------------------------------------------------------------

fn sleeper(name: &'static str, ms: u64) -> FunctionStep {
    FunctionStep::new(name, move |_| async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!(format!("{name} done")))
    })
}

#[tokio::test]
async fn parallel_result_has_exactly_the_child_names() {
    let group = Parallel::new(
        "abc",
        vec![sleeper("A", 20).boxed(), sleeper("B", 1).boxed(), sleeper("C", 10).boxed()],
        3,
    )
    .unwrap();

    let out = group.run(&WorkflowContext::new()).await.unwrap();
    let map = out.as_object().unwrap();
    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    keys.sort();
    assert_eq!(keys, vec!["A", "B", "C"]);
    assert_eq!(map["B"], json!("B done"));
}

#[tokio::test]
async fn parallel_failure_names_only_the_failing_child() {
    let b = FunctionStep::new("B", |_| async { Err(anyhow::anyhow!("B could not connect")) });
    let group = Parallel::new("abc", vec![sleeper("A", 5).boxed(), b.boxed(), sleeper("C", 5).boxed()], 3).unwrap();

    let err = group.run(&WorkflowContext::new()).await.unwrap_err();
    let StepError::AggregateParallel { failures, .. } = &err else {
        panic!("expected aggregate error, got {err:?}");
    };
    let names: Vec<&str> = failures.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["B"]);
    assert!(err.to_string().contains("'B': B could not connect"));
}

#[tokio::test]
async fn parallel_children_write_disjoint_keys() {
    let writer = |key: &'static str| {
        FunctionStep::new(key, move |ctx: WorkflowContext| async move {
            tokio::time::sleep(Duration::from_millis(2)).await;
            ctx.set(key, json!(key));
            Ok(Value::Null)
        })
        .boxed()
    };
    let group = Parallel::new("writers", vec![writer("x"), writer("y"), writer("z")], 2).unwrap();
    let ctx = WorkflowContext::new();
    group.run(&ctx).await.unwrap();
    assert_eq!(ctx.keys(), vec!["x", "y", "z"]);
}

// ---------------------------------------------------------------------------
// PlanExecuteScheduler
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dependent_task_waits_for_both_dependencies() {
    let harness = Harness::new();
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();

    let scheduler = PlanExecuteScheduler::new(
        scripted_planner(
            r#"Here is the plan:
```json
{"tasks": [
  {"id": "T1", "description": "collect"},
  {"id": "T2", "description": "measure"},
  {"id": "T3", "description": "combine", "depends_on": ["T1", "T2"]}
]}
```"#,
        ),
        harness.executor(vec![]),
        echo_summarizer(),
    )
    .with_event_bus(bus);

    let outcome = scheduler.execute("report", &WorkflowContext::new()).await.unwrap();
    assert!(outcome.tasks.iter().all(|t| t.status == TaskStatus::Done));

    let t3_start = harness.position("start:T3");
    assert!(harness.position("end:T1") < t3_start);
    assert!(harness.position("end:T2") < t3_start);
    // T1 and T2 overlap: both start before either finishes.
    assert!(harness.position("start:T2") < harness.position("end:T1"));

    let waves: Vec<Vec<String>> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            WorkflowEvent::WaveStarted { task_ids, .. } => Some(task_ids),
            _ => None,
        })
        .collect();
    assert_eq!(waves, vec![vec!["T1".to_string(), "T2".to_string()], vec!["T3".to_string()]]);
}

#[tokio::test]
async fn cyclic_plan_fails_before_any_task_executes() {
    let harness = Harness::new();
    let scheduler = PlanExecuteScheduler::new(
        scripted_planner(
            r#"{"tasks": [
                {"id": "T1", "description": "a", "depends_on": ["T2"]},
                {"id": "T2", "description": "b", "depends_on": ["T1"]}
            ]}"#,
        ),
        harness.executor(vec![]),
        echo_summarizer(),
    );

    let err = scheduler.execute("loop", &WorkflowContext::new()).await.unwrap_err();
    assert!(matches!(err, StepError::CyclicDependency { ref cycle } if cycle.contains(&"T1".to_string()) && cycle.contains(&"T2".to_string())));
    assert_eq!(harness.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_dependency_fails_before_any_task_executes() {
    let harness = Harness::new();
    let scheduler = PlanExecuteScheduler::new(
        scripted_planner(r#"[{"id": "T1", "description": "a"}, {"id": "T2", "description": "b", "depends_on": ["T9"]}]"#),
        harness.executor(vec![]),
        echo_summarizer(),
    );

    let err = scheduler.execute("x", &WorkflowContext::new()).await.unwrap_err();
    assert!(matches!(err, StepError::UnknownDependency { ref dependency, .. } if dependency == "T9"));
    assert_eq!(harness.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_task_blocks_dependents_but_not_independent_work() {
    let harness = Harness::new();
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();

    let scheduler = PlanExecuteScheduler::new(
        scripted_planner(
            r#"{"tasks": [
                {"id": "T1", "description": "fetch"},
                {"id": "T2", "description": "transform", "depends_on": ["T1"]},
                {"id": "T3", "description": "independent"}
            ]}"#,
        ),
        harness.executor(vec!["T1"]),
        echo_summarizer(),
    )
    .with_event_bus(bus);

    let ctx = WorkflowContext::from([("task", json!("pipeline with a broken source"))]);
    let summary = scheduler.run(&ctx).await.unwrap();
    let summary = summary.as_str().unwrap();

    let statuses: Vec<(String, TaskStatus)> = ctx
        .get_as::<Vec<Value>>("plan")
        .unwrap()
        .iter()
        .map(|t| {
            (
                t["id"].as_str().unwrap().to_string(),
                serde_json::from_value(t["status"].clone()).unwrap(),
            )
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("T1".to_string(), TaskStatus::Failed),
            ("T2".to_string(), TaskStatus::Unreachable),
            ("T3".to_string(), TaskStatus::Done),
        ]
    );

    // T2 was never dispatched.
    assert!(!harness.log.lock().unwrap().iter().any(|e| e.ends_with(":T2")));
    assert_eq!(ctx.get("task_results").unwrap()["T3"], json!("result of T3"));
    assert_eq!(ctx.get("task_results").unwrap()["T2"], Value::Null);

    assert!(summary.contains("result: result of T3"), "summary: {summary}");
    assert!(summary.contains("T1 could not be completed"), "summary: {summary}");
    assert!(summary.contains("unreachable: depends on failed task 'T1'"), "summary: {summary}");

    let mut unreachable = Vec::new();
    let mut completed = false;
    for event in drain(&mut events) {
        match event {
            WorkflowEvent::TaskUnreachable { task_id, blocked_by, .. } => unreachable.push((task_id, blocked_by)),
            WorkflowEvent::RunCompleted { .. } => completed = true,
            _ => {}
        }
    }
    assert_eq!(unreachable, vec![("T2".to_string(), "T1".to_string())]);
    assert!(completed);
}

#[tokio::test]
async fn scheduler_nests_inside_a_pipeline() {
    let harness = Harness::new();
    let scheduler = PlanExecuteScheduler::new(
        scripted_planner(r#"[{"id": "T1", "description": "only"}]"#),
        harness.executor(vec![]),
        BoxAgent::new(FnAgent::new("summarizer", |_: &str, _: &[ChatMessage]| Ok(json!("all good")))),
    );

    let pipeline = Pipeline::new("outer", vec![])
        .then(FunctionStep::sync("set_goal", |ctx| {
            ctx.set("task", json!("tiny goal"));
            Ok(Value::Null)
        }))
        .then(scheduler)
        .then(FunctionStep::sync("read_result", |ctx| Ok(json!(format!("final: {}", ctx.get_text("result")?)))));

    let out = pipeline.run(&WorkflowContext::new()).await.unwrap();
    assert_eq!(out, json!("final: all good"));
}
