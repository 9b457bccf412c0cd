//! Plan-then-execute scheduler.
//!
//! # Execution flow
//!
//! 1. Ask the planner to break the goal into `{id, description, depends_on}`
//!    records and parse its answer into a [`Plan`].
//! 2. Validate the dependency graph: unknown IDs and cycles fail the run
//!    before any task executes.
//! 3. Execute in waves. Every pending task whose dependencies are all done is
//!    dispatched in one bounded [`Parallel`] group; readiness is recomputed
//!    once the wave settles.
//! 4. A failed task marks every task depending on it unreachable; unrelated
//!    tasks keep running.
//! 5. The summarizer receives every task's status and result or failure, and
//!    its answer becomes the scheduler's result.
//!
//! Task failures do not fail the run: they are reported to the summarizer
//! and recorded in the context.

use std::time::Instant;

use chrono::Utc;
use conductor_types::config::SchedulerConfig;
use conductor_types::event::WorkflowEvent;
use conductor_types::task::{Task, TaskStatus};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::agent::BoxAgent;
use crate::event::EventBus;

use super::context::{WorkflowContext, value_to_string};
use super::error::StepError;
use super::parallel::Parallel;
use super::plan::{Plan, planning_prompt};
use super::step::Step;

const PLANNER: &str = "planner";
const SUMMARIZER: &str = "summarizer";

// ---------------------------------------------------------------------------
// SchedulerOutcome
// ---------------------------------------------------------------------------

/// Final state of one plan-execute run.
#[derive(Debug, Clone)]
pub struct SchedulerOutcome {
    pub run_id: Uuid,
    /// Tasks in plan order with their terminal statuses.
    pub tasks: Vec<Task>,
    /// Summarizer output.
    pub summary: Value,
}

impl SchedulerOutcome {
    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.tasks.iter().find(|t| t.id() == id).map(|t| t.status)
    }
}

// ---------------------------------------------------------------------------
// PlanExecuteScheduler
// ---------------------------------------------------------------------------

/// Drives planner, executor, and summarizer agents over a task graph.
#[derive(Debug, Clone)]
pub struct PlanExecuteScheduler {
    name: String,
    planner: BoxAgent,
    executor: BoxAgent,
    summarizer: BoxAgent,
    config: SchedulerConfig,
    event_bus: Option<EventBus>,
}

impl PlanExecuteScheduler {
    pub fn new(planner: BoxAgent, executor: BoxAgent, summarizer: BoxAgent) -> Self {
        Self {
            name: "plan_execute".to_string(),
            planner,
            executor,
            summarizer,
            config: SchedulerConfig::default(),
            event_bus: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the configuration. Rejects a zero worker bound and blank keys.
    pub fn with_config(mut self, config: SchedulerConfig) -> Result<Self, StepError> {
        if config.max_workers == 0 {
            return Err(StepError::InvalidConfiguration(format!(
                "scheduler '{}': max_workers must be at least 1",
                self.name
            )));
        }
        for (field, key) in [
            ("task_key", &config.task_key),
            ("result_key", &config.result_key),
            ("plan_key", &config.plan_key),
            ("task_results_key", &config.task_results_key),
        ] {
            if key.trim().is_empty() {
                return Err(StepError::InvalidConfiguration(format!(
                    "scheduler '{}': {field} must not be empty",
                    self.name
                )));
            }
        }
        self.config = config;
        Ok(self)
    }

    /// Publish progress events on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn publish(&self, event: WorkflowEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    /// Invoke the planner for `goal` and validate its answer.
    pub async fn plan(&self, goal: &str) -> Result<Plan, StepError> {
        let prompt = planning_prompt(goal);
        let response = self
            .planner
            .invoke(&prompt, &[])
            .await
            .map_err(|e| StepError::from(e).in_step(PLANNER, None))?;

        let plan = Plan::parse(&value_to_string(&response)).inspect_err(|e| {
            tracing::warn!(scheduler = %self.name, error = %e, "planner output rejected");
        })?;

        tracing::info!(scheduler = %self.name, tasks = plan.len(), "plan created");
        Ok(plan)
    }

    /// Run the full plan-execute cycle for `goal` over `ctx`.
    ///
    /// Writes the summary under `result_key`, the plan with final statuses
    /// under `plan_key`, and an id -> result map under `task_results_key`.
    pub async fn execute(&self, goal: &str, ctx: &WorkflowContext) -> Result<SchedulerOutcome, StepError> {
        let start = Instant::now();
        let run_id = ctx.run_id();
        tracing::info!(scheduler = %self.name, run_id = %run_id, "plan-execute run started");

        let mut plan = self.plan(goal).await?;
        self.publish(WorkflowEvent::PlanCreated {
            run_id,
            scheduler: self.name.clone(),
            task_ids: plan.ids(),
        });

        self.execute_waves(goal, &mut plan, ctx).await?;

        let summary = self
            .summarizer
            .invoke(&self.summary_prompt(goal, &plan), &[])
            .await
            .map_err(|e| StepError::from(e).in_step(SUMMARIZER, None))?;

        let task_results: Map<String, Value> = plan
            .tasks()
            .iter()
            .map(|t| (t.id().to_string(), t.result.clone().unwrap_or(Value::Null)))
            .collect();
        ctx.set_serialized(self.config.plan_key.clone(), &plan.tasks())?;
        ctx.set(self.config.task_results_key.clone(), task_results);
        ctx.set(self.config.result_key.clone(), summary.clone());

        let statuses = plan
            .tasks()
            .iter()
            .map(|t| (t.id().to_string(), t.status))
            .collect();
        let duration_ms = start.elapsed().as_millis() as u64;
        self.publish(WorkflowEvent::RunCompleted {
            run_id,
            scheduler: self.name.clone(),
            duration_ms,
            statuses,
            finished_at: Utc::now(),
        });
        tracing::info!(scheduler = %self.name, run_id = %run_id, duration_ms, "plan-execute run completed");

        Ok(SchedulerOutcome {
            run_id,
            tasks: plan.into_tasks(),
            summary,
        })
    }

    async fn execute_waves(&self, goal: &str, plan: &mut Plan, ctx: &WorkflowContext) -> Result<(), StepError> {
        let run_id = ctx.run_id();
        let mut wave = 0usize;

        loop {
            let ready = plan.ready_ids();
            if ready.is_empty() {
                break;
            }
            if ctx.is_cancelled() {
                tracing::warn!(scheduler = %self.name, wave, "run cancelled before wave");
                return Err(StepError::Cancelled);
            }

            tracing::debug!(scheduler = %self.name, wave, tasks = ready.len(), "processing wave");
            self.publish(WorkflowEvent::WaveStarted {
                run_id,
                wave,
                task_ids: ready.clone(),
            });

            let mut children = Vec::with_capacity(ready.len());
            for id in &ready {
                let prompt = task_prompt(goal, plan, id);
                plan.start(id)?;
                children.push(
                    TaskStep {
                        task_id: id.clone(),
                        prompt,
                        executor: self.executor.clone(),
                        run_id,
                        event_bus: self.event_bus.clone(),
                    }
                    .boxed(),
                );
            }

            let group = Parallel::new(format!("{}/wave-{wave}", self.name), children, self.config.max_workers)?;
            for (task_id, outcome) in group.run_settled(ctx).await {
                match outcome {
                    Ok(result) => plan.complete(&task_id, result)?,
                    // Never dispatched; the run fails below.
                    Err(StepError::Cancelled) => {}
                    Err(source) => {
                        let err = StepError::TaskExecution {
                            task_id: task_id.clone(),
                            source: Box::new(source),
                        };
                        let reason = err.to_string();
                        tracing::warn!(scheduler = %self.name, task_id = %task_id, error = %reason, "task failed");
                        self.publish(WorkflowEvent::TaskFailed {
                            run_id,
                            task_id: task_id.clone(),
                            error: reason.clone(),
                        });

                        for blocked in plan.fail(&task_id, reason)? {
                            tracing::debug!(scheduler = %self.name, task_id = %blocked, blocked_by = %task_id, "task unreachable");
                            self.publish(WorkflowEvent::TaskUnreachable {
                                run_id,
                                task_id: blocked,
                                blocked_by: task_id.clone(),
                            });
                        }
                    }
                }
            }

            if ctx.is_cancelled() {
                tracing::warn!(scheduler = %self.name, wave, "run cancelled during wave");
                return Err(StepError::Cancelled);
            }
            wave += 1;
        }

        Ok(())
    }

    fn summary_prompt(&self, goal: &str, plan: &Plan) -> String {
        let limit = self.config.summary_result_chars;
        let mut lines = vec![format!("Goal: {goal}"), String::new()];

        if plan.is_empty() {
            lines.push("The plan contained no subtasks.".to_string());
        } else {
            lines.push("Results of all subtasks:".to_string());
            lines.push(String::new());
            for task in plan.tasks() {
                lines.push(format!("[{}] {}", task.id(), task.description()));
                lines.push(format!("  status: {}", task.status));
                if let Some(result) = &task.result {
                    lines.push(format!("  result: {}", truncate(&value_to_string(result), limit)));
                }
                if let Some(failure) = &task.failure {
                    lines.push(format!("  failure: {failure}"));
                }
                lines.push(String::new());
            }
        }

        lines.push("Based on these results, give the final summary and answer.".to_string());
        lines.join("\n")
    }
}

impl Step for PlanExecuteScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &WorkflowContext) -> Result<Value, StepError> {
        let goal = ctx.get_text(&self.config.task_key)?;
        let outcome = self.execute(&goal, ctx).await?;
        Ok(outcome.summary)
    }
}

// ---------------------------------------------------------------------------
// Per-task step
// ---------------------------------------------------------------------------

/// One dispatched task. Its prompt is fixed when the wave is built.
struct TaskStep {
    task_id: String,
    prompt: String,
    executor: BoxAgent,
    run_id: Uuid,
    event_bus: Option<EventBus>,
}

impl Step for TaskStep {
    fn name(&self) -> &str {
        &self.task_id
    }

    async fn run(&self, _ctx: &WorkflowContext) -> Result<Value, StepError> {
        if let Some(bus) = &self.event_bus {
            bus.publish(WorkflowEvent::TaskStarted {
                run_id: self.run_id,
                task_id: self.task_id.clone(),
            });
        }
        let start = Instant::now();

        let result = self.executor.invoke(&self.prompt, &[]).await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(task_id = %self.task_id, duration_ms, "task completed");
        if let Some(bus) = &self.event_bus {
            bus.publish(WorkflowEvent::TaskCompleted {
                run_id: self.run_id,
                task_id: self.task_id.clone(),
                duration_ms,
            });
        }
        Ok(result)
    }
}

/// Executor input for `id`: the overall goal, the task, and the results of
/// its own dependencies only.
fn task_prompt(goal: &str, plan: &Plan, id: &str) -> String {
    let description = plan.task(id).map(|t| t.description()).unwrap_or_default();
    let mut prompt = format!("Overall goal: {goal}\n\nSubtask [{id}]: {description}");

    let deps = plan.dependency_results(id);
    if !deps.is_empty() {
        prompt.push_str("\n\nResults of prerequisite tasks:");
        for (dep_id, result) in deps {
            prompt.push_str(&format!("\n- [{dep_id}]: {}", value_to_string(result)));
        }
    }
    prompt
}

/// First `limit` characters of `text`, with "..." appended when cut.
/// A limit of 0 disables truncation.
fn truncate(text: &str, limit: usize) -> String {
    if limit == 0 || text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...");
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, FnAgent};
    use conductor_types::message::ChatMessage;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn planner(plan: &'static str) -> BoxAgent {
        BoxAgent::new(FnAgent::new("planner", move |_: &str, _: &[ChatMessage]| Ok(json!(plan))))
    }

    /// Executor that records prompts and fails tasks whose description
    /// contains "FAIL".
    fn executor(prompts: Arc<Mutex<Vec<String>>>) -> BoxAgent {
        BoxAgent::new(FnAgent::new("executor", move |prompt: &str, _: &[ChatMessage]| {
            prompts.lock().unwrap().push(prompt.to_string());
            if prompt.contains("FAIL") {
                return Err(AgentError::invocation("executor", "refused"));
            }
            let description = prompt
                .lines()
                .find(|l| l.starts_with("Subtask ["))
                .and_then(|l| l.split_once("]: "))
                .map(|(_, d)| d)
                .unwrap_or_default();
            Ok(json!(format!("done({description})")))
        }))
    }

    fn echo_summarizer() -> BoxAgent {
        BoxAgent::new(FnAgent::new("summarizer", |prompt: &str, _: &[ChatMessage]| Ok(json!(prompt))))
    }

    #[tokio::test]
    async fn test_dependency_results_flow_to_dependents() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let scheduler = PlanExecuteScheduler::new(
            planner(r#"{"tasks": [{"id": "a", "description": "alpha"}, {"id": "b", "description": "beta", "depends_on": ["a"]}]}"#),
            executor(prompts.clone()),
            echo_summarizer(),
        );
        let ctx = WorkflowContext::from([("task", json!("ship it"))]);

        let summary = scheduler.run(&ctx).await.unwrap();
        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("- [a]: done(alpha)"), "got: {}", prompts[1]);
        assert!(!prompts[0].contains("prerequisite"));
        assert!(summary.as_str().unwrap().contains("[b] beta\n  status: done"));

        assert_eq!(ctx.get("task_results"), Some(json!({ "a": "done(alpha)", "b": "done(beta)" })));
        assert_eq!(ctx.get("plan").unwrap()[1]["status"], json!("done"));
        assert_eq!(ctx.get("result"), Some(summary));
    }

    #[tokio::test]
    async fn test_failure_annotations_in_summary() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let scheduler = PlanExecuteScheduler::new(
            planner(r#"[{"id": "t1", "description": "FAIL here"}, {"id": "t2", "description": "after", "depends_on": ["t1"]}]"#),
            executor(prompts.clone()),
            echo_summarizer(),
        );

        let outcome = scheduler.execute("goal", &WorkflowContext::new()).await.unwrap();
        assert_eq!(outcome.status_of("t1"), Some(TaskStatus::Failed));
        assert_eq!(outcome.status_of("t2"), Some(TaskStatus::Unreachable));
        assert_eq!(prompts.lock().unwrap().len(), 1);

        let summary = outcome.summary.as_str().unwrap().to_string();
        assert!(summary.contains("failure: task 't1' failed: agent 'executor' invocation failed: refused"));
        assert!(summary.contains("failure: unreachable: depends on failed task 't1'"));
    }

    #[tokio::test]
    async fn test_empty_plan_goes_straight_to_summary() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let scheduler = PlanExecuteScheduler::new(planner(r#"{"tasks": []}"#), executor(prompts.clone()), echo_summarizer());
        let outcome = scheduler.execute("nothing", &WorkflowContext::new()).await.unwrap();
        assert!(outcome.tasks.is_empty());
        assert!(outcome.summary.as_str().unwrap().contains("no subtasks"));
        assert!(prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_planner_error_is_annotated() {
        let broken = BoxAgent::new(FnAgent::new("planner", |_: &str, _: &[ChatMessage]| {
            Err(AgentError::invocation("planner", "offline"))
        }));
        let scheduler = PlanExecuteScheduler::new(broken, echo_summarizer(), echo_summarizer());
        let err = scheduler.execute("x", &WorkflowContext::new()).await.unwrap_err();
        assert!(err.to_string().starts_with("step 'planner' failed"), "got: {err}");
    }

    #[tokio::test]
    async fn test_missing_task_key() {
        let scheduler = PlanExecuteScheduler::new(planner("[]"), echo_summarizer(), echo_summarizer());
        let err = scheduler.run(&WorkflowContext::new()).await.unwrap_err();
        assert!(matches!(err, StepError::MissingContextKey(ref k) if k == "task"));
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_before_wave() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let scheduler = PlanExecuteScheduler::new(
            planner(r#"[{"id": "a", "description": "x"}]"#),
            executor(prompts.clone()),
            echo_summarizer(),
        );
        let ctx = WorkflowContext::new();
        ctx.cancel();
        let err = scheduler.execute("x", &ctx).await.unwrap_err();
        assert!(matches!(err, StepError::Cancelled));
        assert!(prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_during_wave_fails_without_summary() {
        let ctx = WorkflowContext::new();
        let handle = ctx.clone();
        let executed = Arc::new(Mutex::new(Vec::new()));
        let seen = executed.clone();
        let cancelling = BoxAgent::new(FnAgent::new("executor", move |prompt: &str, _: &[ChatMessage]| {
            seen.lock().unwrap().push(prompt.to_string());
            handle.cancel();
            Ok(json!("partial"))
        }));
        let summaries = Arc::new(Mutex::new(0usize));
        let counter = summaries.clone();
        let summarizer = BoxAgent::new(FnAgent::new("summarizer", move |_: &str, _: &[ChatMessage]| {
            *counter.lock().unwrap() += 1;
            Ok(json!("summary"))
        }));

        let config = SchedulerConfig {
            max_workers: 1,
            ..SchedulerConfig::default()
        };
        let scheduler = PlanExecuteScheduler::new(
            planner(r#"[{"id": "a", "description": "x"}, {"id": "b", "description": "y"}]"#),
            cancelling,
            summarizer,
        )
        .with_config(config)
        .unwrap();

        let err = scheduler.execute("goal", &ctx).await.unwrap_err();
        assert!(matches!(err, StepError::Cancelled), "got: {err:?}");
        assert_eq!(executed.lock().unwrap().len(), 1);
        assert_eq!(*summaries.lock().unwrap(), 0);
        assert!(!ctx.has("result"));
        assert!(!ctx.has("plan"));
        assert!(!ctx.has("task_results"));
    }

    #[test]
    fn test_with_config_validation() {
        let base = PlanExecuteScheduler::new(planner("[]"), echo_summarizer(), echo_summarizer());
        let config = SchedulerConfig {
            max_workers: 0,
            ..SchedulerConfig::default()
        };
        assert!(matches!(base.clone().with_config(config), Err(StepError::InvalidConfiguration(_))));

        let config = SchedulerConfig {
            result_key: "answer".to_string(),
            ..SchedulerConfig::default()
        };
        let scheduler = base.with_config(config).unwrap();
        assert_eq!(scheduler.config().result_key, "answer");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
        assert_eq!(truncate("abcdef", 0), "abcdef");
        assert_eq!(truncate("héllo", 2), "hé...");
    }
}
