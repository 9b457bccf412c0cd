//! `conductor simulate`: run a plan through the real scheduler with scripted
//! agents, no model involved.
//!
//! - the planner answers with the file contents verbatim
//! - the executor reports the subtask it was given and the prerequisite
//!   results it received, or fails for the IDs passed with `--fail`
//! - the summarizer counts task statuses

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::{Value, json};

use conductor_core::agent::{AgentError, BoxAgent, FnAgent};
use conductor_core::event::{EventBus, drain};
use conductor_core::workflow::{PlanExecuteScheduler, SchedulerOutcome, WorkflowContext};
use conductor_types::config::EngineConfig;
use conductor_types::event::WorkflowEvent;
use conductor_types::message::ChatMessage;
use conductor_types::task::TaskStatus;

use super::plan::{load_plan, read_plan_text};

pub async fn simulate(path: &Path, goal: &str, fail: Vec<String>, config: &EngineConfig, json: bool) -> Result<()> {
    // Validate up front so bad --fail IDs are reported before the run.
    let plan = load_plan(path).await?;
    for id in &fail {
        if plan.task(id).is_none() {
            bail!("--fail {id}: no such task in {}", path.display());
        }
    }

    let text = read_plan_text(path).await?;
    let failing: HashSet<String> = fail.into_iter().collect();
    let (outcome, timeline) = run_scripted(text, plan.len(), goal, failing, config).await?;

    if json {
        let tasks: Vec<_> = outcome
            .tasks
            .iter()
            .map(|t| {
                json!({
                    "id": t.id(),
                    "status": t.status,
                    "result": t.result,
                    "failure": t.failure,
                })
            })
            .collect();
        let out = json!({
            "run_id": outcome.run_id.to_string(),
            "tasks": tasks,
            "summary": outcome.summary,
            "events": timeline,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Simulated run {}",
        style("*").green().bold(),
        style(outcome.run_id.to_string().chars().take(8).collect::<String>()).cyan()
    );
    println!();

    for event in &timeline {
        if let WorkflowEvent::WaveStarted { wave, task_ids, .. } = event {
            println!("  wave {wave}: {}", task_ids.join(", "));
        }
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Task").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Result / failure"),
        ]);

    for task in &outcome.tasks {
        let detail = match (&task.result, &task.failure) {
            (Some(Value::String(s)), _) => s.clone(),
            (Some(other), _) => other.to_string(),
            (None, Some(failure)) => failure.clone(),
            (None, None) => String::new(),
        };
        table.add_row(vec![Cell::new(task.id()), format_status(task.status), Cell::new(detail)]);
    }

    println!("{table}");
    println!();
    println!("  Summary: {}", style(summary_text(&outcome.summary)).bold());
    println!();
    Ok(())
}

/// Run `plan_text` through the scheduler with scripted agents and return the
/// outcome together with every event the run published.
async fn run_scripted(
    plan_text: String,
    task_count: usize,
    goal: &str,
    failing: HashSet<String>,
    config: &EngineConfig,
) -> Result<(SchedulerOutcome, Vec<WorkflowEvent>)> {
    // Drained only after the run, so the buffer must hold all of it.
    let bus = EventBus::for_run(task_count);
    let mut events = bus.subscribe();

    let scheduler = PlanExecuteScheduler::new(
        scripted_planner(plan_text),
        scripted_executor(failing),
        scripted_summarizer(),
    )
    .with_name("simulate")
    .with_config(config.scheduler.clone())
    .context("invalid scheduler configuration")?
    .with_event_bus(bus);

    let outcome = scheduler
        .execute(goal, &WorkflowContext::new())
        .await
        .context("simulated run failed")?;
    Ok((outcome, drain(&mut events)))
}

fn summary_text(summary: &Value) -> String {
    match summary {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_status(status: TaskStatus) -> Cell {
    match status {
        TaskStatus::Pending => Cell::new("pending").fg(Color::Yellow),
        TaskStatus::Ready => Cell::new("ready").fg(Color::Yellow),
        TaskStatus::Running => Cell::new("running").fg(Color::Blue),
        TaskStatus::Done => Cell::new("done").fg(Color::Green),
        TaskStatus::Failed => Cell::new("failed").fg(Color::Red),
        TaskStatus::Unreachable => Cell::new("unreachable").fg(Color::DarkYellow),
    }
}

// ---------------------------------------------------------------------------
// Scripted agents
// ---------------------------------------------------------------------------

fn scripted_planner(text: String) -> BoxAgent {
    BoxAgent::new(FnAgent::new("scripted-planner", move |_: &str, _: &[ChatMessage]| {
        Ok(Value::String(text.clone()))
    }))
}

fn scripted_executor(failing: HashSet<String>) -> BoxAgent {
    BoxAgent::new(FnAgent::new("scripted-executor", move |prompt: &str, _: &[ChatMessage]| {
        let (id, description) = subtask_line(prompt).ok_or_else(|| AgentError::InvalidOutput {
            agent: "scripted-executor".to_string(),
            message: "prompt has no subtask line".to_string(),
        })?;

        if failing.contains(id) {
            return Err(AgentError::invocation("scripted-executor", format!("scripted failure for '{id}'")));
        }

        let inputs = prompt.lines().filter(|l| l.starts_with("- [")).count();
        Ok(json!(format!("completed '{description}' using {inputs} prerequisite result(s)")))
    }))
}

fn scripted_summarizer() -> BoxAgent {
    BoxAgent::new(FnAgent::new("scripted-summarizer", |prompt: &str, _: &[ChatMessage]| {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for line in prompt.lines() {
            if let Some(status) = line.trim_start().strip_prefix("status: ") {
                *counts.entry(status).or_default() += 1;
            }
        }
        let total: usize = counts.values().sum();
        let parts: Vec<String> = counts.iter().map(|(s, n)| format!("{n} {s}")).collect();
        Ok(json!(if parts.is_empty() {
            "0 tasks".to_string()
        } else {
            format!("{total} tasks: {}", parts.join(", "))
        }))
    }))
}

/// Extract `(id, description)` from the `Subtask [id]: description` line.
fn subtask_line(prompt: &str) -> Option<(&str, &str)> {
    let line = prompt.lines().find_map(|l| l.strip_prefix("Subtask ["))?;
    line.split_once("]: ")
}
