//! Plan inspection commands: `validate` and `waves`.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use conductor_core::workflow::plan::Plan;

/// Read raw planner output from `path`.
pub async fn read_plan_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

/// Read and validate the plan in `path`.
pub async fn load_plan(path: &Path) -> Result<Plan> {
    let text = read_plan_text(path).await?;
    Plan::parse(&text).with_context(|| format!("invalid plan in {}", path.display()))
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub async fn validate(path: &Path, json: bool) -> Result<()> {
    let plan = load_plan(path).await?;
    let waves = plan.graph().waves().len();

    if json {
        let out = serde_json::json!({
            "valid": true,
            "tasks": plan.len(),
            "waves": waves,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} is a valid plan: {} tasks in {} waves",
        style("*").green().bold(),
        style(path.display()).cyan(),
        plan.len(),
        waves
    );
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Waves
// ---------------------------------------------------------------------------

pub async fn waves(path: &Path, json: bool) -> Result<()> {
    let plan = load_plan(path).await?;
    let waves = plan.graph().waves();

    if json {
        let out: Vec<_> = waves
            .iter()
            .enumerate()
            .map(|(idx, ids)| serde_json::json!({ "wave": idx, "tasks": ids }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if waves.is_empty() {
        println!();
        println!("  The plan has no tasks.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Wave").fg(Color::Cyan),
            Cell::new("Task"),
            Cell::new("Description"),
            Cell::new("Depends on"),
        ]);

    for (idx, ids) in waves.iter().enumerate() {
        for id in ids {
            let Some(task) = plan.task(id) else {
                continue;
            };
            table.add_row(vec![
                Cell::new(idx),
                Cell::new(task.id()),
                Cell::new(task.description()),
                Cell::new(task.depends_on().join(", ")),
            ]);
        }
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
