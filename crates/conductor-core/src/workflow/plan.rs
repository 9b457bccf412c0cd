//! Planner output parsing and per-run plan state.
//!
//! Planner agents answer in free text. The parser tolerates the usual noise
//! (prose before and after the payload, fenced code blocks, the alternate
//! `dependencies` key, a bare JSON array) but never guesses: a record missing
//! `id` or `description`, or with a malformed dependency list, fails with an
//! error naming the record and field.

use std::collections::{HashMap, HashSet};

use conductor_types::task::{Task, TaskSpec, TaskStatus};
use serde_json::{Map, Value};

use super::dag::TaskGraph;
use super::error::{PlanParseError, StepError};

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

/// Prompt sent to the planner agent for `goal`.
pub fn planning_prompt(goal: &str) -> String {
    format!(
        r#"Break the following goal into subtasks. Answer with JSON only, in this format:

{{
  "tasks": [
    {{"id": "task_1", "description": "what to do", "depends_on": []}},
    {{"id": "task_2", "description": "what to do", "depends_on": ["task_1"]}}
  ]
}}

Goal: {goal}

Rules:
- every task needs a unique "id" and a non-empty "description"
- "depends_on" lists the ids of tasks that must finish first
- tasks without dependencies between them will run in parallel
- dependencies must not form a cycle"#
    )
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse planner output into validated task records, in plan order.
///
/// Structural checks across records (unknown dependency IDs, cycles) are
/// left to [`TaskGraph::build`].
pub fn parse_plan(text: &str) -> Result<Vec<TaskSpec>, PlanParseError> {
    let records = match extract_payload(text)? {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("tasks") {
            Some(Value::Array(items)) => items,
            _ => return Err(PlanParseError::MissingTasks),
        },
        _ => return Err(PlanParseError::MissingTasks),
    };

    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let spec = parse_record(index, record)?;
        if !seen.insert(spec.id.clone()) {
            return Err(PlanParseError::DuplicateId(spec.id));
        }
        specs.push(spec);
    }
    Ok(specs)
}

/// Locate the JSON payload: fenced blocks first, then the first parseable
/// plan-shaped value anywhere in the text.
fn extract_payload(text: &str) -> Result<Value, PlanParseError> {
    for block in fenced_blocks(text) {
        if let Ok(value) = serde_json::from_str::<Value>(block.trim()) {
            if is_plan_object(&value) || value.is_array() {
                return Ok(value);
            }
        }
    }

    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() || value.is_array() {
            return Ok(value);
        }
    }

    let mut first_error = None;
    let mut saw_object = None;
    for candidate in EmbeddedValues::new(text) {
        match candidate {
            Ok(value) => {
                if let Some(plan) = find_plan(&value) {
                    return Ok(plan.clone());
                }
                if value.is_object() && saw_object.is_none() {
                    saw_object = Some(value);
                }
            }
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    match (saw_object, first_error) {
        (Some(object), _) => Ok(object),
        (None, Some(e)) => Err(PlanParseError::InvalidJson(e)),
        (None, None) => Err(PlanParseError::NoPayload),
    }
}

/// JSON values embedded in free text, tried at each `{` or `[`.
///
/// Scanning resumes after the end of every value that parses, so each byte
/// of a parsed value is read once; a failed attempt resumes one byte later.
struct EmbeddedValues<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> EmbeddedValues<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }
}

impl Iterator for EmbeddedValues<'_> {
    type Item = Result<Value, serde_json::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(offset) = self.text[self.pos..].find(['{', '[']) {
            let start = self.pos + offset;
            let mut stream = serde_json::Deserializer::from_str(&self.text[start..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value)) => {
                    self.pos = start + stream.byte_offset();
                    return Some(Ok(value));
                }
                Some(Err(e)) => {
                    self.pos = start + 1;
                    return Some(Err(e));
                }
                None => self.pos = start + 1,
            }
        }
        None
    }
}

/// The first plan-shaped value in `value`, searching nested values
/// depth-first.
fn find_plan(value: &Value) -> Option<&Value> {
    if is_plan_object(value) || is_record_array(value) {
        return Some(value);
    }
    match value {
        Value::Object(map) => map.values().find_map(find_plan),
        Value::Array(items) => items.iter().find_map(find_plan),
        _ => None,
    }
}

/// Contents of ``` fenced blocks, with any language tag line dropped.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(after.len());
        let body = &after[body_start..];
        let Some(close) = body.find("```") else {
            break;
        };
        blocks.push(&body[..close]);
        rest = &body[close + 3..];
    }
    blocks
}

fn is_plan_object(value: &Value) -> bool {
    value.as_object().is_some_and(|map| map.contains_key("tasks"))
}

/// A non-empty array of objects, i.e. a bare list of task records.
fn is_record_array(value: &Value) -> bool {
    value
        .as_array()
        .is_some_and(|items| !items.is_empty() && items.iter().all(Value::is_object))
}

fn parse_record(index: usize, record: Value) -> Result<TaskSpec, PlanParseError> {
    let Value::Object(map) = record else {
        return Err(PlanParseError::NotAnObject { index });
    };

    let id = required_string(&map, index, None, "id")?;
    let description = required_string(&map, index, Some(&id), "description")?;
    let depends_on = dependency_list(&map, index, &id)?;

    Ok(TaskSpec {
        id,
        description,
        depends_on,
    })
}

fn required_string(
    map: &Map<String, Value>,
    index: usize,
    task_id: Option<&str>,
    field: &'static str,
) -> Result<String, PlanParseError> {
    match map.get(field) {
        None | Some(Value::Null) => Err(PlanParseError::MissingField { index, field }),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(_) => Err(PlanParseError::InvalidField {
            index,
            task_id: task_id.map(str::to_string),
            field,
            reason: "must be a non-empty string".to_string(),
        }),
    }
}

fn dependency_list(map: &Map<String, Value>, index: usize, task_id: &str) -> Result<Vec<String>, PlanParseError> {
    let invalid = |field: &'static str, reason: String| PlanParseError::InvalidField {
        index,
        task_id: Some(task_id.to_string()),
        field,
        reason,
    };

    let (field, raw) = match (map.get("depends_on"), map.get("dependencies")) {
        (Some(_), Some(_)) => {
            return Err(invalid("depends_on", "conflicts with 'dependencies'; use one key".to_string()));
        }
        (Some(v), None) => ("depends_on", v),
        (None, Some(v)) => ("dependencies", v),
        (None, None) => return Ok(Vec::new()),
    };

    let items = match raw {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        _ => return Err(invalid(field, "must be a list of task ids".to_string())),
    };

    let mut deps: Vec<String> = Vec::with_capacity(items.len());
    for (pos, item) in items.iter().enumerate() {
        match item {
            Value::String(s) if !s.trim().is_empty() => {
                let dep = s.trim().to_string();
                if !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
            _ => return Err(invalid(field, format!("entry {pos} is not a task id string"))),
        }
    }
    Ok(deps)
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Validated tasks of one scheduler run together with their lifecycle state.
#[derive(Debug, Clone)]
pub struct Plan {
    tasks: Vec<Task>,
    graph: TaskGraph,
    index: HashMap<String, usize>,
}

impl Plan {
    /// Parse planner output and validate the dependency graph.
    pub fn parse(text: &str) -> Result<Self, StepError> {
        Self::from_specs(parse_plan(text)?)
    }

    pub fn from_specs(specs: Vec<TaskSpec>) -> Result<Self, StepError> {
        let graph = TaskGraph::build(&specs)?;
        let index = specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        let tasks = specs.into_iter().map(Task::new).collect();
        Ok(Self { tasks, graph, index })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.id().to_string()).collect()
    }

    /// Pending tasks whose dependencies are all done, in plan order.
    pub fn ready_ids(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| {
                t.depends_on()
                    .iter()
                    .all(|dep| self.task(dep).is_some_and(|d| d.status == TaskStatus::Done))
            })
            .map(|t| t.id().to_string())
            .collect()
    }

    /// Results of `id`'s direct dependencies, in declaration order.
    pub fn dependency_results(&self, id: &str) -> Vec<(&str, &Value)> {
        let Some(task) = self.task(id) else {
            return Vec::new();
        };
        task.depends_on()
            .iter()
            .filter_map(|dep| {
                let dep_task = self.task(dep)?;
                dep_task.result.as_ref().map(|r| (dep_task.id(), r))
            })
            .collect()
    }

    /// Move a pending task through ready to running.
    pub fn start(&mut self, id: &str) -> Result<(), StepError> {
        let task = self.task_mut(id)?;
        task.mark_ready()?;
        task.mark_running()?;
        Ok(())
    }

    pub fn complete(&mut self, id: &str, result: Value) -> Result<(), StepError> {
        self.task_mut(id)?.complete(result)?;
        Ok(())
    }

    /// Mark `id` failed and every pending task depending on it, directly or
    /// transitively, unreachable. Returns the IDs newly marked unreachable.
    pub fn fail(&mut self, id: &str, reason: impl Into<String>) -> Result<Vec<String>, StepError> {
        self.task_mut(id)?.fail(reason)?;

        let blocked: Vec<String> = self
            .graph
            .descendants(id)
            .into_iter()
            .map(|(task_id, _)| task_id.to_string())
            .collect();

        let mut newly = Vec::new();
        for task_id in blocked {
            let task = self.task_mut(&task_id)?;
            if task.status == TaskStatus::Pending {
                task.mark_unreachable(id)?;
                newly.push(task_id);
            }
        }
        Ok(newly)
    }

    /// Whether every task reached a terminal status.
    pub fn is_settled(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    fn task_mut(&mut self, id: &str) -> Result<&mut Task, StepError> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| StepError::InvalidConfiguration(format!("task '{id}' is not part of the plan")))?;
        Ok(&mut self.tasks[idx])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
