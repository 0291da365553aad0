//! Workflow Planner: turns a free-form requirement into a validated
//! [`TaskDAG`] by running the manager role once and parsing its JSON output.

use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::cancel::CancellationToken;
use crate::engine::{AgentLoopEngine, EngineConfig};
use crate::provider::Provider;
use crate::session::Session;
use crate::tools::ToolRegistry;
use crate::workflow::task::{Task, TaskDAG};
use crate::Result;

const PLANNER_SYSTEM_PROMPT: &str = "You are a planning assistant. Break the user's \
requirement into a small number of concrete, independently reviewable tasks. Respond \
with exactly one JSON object of the shape {\"tasks\": [{\"id\": string, \"title\": \
string, \"description\": string, \"dependencies\": [string]}]} and nothing else. Task \
ids must be unique and dependencies must reference only other task ids in the same \
plan. Order tasks so dependencies are satisfiable.";

#[derive(Debug, Deserialize)]
struct RawPlan {
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    id: String,
    title: String,
    description: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Find the first top-level `{...}` span in `text` and return it. Tolerant
/// of a model wrapping its JSON in prose or a markdown fence.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

fn validate_plan(raw: RawPlan, max_attempts_per_task: u32) -> Result<TaskDAG> {
    if raw.tasks.is_empty() {
        return Err(crate::Error::validation("planner produced an empty task list"));
    }
    let tasks = raw
        .tasks
        .into_iter()
        .map(|t| Task::new(t.id, t.title, t.description, t.dependencies, max_attempts_per_task))
        .collect();
    TaskDAG::new(tasks)
}

/// Produce a [`TaskDAG`] for `requirement`, retrying the manager call up to
/// `max_retries` times on unparseable or invalid output before falling back
/// to a single trivial task.
pub async fn plan(
    provider: Arc<dyn Provider>,
    model: &str,
    requirement: &str,
    max_retries: u32,
    max_attempts_per_task: u32,
    cancel: &CancellationToken,
) -> Result<TaskDAG> {
    for attempt in 0..=max_retries {
        if cancel.is_cancelled() {
            return Err(crate::Error::Cancelled);
        }
        let session = Arc::new(Session::new(".", model));
        let engine = AgentLoopEngine::new(
            EngineConfig::new(provider.clone(), Arc::new(ToolRegistry::new()), session.clone())
                .with_system_prompt(PLANNER_SYSTEM_PROMPT)
                .with_max_iterations(1)
                .with_temperature(0.0),
        );
        engine.run(cancel.clone(), requirement).await?;
        let text = session
            .messages()
            .await
            .last()
            .map(|m| m.text_content())
            .unwrap_or_default();

        let Some(json_str) = extract_json(&text) else {
            warn!(attempt, "planner produced no JSON object, retrying");
            continue;
        };
        match serde_json::from_str::<RawPlan>(json_str)
            .map_err(crate::Error::from)
            .and_then(|raw| validate_plan(raw, max_attempts_per_task))
        {
            Ok(dag) => return Ok(dag),
            Err(e) => warn!(attempt, error = %e, "planner output failed validation, retrying"),
        }
    }

    warn!(
        requirement,
        "planner exhausted retries, falling back to a single trivial task"
    );
    Ok(TaskDAG::trivial(requirement))
}
