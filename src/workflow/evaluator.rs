//! Evaluator/Reporter: judges the finished task DAG against the original
//! requirement and assembles the [`FinalReport`] the workflow returns.

use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::cancel::CancellationToken;
use crate::engine::{AgentLoopEngine, EngineConfig};
use crate::provider::Provider;
use crate::session::Session;
use crate::tools::ToolRegistry;
use crate::workflow::planner::extract_json;
use crate::workflow::task::{TaskDAG, TaskStatus};
use crate::Result;

const EVALUATOR_SYSTEM_PROMPT: &str = "You are a rigorous engineering evaluator. You \
will be given the original requirement and the outcome of every task a team ran \
against it. Judge whether the requirement was actually met overall. Respond with \
exactly one JSON object of the shape {\"meets_requirement\": bool, \"quality_score\": \
0-100, \"strengths\": [string], \"weaknesses\": [string], \"suggestions\": [string]} \
and nothing else.";

#[derive(Debug, Clone, Deserialize)]
pub struct Evaluation {
    pub meets_requirement: bool,
    #[serde(default)]
    pub quality_score: u8,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl Default for Evaluation {
    fn default() -> Self {
        Self {
            meets_requirement: false,
            quality_score: 0,
            strengths: vec![],
            weaknesses: vec![],
            suggestions: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct FinalReport {
    pub status: ReportStatus,
    pub task_summaries: Vec<TaskSummary>,
    pub evaluation: Evaluation,
    pub conclusion: String,
}

/// Run the evaluator role once and combine its verdict with the DAG's
/// completion tallies into a [`FinalReport`].
pub async fn evaluate(
    provider: Arc<dyn Provider>,
    model: &str,
    requirement: &str,
    dag: &TaskDAG,
    cancel: &CancellationToken,
) -> Result<FinalReport> {
    let task_summaries: Vec<TaskSummary> = dag
        .ids_in_order()
        .map(|id| {
            let task = dag.get(id).expect("id came from ids_in_order");
            TaskSummary {
                id: task.id.clone(),
                title: task.title.clone(),
                status: task.status,
                attempts: task.attempts,
            }
        })
        .collect();

    let completed = task_summaries
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .count();
    let total = task_summaries.len();

    let evaluation = if cancel.is_cancelled() {
        Evaluation::default()
    } else {
        run_evaluator(provider, model, requirement, &task_summaries, cancel).await?
    };

    let status = if completed == total && evaluation.meets_requirement {
        ReportStatus::Success
    } else if completed == 0 {
        ReportStatus::Failed
    } else {
        ReportStatus::Partial
    };

    let conclusion = format!(
        "{completed}/{total} tasks completed; evaluator {} the requirement met (quality {}/100)",
        if evaluation.meets_requirement { "judged" } else { "did not judge" },
        evaluation.quality_score
    );

    Ok(FinalReport {
        status,
        task_summaries,
        evaluation,
        conclusion,
    })
}

async fn run_evaluator(
    provider: Arc<dyn Provider>,
    model: &str,
    requirement: &str,
    task_summaries: &[TaskSummary],
    cancel: &CancellationToken,
) -> Result<Evaluation> {
    let session = Arc::new(Session::new(".", model));
    let engine = AgentLoopEngine::new(
        EngineConfig::new(provider, Arc::new(ToolRegistry::new()), session.clone())
            .with_system_prompt(EVALUATOR_SYSTEM_PROMPT)
            .with_max_iterations(1)
            .with_temperature(0.0),
    );

    let outcomes = task_summaries
        .iter()
        .map(|t| format!("- {} ({}): {:?}, attempts={}", t.id, t.title, t.status, t.attempts))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!("Requirement:\n{requirement}\n\nTask outcomes:\n{outcomes}");

    engine.run(cancel.clone(), &prompt).await?;
    let text = session
        .messages()
        .await
        .last()
        .map(|m| m.text_content())
        .unwrap_or_default();

    match extract_json(&text).and_then(|s| serde_json::from_str::<Evaluation>(s).ok()) {
        Some(evaluation) => Ok(evaluation),
        None => {
            warn!("evaluator output was not parseable JSON, defaulting to not-met");
            Ok(Evaluation::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::task::Task;

    fn summary(status: TaskStatus) -> TaskSummary {
        TaskSummary { id: "t1".into(), title: "a".into(), status, attempts: 1 }
    }

    #[test]
    fn test_status_success_requires_all_completed_and_meets_requirement() {
        let summaries = vec![summary(TaskStatus::Completed)];
        let completed = summaries.iter().filter(|t| t.status == TaskStatus::Completed).count();
        let evaluation = Evaluation { meets_requirement: true, ..Evaluation::default() };
        let status = if completed == summaries.len() && evaluation.meets_requirement {
            ReportStatus::Success
        } else if completed == 0 {
            ReportStatus::Failed
        } else {
            ReportStatus::Partial
        };
        assert_eq!(status, ReportStatus::Success);
    }

    #[test]
    fn test_task_new_smoke() {
        let task = Task::new("t1", "title", "desc", vec![], 3);
        assert_eq!(task.id, "t1");
    }
}
