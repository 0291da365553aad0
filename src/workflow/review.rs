//! Review/Fix stage: a reviewer-role engine judges an executor's candidate
//! result; a fixer-role engine repairs it when the reviewer rejects it.

use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::cancel::CancellationToken;
use crate::engine::{AgentLoopEngine, EngineConfig};
use crate::provider::Provider;
use crate::session::Session;
use crate::tools::ToolRegistry;
use crate::workflow::planner::extract_json;
use crate::Result;

/// The reviewer's verdict on a candidate result.
#[derive(Debug, Clone)]
pub struct ReviewVerdict {
    pub passed: bool,
    pub score: u8,
    pub issues: Vec<String>,
    pub feedback: String,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    passed: bool,
    #[serde(default)]
    score: u8,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    feedback: String,
}

const REVIEWER_SYSTEM_PROMPT: &str = "You are a meticulous code reviewer. You will be \
given a task description and a candidate result. Judge whether the candidate actually \
satisfies the task. Respond with exactly one JSON object of the shape \
{\"passed\": bool, \"score\": 0-100, \"issues\": [string], \"feedback\": string} and \
nothing else.";

const FIXER_SYSTEM_PROMPT: &str = "You are a focused fixer. You will be given a task \
description, a candidate result, and a reviewer's feedback explaining why it was \
rejected. Produce a corrected result that addresses the feedback. Respond with the \
corrected result only, no commentary.";

/// Run the reviewer role once over a candidate result.
pub async fn review(
    provider: Arc<dyn Provider>,
    model: &str,
    task_description: &str,
    candidate: &str,
    cancel: &CancellationToken,
) -> Result<ReviewVerdict> {
    let session = Arc::new(Session::new(".", model));
    let engine = AgentLoopEngine::new(
        EngineConfig::new(provider, Arc::new(ToolRegistry::new()), session.clone())
            .with_system_prompt(REVIEWER_SYSTEM_PROMPT)
            .with_max_iterations(1)
            .with_temperature(0.0),
    );
    let prompt = format!("Task:\n{task_description}\n\nCandidate result:\n{candidate}");
    engine.run(cancel.clone(), &prompt).await?;
    let text = last_assistant_text(&session).await;
    Ok(parse_verdict(&text))
}

fn parse_verdict(text: &str) -> ReviewVerdict {
    match extract_json(text).and_then(|s| serde_json::from_str::<RawVerdict>(s).ok()) {
        Some(raw) => ReviewVerdict {
            passed: raw.passed,
            score: raw.score,
            issues: raw.issues,
            feedback: raw.feedback,
        },
        None => {
            warn!("reviewer output was not parseable JSON, treating as a rejection");
            ReviewVerdict {
                passed: false,
                score: 0,
                issues: vec![],
                feedback: text.to_string(),
            }
        }
    }
}

/// Run the fixer role once, producing a replacement candidate result.
pub async fn fix(
    provider: Arc<dyn Provider>,
    model: &str,
    task_description: &str,
    candidate: &str,
    feedback: &str,
    cancel: &CancellationToken,
) -> Result<String> {
    let session = Arc::new(Session::new(".", model));
    let engine = AgentLoopEngine::new(
        EngineConfig::new(provider, Arc::new(ToolRegistry::new()), session.clone())
            .with_system_prompt(FIXER_SYSTEM_PROMPT)
            .with_max_iterations(1)
            .with_temperature(0.2),
    );
    let prompt = format!(
        "Task:\n{task_description}\n\nPrevious candidate:\n{candidate}\n\nReviewer feedback:\n{feedback}"
    );
    engine.run(cancel.clone(), &prompt).await?;
    Ok(last_assistant_text(&session).await)
}

async fn last_assistant_text(session: &Arc<Session>) -> String {
    session
        .messages()
        .await
        .last()
        .map(|m| m.text_content())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verdict_passed() {
        let verdict = parse_verdict(r#"{"passed": true, "score": 90, "issues": [], "feedback": "good"}"#);
        assert!(verdict.passed);
        assert_eq!(verdict.score, 90);
    }

    #[test]
    fn test_parse_verdict_falls_back_on_garbage() {
        let verdict = parse_verdict("not json at all");
        assert!(!verdict.passed);
        assert_eq!(verdict.feedback, "not json at all");
    }

    #[test]
    fn test_parse_verdict_extracts_surrounding_prose() {
        let verdict = parse_verdict("Here is my verdict: {\"passed\": false, \"feedback\": \"missing tests\"} thanks");
        assert!(!verdict.passed);
        assert_eq!(verdict.feedback, "missing tests");
    }
}
