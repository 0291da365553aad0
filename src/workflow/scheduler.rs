//! Workflow Scheduler: the coordinator/worker loop that walks a [`TaskDAG`]
//! to completion. The coordinator is the sole writer of task state; workers
//! communicate results back over an mpsc channel rather than sharing
//! mutable task state directly.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::info;

use crate::cancel::CancellationToken;
use crate::engine::{AgentLoopEngine, EngineConfig};
use crate::provider::Provider;
use crate::session::Session;
use crate::tools::ToolRegistry;
use crate::workflow::review::{self, ReviewVerdict};
use crate::workflow::task::{TaskDAG, TaskStatus};
use crate::{Error, Result};

const EXECUTOR_SYSTEM_PROMPT: &str =
    "You are a software engineer completing one discrete task as part of a larger \
     plan. Use the tools available to you as needed. When finished, respond with the \
     result of the task, not commentary about the plan.";

#[derive(Clone)]
pub struct SchedulerConfig {
    pub max_executors: usize,
    /// Caps how many review/fix calls run at once, independent of
    /// `max_executors`. A worker already counted against `max_executors`
    /// additionally waits on this gate for the review/fix portion of its
    /// run, so the reviewer/fixer roles can be throttled separately from
    /// executor concurrency (useful when they're rate-limited or hosted
    /// differently than the executor model).
    pub max_reviewers: usize,
    pub max_retries: u32,
    pub enable_auto_fix: bool,
    pub executor_model: String,
    pub reviewer_model: String,
    pub fixer_model: String,
    pub tool_registry: Arc<ToolRegistry>,
}

pub enum SchedulerEvent {
    TaskStarted { id: String, title: String },
    Reviewing { id: String, title: String },
    Fixing { id: String, title: String },
    TaskCompleted { id: String, title: String },
    TaskFailed { id: String, title: String, message: String },
    ReviewFailed { id: String, title: String, message: String },
}

pub type SchedulerEventSink = Arc<dyn Fn(SchedulerEvent) + Send + Sync>;

enum WorkerOutcome {
    Completed { result: String, review: ReviewVerdict },
    ReviewFailed { verdict: ReviewVerdict },
    ExecutorError(Error),
    Cancelled,
}

async fn run_executor(
    provider: Arc<dyn Provider>,
    model: &str,
    tool_registry: Arc<ToolRegistry>,
    description: &str,
    cancel: &CancellationToken,
) -> Result<String> {
    let session = Arc::new(Session::new(".", model));
    let engine = AgentLoopEngine::new(
        EngineConfig::new(provider, tool_registry, session.clone())
            .with_system_prompt(EXECUTOR_SYSTEM_PROMPT)
            .with_max_iterations(20),
    );
    engine.run(cancel.clone(), description).await?;
    Ok(session
        .messages()
        .await
        .last()
        .map(|m| m.text_content())
        .unwrap_or_default())
}

async fn run_one_task(
    id: String,
    title: String,
    description: String,
    provider_factory: Arc<dyn Fn(&str) -> Arc<dyn Provider> + Send + Sync>,
    config: SchedulerConfig,
    cancel: CancellationToken,
    on_event: SchedulerEventSink,
    review_semaphore: Arc<Semaphore>,
) -> WorkerOutcome {
    if cancel.is_cancelled() {
        return WorkerOutcome::Cancelled;
    }

    let executor_provider = provider_factory(&config.executor_model);
    let mut candidate = match run_executor(
        executor_provider,
        &config.executor_model,
        config.tool_registry.clone(),
        &description,
        &cancel,
    )
    .await
    {
        Ok(c) => c,
        Err(e) => return WorkerOutcome::ExecutorError(e),
    };

    let mut attempt = 0u32;
    loop {
        on_event(SchedulerEvent::Reviewing { id: id.clone(), title: title.clone() });
        let reviewer_provider = provider_factory(&config.reviewer_model);
        let verdict = {
            let Ok(_permit) = review_semaphore.acquire().await else {
                return WorkerOutcome::ExecutorError(Error::other("review semaphore closed"));
            };
            match review::review(reviewer_provider, &config.reviewer_model, &description, &candidate, &cancel).await {
                Ok(v) => v,
                Err(e) => return WorkerOutcome::ExecutorError(e),
            }
        };

        if verdict.passed {
            return WorkerOutcome::Completed { result: candidate, review: verdict };
        }
        if !config.enable_auto_fix || attempt >= config.max_retries {
            return WorkerOutcome::ReviewFailed { verdict };
        }

        on_event(SchedulerEvent::Fixing { id: id.clone(), title: title.clone() });
        let fixer_provider = provider_factory(&config.fixer_model);
        candidate = {
            let Ok(_permit) = review_semaphore.acquire().await else {
                return WorkerOutcome::ExecutorError(Error::other("review semaphore closed"));
            };
            match review::fix(fixer_provider, &config.fixer_model, &description, &candidate, &verdict.feedback, &cancel).await {
                Ok(c) => c,
                Err(e) => return WorkerOutcome::ExecutorError(e),
            }
        };
        attempt += 1;
    }
}

fn propagate_cancellation(dag: &mut TaskDAG, failed_id: &str, ready: &mut VecDeque<String>) {
    for dependent in dag.transitive_dependents(failed_id) {
        if let Some(task) = dag.get_mut(&dependent) {
            if !matches!(
                task.status,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
            ) {
                task.status = TaskStatus::Cancelled;
            }
        }
    }
    ready.retain(|id| dag.get(id).map(|t| t.status == TaskStatus::Ready).unwrap_or(false));
}

fn cancel_all_non_terminal(dag: &mut TaskDAG) {
    let ids: Vec<String> = dag.ids_in_order().map(str::to_string).collect();
    for id in ids {
        if let Some(task) = dag.get_mut(&id) {
            if !matches!(
                task.status,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
            ) {
                task.status = TaskStatus::Cancelled;
            }
        }
    }
}

/// Walk `dag` to completion: dispatch ready tasks up to `config.max_executors`
/// at a time, review and optionally fix each candidate result, retry
/// transport-level executor failures at task granularity, and propagate
/// cancellation to the transitive dependents of any task that ultimately
/// fails.
pub async fn run(
    dag: &mut TaskDAG,
    provider_factory: Arc<dyn Fn(&str) -> Arc<dyn Provider> + Send + Sync>,
    config: &SchedulerConfig,
    cancel: CancellationToken,
    on_event: SchedulerEventSink,
) -> Result<()> {
    let semaphore = Arc::new(Semaphore::new(config.max_executors));
    let review_semaphore = Arc::new(Semaphore::new(config.max_reviewers.max(1)));
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, WorkerOutcome)>();

    let mut ready: VecDeque<String> = dag.initial_ready_set().into();
    for id in &ready {
        if let Some(task) = dag.get_mut(id) {
            task.status = TaskStatus::Ready;
        }
    }
    let mut in_flight = 0usize;

    loop {
        if cancel.is_cancelled() {
            cancel_all_non_terminal(dag);
            break;
        }
        if dag.all_terminal() {
            break;
        }

        while in_flight < config.max_executors {
            let Some(id) = ready.pop_front() else { break };
            let (title, description) = {
                let Some(task) = dag.get_mut(&id) else { continue };
                task.status = TaskStatus::Running;
                (task.title.clone(), task.description.clone())
            };
            on_event(SchedulerEvent::TaskStarted { id: id.clone(), title: title.clone() });

            in_flight += 1;
            let tx = tx.clone();
            let provider_factory = provider_factory.clone();
            let config = config.clone();
            let cancel = cancel.clone();
            let on_event = on_event.clone();
            let semaphore = semaphore.clone();
            let review_semaphore = review_semaphore.clone();
            let id_for_task = id.clone();
            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = run_one_task(
                    id_for_task.clone(),
                    title,
                    description,
                    provider_factory,
                    config,
                    cancel,
                    on_event,
                    review_semaphore,
                )
                .await;
                let _ = tx.send((id_for_task, outcome));
            });
        }

        if in_flight == 0 {
            // Acyclic by construction; nothing ready and nothing running
            // with non-terminal tasks remaining should not happen, but
            // don't spin forever if it does.
            break;
        }

        let Some((id, outcome)) = rx.recv().await else { break };
        in_flight -= 1;

        match outcome {
            WorkerOutcome::Completed { result, review } => {
                let title = if let Some(task) = dag.get_mut(&id) {
                    task.status = TaskStatus::Completed;
                    task.result = Some(result);
                    task.review = Some(review);
                    task.title.clone()
                } else {
                    continue;
                };
                on_event(SchedulerEvent::TaskCompleted { id: id.clone(), title });
                for dep in dag.newly_ready_after_completion(&id) {
                    if let Some(task) = dag.get_mut(&dep) {
                        task.status = TaskStatus::Ready;
                    }
                    ready.push_back(dep);
                }
            }
            WorkerOutcome::ReviewFailed { verdict } => {
                let title = if let Some(task) = dag.get_mut(&id) {
                    task.status = TaskStatus::Failed;
                    task.review = Some(verdict.clone());
                    task.title.clone()
                } else {
                    continue;
                };
                on_event(SchedulerEvent::ReviewFailed {
                    id: id.clone(),
                    title,
                    message: verdict.feedback.clone(),
                });
                propagate_cancellation(dag, &id, &mut ready);
            }
            WorkerOutcome::ExecutorError(e) => {
                // `attempts` counts executions *after* the first; allow a retry
                // only while the next one would still keep total executions
                // (1 initial + `attempts` retries so far + 1 more) at or under
                // `max_attempts`, so a task fails after exactly `max_attempts`
                // total executions rather than `max_attempts + 1`.
                let retry = dag
                    .get(&id)
                    .map(|t| e.is_retryable() && t.attempts + 1 < t.max_attempts)
                    .unwrap_or(false);
                if retry {
                    if let Some(task) = dag.get_mut(&id) {
                        task.attempts += 1;
                        task.status = TaskStatus::Ready;
                    }
                    ready.push_back(id.clone());
                    info!(task = %id, "executor error, retrying at task granularity");
                } else {
                    let title = if let Some(task) = dag.get_mut(&id) {
                        task.status = TaskStatus::Failed;
                        task.title.clone()
                    } else {
                        continue;
                    };
                    on_event(SchedulerEvent::TaskFailed { id: id.clone(), title, message: e.to_string() });
                    propagate_cancellation(dag, &id, &mut ready);
                }
            }
            WorkerOutcome::Cancelled => {
                if let Some(task) = dag.get_mut(&id) {
                    task.status = TaskStatus::Cancelled;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{response_to_events, EventStream, ProviderFeature};
    use crate::types::{ContentBlock, Response, StopReason, Usage};
    use crate::workflow::task::Task;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed text response, optionally failing the first
    /// `fail_times` calls with a retryable error before succeeding.
    struct ScriptedProvider {
        text: String,
        calls: Arc<AtomicUsize>,
        fail_times: usize,
    }

    impl ScriptedProvider {
        fn ok(text: &str) -> Arc<Self> {
            Arc::new(Self { text: text.to_string(), calls: Arc::new(AtomicUsize::new(0)), fail_times: 0 })
        }

        fn always_failing(calls: Arc<AtomicUsize>) -> Arc<Self> {
            Arc::new(Self { text: String::new(), calls, fail_times: usize::MAX })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn create_message(&self, _request: crate::types::Request, _cancel: CancellationToken) -> Result<Response> {
            unimplemented!()
        }

        async fn create_message_stream(
            &self,
            _request: crate::types::Request,
            _cancel: CancellationToken,
        ) -> Result<EventStream> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(Error::Timeout);
            }
            let response = Response {
                id: "r".into(),
                model: "scripted".into(),
                content: vec![ContentBlock::text(self.text.clone())],
                stop_reason: StopReason::EndTurn,
                usage: Usage::default(),
            };
            Ok(Box::pin(futures::stream::iter(response_to_events(&response).into_iter().map(Ok))))
        }

        fn name(&self) -> &str {
            "scripted"
        }
        fn supported_models(&self) -> Vec<String> {
            vec!["scripted".to_string()]
        }
        fn supports(&self, _feature: ProviderFeature) -> bool {
            true
        }
    }

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            max_executors: 2,
            max_reviewers: 2,
            max_retries: 2,
            enable_auto_fix: false,
            executor_model: "exec".to_string(),
            reviewer_model: "rev".to_string(),
            fixer_model: "fix".to_string(),
            tool_registry: Arc::new(ToolRegistry::new()),
        }
    }

    #[tokio::test]
    async fn executor_error_retries_then_fails_at_exactly_max_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let failing = ScriptedProvider::always_failing(calls.clone());
        let factory: Arc<dyn Fn(&str) -> Arc<dyn Provider> + Send + Sync> =
            Arc::new(move |_model: &str| failing.clone() as Arc<dyn Provider>);

        let mut dag = TaskDAG::new(vec![Task::new("t1", "t1", "do t1", vec![], 3)]).unwrap();
        let config = test_config();
        let on_event: SchedulerEventSink = Arc::new(|_| {});

        run(&mut dag, factory, &config, CancellationToken::new(), on_event).await.unwrap();

        assert_eq!(dag.get("t1").unwrap().status, TaskStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 3, "should run exactly max_attempts times total, not max_attempts + 1");
    }

    #[tokio::test]
    async fn review_failure_cancels_transitive_dependents_without_running_them() {
        let executor = ScriptedProvider::ok("candidate");
        let executor_calls = executor.calls.clone();
        let reviewer = ScriptedProvider::ok(r#"{"passed":false,"score":10,"issues":["nope"],"feedback":"rejected"}"#);

        let factory: Arc<dyn Fn(&str) -> Arc<dyn Provider> + Send + Sync> = Arc::new(move |model: &str| {
            if model == "rev" {
                reviewer.clone() as Arc<dyn Provider>
            } else {
                executor.clone() as Arc<dyn Provider>
            }
        });

        // a -> b, a -> c, (b, c) -> d
        let mut dag = TaskDAG::new(vec![
            Task::new("a", "a", "do a", vec![], 1),
            Task::new("b", "b", "do b", vec!["a".to_string()], 1),
            Task::new("c", "c", "do c", vec!["a".to_string()], 1),
            Task::new("d", "d", "do d", vec!["b".to_string(), "c".to_string()], 1),
        ])
        .unwrap();
        let config = test_config();
        let on_event: SchedulerEventSink = Arc::new(|_| {});

        run(&mut dag, factory, &config, CancellationToken::new(), on_event).await.unwrap();

        assert_eq!(dag.get("a").unwrap().status, TaskStatus::Failed);
        assert_eq!(dag.get("b").unwrap().status, TaskStatus::Cancelled);
        assert_eq!(dag.get("c").unwrap().status, TaskStatus::Cancelled);
        assert_eq!(dag.get("d").unwrap().status, TaskStatus::Cancelled);
        assert_eq!(executor_calls.load(Ordering::SeqCst), 1, "b and c must never reach the executor");
    }
}
