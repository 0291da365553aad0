//! Multi-agent workflow orchestrator: plans a requirement into a task DAG,
//! schedules concurrent executors against it, reviews and optionally fixes
//! each result, then evaluates the whole outcome into a [`FinalReport`].

pub mod evaluator;
pub mod planner;
pub mod review;
pub mod scheduler;
pub mod task;

use std::sync::Arc;

use tracing::info;

use crate::cancel::CancellationToken;
use crate::provider::Provider;
use crate::tools::ToolRegistry;
use crate::Result;

pub use evaluator::{Evaluation, FinalReport, ReportStatus, TaskSummary};
pub use review::ReviewVerdict;
pub use task::{Task, TaskDAG, TaskStatus};

/// Per-role model overrides. Any role left unset falls back to `default`.
#[derive(Debug, Clone, Default)]
pub struct RoleModels {
    pub default: String,
    pub manager: Option<String>,
    pub executor: Option<String>,
    pub reviewer: Option<String>,
    pub fixer: Option<String>,
    pub evaluator: Option<String>,
}

impl RoleModels {
    pub fn new(default: impl Into<String>) -> Self {
        Self { default: default.into(), ..Default::default() }
    }

    fn manager(&self) -> &str {
        self.manager.as_deref().unwrap_or(&self.default)
    }
    fn executor(&self) -> &str {
        self.executor.as_deref().unwrap_or(&self.default)
    }
    fn reviewer(&self) -> &str {
        self.reviewer.as_deref().unwrap_or(&self.default)
    }
    fn fixer(&self) -> &str {
        self.fixer.as_deref().unwrap_or(self.reviewer())
    }
    fn evaluator(&self) -> &str {
        self.evaluator.as_deref().unwrap_or(&self.default)
    }
}

pub struct WorkflowConfig {
    pub max_executors: usize,
    pub max_reviewers: usize,
    pub max_retries: u32,
    pub enable_auto_fix: bool,
    pub role_models: RoleModels,
}

impl WorkflowConfig {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            max_executors: 4,
            max_reviewers: 4,
            max_retries: 3,
            enable_auto_fix: true,
            role_models: RoleModels::new(default_model),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ProgressEventType {
    Analyzing,
    PlanCreated,
    TaskStarted,
    Reviewing,
    Fixing,
    TaskCompleted,
    TaskFailed,
    ReviewFailed,
    Evaluating,
    Reporting,
    Completed,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub event_type: ProgressEventType,
    pub task_id: Option<String>,
    pub task_title: Option<String>,
    pub message: String,
}

impl ProgressEvent {
    fn new(event_type: ProgressEventType, message: impl Into<String>) -> Self {
        Self { event_type, task_id: None, task_title: None, message: message.into() }
    }

    fn for_task(event_type: ProgressEventType, id: String, title: String, message: impl Into<String>) -> Self {
        Self { event_type, task_id: Some(id), task_title: Some(title), message: message.into() }
    }
}

type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;
pub type ProviderFactory = Arc<dyn Fn(&str) -> Arc<dyn Provider> + Send + Sync>;

/// Orchestrates the planner, scheduler, and evaluator into one run over a
/// free-form requirement. One instance is reusable across requirements.
pub struct Workflow {
    provider_factory: ProviderFactory,
    tool_registry: Arc<ToolRegistry>,
    config: WorkflowConfig,
    progress: Option<ProgressCallback>,
}

impl Workflow {
    pub fn new(provider_factory: ProviderFactory, tool_registry: Arc<ToolRegistry>, config: WorkflowConfig) -> Self {
        Self { provider_factory, tool_registry, config, progress: None }
    }

    pub fn set_progress_callback(&mut self, callback: impl Fn(&ProgressEvent) + Send + Sync + 'static) {
        self.progress = Some(Arc::new(callback));
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(cb) = &self.progress {
            cb(&event);
        }
    }

    /// Run the full plan/execute/review/evaluate cycle for `requirement`.
    pub async fn run(&self, cancel: CancellationToken, requirement: &str) -> Result<FinalReport> {
        self.emit(ProgressEvent::new(ProgressEventType::Analyzing, "analyzing requirement"));
        let manager_provider = (self.provider_factory)(self.config.role_models.manager());
        let mut dag = planner::plan(
            manager_provider,
            self.config.role_models.manager(),
            requirement,
            self.config.max_retries.min(3),
            self.config.max_retries,
            &cancel,
        )
        .await?;
        info!(tasks = dag.len(), "plan created");
        self.emit(ProgressEvent::new(
            ProgressEventType::PlanCreated,
            format!("planned {} task(s)", dag.len()),
        ));

        let scheduler_config = scheduler::SchedulerConfig {
            max_executors: self.config.max_executors,
            max_reviewers: self.config.max_reviewers,
            max_retries: self.config.max_retries,
            enable_auto_fix: self.config.enable_auto_fix,
            executor_model: self.config.role_models.executor().to_string(),
            reviewer_model: self.config.role_models.reviewer().to_string(),
            fixer_model: self.config.role_models.fixer().to_string(),
            tool_registry: self.tool_registry.clone(),
        };

        let progress = self.progress.clone();
        let on_event: scheduler::SchedulerEventSink = Arc::new(move |event| {
            let Some(cb) = &progress else { return };
            let evt = match event {
                scheduler::SchedulerEvent::TaskStarted { id, title } => {
                    ProgressEvent::for_task(ProgressEventType::TaskStarted, id, title, "task started")
                }
                scheduler::SchedulerEvent::Reviewing { id, title } => {
                    ProgressEvent::for_task(ProgressEventType::Reviewing, id, title, "reviewing result")
                }
                scheduler::SchedulerEvent::Fixing { id, title } => {
                    ProgressEvent::for_task(ProgressEventType::Fixing, id, title, "fixing result")
                }
                scheduler::SchedulerEvent::TaskCompleted { id, title } => {
                    ProgressEvent::for_task(ProgressEventType::TaskCompleted, id, title, "task completed")
                }
                scheduler::SchedulerEvent::TaskFailed { id, title, message } => {
                    ProgressEvent::for_task(ProgressEventType::TaskFailed, id, title, message)
                }
                scheduler::SchedulerEvent::ReviewFailed { id, title, message } => {
                    ProgressEvent::for_task(ProgressEventType::ReviewFailed, id, title, message)
                }
            };
            cb(&evt);
        });

        scheduler::run(&mut dag, self.provider_factory.clone(), &scheduler_config, cancel.clone(), on_event).await?;

        self.emit(ProgressEvent::new(ProgressEventType::Evaluating, "evaluating outcome"));
        let evaluator_provider = (self.provider_factory)(self.config.role_models.evaluator());
        let report = evaluator::evaluate(
            evaluator_provider,
            self.config.role_models.evaluator(),
            requirement,
            &dag,
            &cancel,
        )
        .await?;

        self.emit(ProgressEvent::new(ProgressEventType::Reporting, report.conclusion.clone()));
        self.emit(ProgressEvent::new(ProgressEventType::Completed, "workflow finished"));

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{response_to_events, EventStream, ProviderFeature};
    use crate::types::{ContentBlock, Response, StopReason, Usage};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A provider that returns one scripted text response per call,
    /// regardless of model, cycling through a fixed script.
    struct ScriptedProvider {
        script: Mutex<VecDeque<String>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<&str>) -> Self {
            Self { script: Mutex::new(responses.into_iter().map(str::to_string).collect()) }
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
            let text = self.script.lock().unwrap().pop_front().unwrap_or_default();
            let response = Response {
                id: "r".into(),
                model: "scripted".into(),
                content: vec![ContentBlock::text(text)],
                stop_reason: StopReason::EndTurn,
                usage: Usage::default(),
            };
            let events = response_to_events(&response);
            Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
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

    #[tokio::test]
    async fn test_two_task_workflow_succeeds() {
        let plan = r#"{"tasks":[{"id":"t1","title":"first","description":"do first","dependencies":[]},{"id":"t2","title":"second","description":"do second","dependencies":["t1"]}]}"#;
        let responses = vec![
            plan,               // planner
            "result 1",         // t1 executor
            r#"{"passed":true,"score":90,"issues":[],"feedback":"ok"}"#, // t1 review
            "result 2",         // t2 executor
            r#"{"passed":true,"score":90,"issues":[],"feedback":"ok"}"#, // t2 review
            r#"{"meets_requirement":true,"quality_score":95,"strengths":[],"weaknesses":[],"suggestions":[]}"#, // evaluator
        ];
        let provider = Arc::new(ScriptedProvider::new(responses));
        let factory: ProviderFactory = Arc::new(move |_model| provider.clone());
        let workflow = Workflow::new(factory, Arc::new(ToolRegistry::new()), WorkflowConfig::new("scripted"));

        let report = workflow.run(CancellationToken::new(), "build two things").await.unwrap();
        assert_eq!(report.status, ReportStatus::Success);
        assert_eq!(report.task_summaries.len(), 2);
        assert!(report.task_summaries.iter().all(|t| t.status == TaskStatus::Completed));
    }

    #[test]
    fn test_role_models_fallback_chain() {
        let roles = RoleModels::new("base");
        assert_eq!(roles.executor(), "base");
        assert_eq!(roles.fixer(), "base");
    }
}
