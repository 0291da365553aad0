//! CLI entry point: a single-turn `query` command and a multi-agent
//! `workflow` command over the same provider/model resolution rules the
//! library uses everywhere else.

use std::io::Write;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use open_agent::provider::http::HttpProvider;
use open_agent::provider::subprocess::{DefaultCliCommandBuilder, SubprocessProvider};
use open_agent::provider::Provider;
use open_agent::workflow::{ProgressEvent, ProviderFactory, RoleModels, Workflow, WorkflowConfig};
use open_agent::{
    AgentLoopEngine, CancellationToken, Callbacks, EngineConfig, Error, ProviderKind, Session,
    ToolRegistry,
};

#[derive(Parser)]
#[command(name = "open-agent", about = "Agentic coding assistant over local or hosted LLM backends")]
struct Cli {
    /// Base URL for HTTP-backed providers. Falls back to OPEN_AGENT_BASE_URL, then the
    /// provider default, then LM Studio's default port.
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Model name. Falls back to OPEN_AGENT_MODEL.
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single conversational turn and stream the response to stdout.
    Query { prompt: String },

    /// Plan a requirement into tasks, execute them concurrently, review and
    /// evaluate the outcome.
    Workflow {
        requirement: String,

        #[arg(long, default_value_t = 4)]
        max_executors: usize,

        #[arg(long, default_value_t = 4)]
        max_reviewers: usize,

        #[arg(long, default_value_t = 3)]
        max_retries: u32,

        /// Disable the automatic fix-and-re-review loop on review failure.
        #[arg(long)]
        no_auto_fix: bool,

        #[arg(long)]
        manager_model: Option<String>,
        #[arg(long)]
        executor_model: Option<String>,
        #[arg(long)]
        reviewer_model: Option<String>,
        #[arg(long)]
        fixer_model: Option<String>,
        #[arg(long)]
        evaluator_model: Option<String>,
    },
}

fn build_provider(model: &str, base_url: &str) -> Arc<dyn Provider> {
    match open_agent::detect_provider_from_model(model) {
        ProviderKind::Subprocess => {
            Arc::new(SubprocessProvider::new(model.to_string(), Box::new(DefaultCliCommandBuilder)))
        }
        ProviderKind::Http => Arc::new(HttpProvider::new(
            model.to_string(),
            base_url.to_string(),
            open_agent::get_api_key(),
        )),
    }
}

fn print_progress(event: &ProgressEvent) {
    tracing::info!(
        event_type = ?event.event_type,
        task_id = ?event.task_id,
        "{}",
        event.message
    );
}

#[tokio::main]
async fn main() -> open_agent::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let base_url = open_agent::get_base_url(None, cli.base_url.as_deref());
    let model = open_agent::get_model(cli.model.as_deref(), true).ok_or_else(|| {
        Error::config("no model specified: pass --model or set OPEN_AGENT_MODEL")
    })?;

    match cli.command {
        Command::Query { prompt } => {
            let provider = build_provider(&model, &base_url);
            let session = Arc::new(Session::new(".", &model));
            let registry = Arc::new(ToolRegistry::new());

            let mut engine = AgentLoopEngine::new(EngineConfig::new(provider, registry, session));
            engine.set_callbacks(Callbacks::new().on_text(|text| {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }));

            engine.run(CancellationToken::new(), &prompt).await?;
            println!();
        }

        Command::Workflow {
            requirement,
            max_executors,
            max_reviewers,
            max_retries,
            no_auto_fix,
            manager_model,
            executor_model,
            reviewer_model,
            fixer_model,
            evaluator_model,
        } => {
            let base_url_for_factory = base_url.clone();
            let provider_factory: ProviderFactory =
                Arc::new(move |m: &str| build_provider(m, &base_url_for_factory));

            let mut role_models = RoleModels::new(model.clone());
            role_models.manager = manager_model;
            role_models.executor = executor_model;
            role_models.reviewer = reviewer_model;
            role_models.fixer = fixer_model;
            role_models.evaluator = evaluator_model;

            let config = WorkflowConfig {
                max_executors,
                max_reviewers,
                max_retries,
                enable_auto_fix: !no_auto_fix,
                role_models,
            };

            let mut workflow = Workflow::new(provider_factory, Arc::new(ToolRegistry::new()), config);
            workflow.set_progress_callback(print_progress);

            let report = workflow.run(CancellationToken::new(), &requirement).await?;
            println!("status: {:?}", report.status);
            for task in &report.task_summaries {
                println!("  {} [{}]: {:?}", task.id, task.title, task.status);
            }
            println!("{}", report.conclusion);
        }
    }

    Ok(())
}
