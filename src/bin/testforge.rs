//! testforge CLI: operator interface to the provisioning engine.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use testforge_rs::config::Config;
use testforge_rs::engine::{
    CleanupConfig, CleanupPipeline, ExecutionQueue, GenerationPipeline, QueueConfig,
};
use testforge_rs::model::ProjectId;
use testforge_rs::process::ProcessRunner;
use testforge_rs::store::{PgProjectStore, ProjectStore};
use testforge_rs::template::TemplateRenderer;
use testforge_rs::telemetry::{TelemetryConfig, init_telemetry};
use testforge_rs::workspace::WorkspaceManager;

#[derive(Parser)]
#[command(name = "testforge", about = "Provision generated API test workspaces")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sweep orphans, then generate PENDING projects as they appear
    Serve {
        /// Seconds between store polls
        #[arg(long, default_value_t = 5)]
        poll_secs: u64,
        /// Priority given to projects picked up from the store
        #[arg(long, default_value_t = 1)]
        priority: u32,
    },
    /// Generate one stored project synchronously
    Generate {
        /// Project ID (UUID)
        id: String,
    },
    /// Workspace directory operations
    Workspace {
        #[command(subcommand)]
        action: WorkspaceAction,
    },
    /// Clean up projects stuck in PENDING
    SweepOrphans,
}

#[derive(Subcommand)]
enum WorkspaceAction {
    /// Create a workspace directory
    Create { name: String },
    /// Delete a workspace directory (missing is fine)
    Delete { name: String },
    /// Report whether a workspace exists
    Exists { name: String },
}

/// Everything the engine needs, wired once.
struct Services {
    store: Arc<dyn ProjectStore>,
    cleanup: Arc<CleanupPipeline>,
    pipeline: Arc<GenerationPipeline>,
}

impl Services {
    async fn connect(config: &Config) -> anyhow::Result<Self> {
        let url = config.require_database_url()?;
        let store = PgProjectStore::connect(url.expose_secret()).await?;
        store.health_check().await?;
        let store: Arc<dyn ProjectStore> = Arc::new(store);

        let workspaces = Arc::new(WorkspaceManager::new(&config.workspaces_root));
        let templates = Arc::new(TemplateRenderer::new()?);
        let cleanup = Arc::new(CleanupPipeline::new(
            Arc::clone(&workspaces),
            Arc::clone(&store),
            Arc::clone(&templates),
            CleanupConfig::default(),
        ));
        let pipeline = Arc::new(GenerationPipeline::new(
            workspaces,
            Arc::new(ProcessRunner),
            Arc::clone(&store),
            Arc::clone(&cleanup),
            templates,
            config.toolchain.clone(),
        ));

        Ok(Self {
            store,
            cleanup,
            pipeline,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "testforge".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    match cli.command {
        Command::Serve {
            poll_secs,
            priority,
        } => cmd_serve(&config, Duration::from_secs(poll_secs), priority).await,
        Command::Generate { id } => cmd_generate(&config, &id).await,
        Command::Workspace { action } => cmd_workspace(&config, action).await,
        Command::SweepOrphans => {
            let services = Services::connect(&config).await?;
            let swept = services.cleanup.sweep_orphans().await?;
            println!("Swept {swept} orphaned project(s).");
            Ok(())
        }
    }
}

async fn cmd_serve(config: &Config, poll_interval: Duration, priority: u32) -> anyhow::Result<()> {
    let services = Services::connect(config).await?;

    // Anything PENDING from a previous run that is old enough is abandoned.
    let swept = services.cleanup.sweep_orphans().await?;
    tracing::info!(swept, "startup orphan sweep finished");

    let queue = ExecutionQueue::new(
        services.pipeline.clone(),
        Arc::clone(&services.store),
        QueueConfig::default(),
    );

    tracing::info!(root = %config.workspaces_root.display(), "serving");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let dropped = queue.clear();
                tracing::info!(dropped, "shutting down, waiting for the running attempt");
                queue.wait_idle().await;
                return Ok(());
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }

        match services.store.list_pending().await {
            Ok(pending) => {
                // A record reset to PENDING after finishing is picked up again.
                for project in pending {
                    if !queue.is_tracked(project.id) {
                        queue.enqueue(project, priority);
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to list pending projects"),
        }
    }
}

async fn cmd_generate(config: &Config, id: &str) -> anyhow::Result<()> {
    let id = ProjectId(uuid::Uuid::parse_str(id)?);
    let services = Services::connect(config).await?;
    let project = services.store.get(id).await?;

    services.pipeline.generate_project(&project).await?;
    println!("{} is READY", project.name);
    Ok(())
}

async fn cmd_workspace(config: &Config, action: WorkspaceAction) -> anyhow::Result<()> {
    let workspaces = WorkspaceManager::new(&config.workspaces_root);
    match action {
        WorkspaceAction::Create { name } => {
            let path = workspaces.create_workspace(&name).await?;
            println!("Created: {}", path.display());
        }
        WorkspaceAction::Delete { name } => {
            workspaces.delete_workspace(&name).await?;
            println!("Deleted: {name}");
        }
        WorkspaceAction::Exists { name } => {
            let exists = workspaces.workspace_exists(&name).await?;
            println!("{name}: {}", if exists { "exists" } else { "absent" });
        }
    }
    Ok(())
}
