/// RKE2 cluster control plane: CLI entrypoint wiring the HTTP façade to the
/// durable task scheduler.
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use controlplane::cloudapi::KamateraClient;
use controlplane::config::Cnf;
use controlplane::engine::EngineContext;
use controlplane::settings::Settings;
use controlplane::ssh::RealSshExecutor;
use controlplane::tasks::{InMemoryTaskStore, Scheduler};
use controlplane::web;
use controlplane::web::state::AppState;

#[derive(Parser)]
#[command(name = "controlplane")]
#[command(about = "Provision and maintain RKE2 Kubernetes clusters", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP façade and the background task workers
    Serve,

    /// Load and validate a cluster config file, then exit
    Validate {
        /// Path to the config file (.json/.yaml/.yml) or literal YAML text
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("controlplane={}", settings.log_level).into());
    let registry = tracing_subscriber::registry().with(env_filter);
    if settings.log_format_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    match cli.command {
        Commands::Serve => serve(settings).await,
        Commands::Validate { config } => validate(&config, &settings),
    }
}

fn validate(config: &str, settings: &Settings) -> Result<()> {
    // A config file need not embed credentials; fall back to the process
    // environment the same way a real cloud-API call would, per the
    // module-level-credential-globals design note.
    let cnf = match settings.default_creds() {
        Some(creds) => Cnf::load_with_creds(config, creds),
        None => Cnf::load(config),
    }
    .context("failed to load config")?;
    info!(
        cluster = %cnf.cluster.name,
        pools = cnf.node_pools().len(),
        "configuration is valid"
    );
    Ok(())
}

async fn serve(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);
    let store = Arc::new(InMemoryTaskStore::new());
    let scheduler = Arc::new(Scheduler::new(store, 1024));

    let cloud = Arc::new(KamateraClient::new(settings.kamatera_api_server.clone())?);
    let ssh = Arc::new(RealSshExecutor);

    let worker_context = {
        let settings = settings.clone();
        let cloud = cloud.clone();
        let ssh = ssh.clone();
        let spawner = scheduler.handle.clone();
        move || EngineContext {
            cloud: cloud.clone(),
            ssh: ssh.clone(),
            settings: settings.clone(),
            spawner: Arc::new(spawner.clone()),
        }
    };
    scheduler.spawn_workers(settings.task_worker_count, worker_context);

    info!(bind = %settings.http_bind, workers = settings.task_worker_count, "starting control plane");

    let state = AppState {
        spawner: Arc::new(scheduler.handle.clone()),
        settings,
    };
    web::start_server(state).await.context("HTTP server failed")
}
