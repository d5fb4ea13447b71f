mod face;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use saas_explorer::{
    ActPlanner, ChromeLauncher, ExploreTarget, Orchestrator, OutputStore, ProgressRegistry,
    Settings, spawn_sweeper,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "explorer", version, about = "Explore SaaS sites and capture them for documentation")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, env = "EXPLORER_LOG_JSON")]
    log_json: bool,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        #[arg(long, env = "EXPLORER_BIND", default_value = "127.0.0.1:3000")]
        bind: SocketAddr,
    },
    /// Explore one site and exit.
    Run {
        url: String,
        #[arg(long)]
        platform: Option<String>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_orchestrator(settings: &Settings) -> Result<Arc<Orchestrator>> {
    let config = settings.explorer();
    let planner = settings.planner().map(ActPlanner::new).transpose()?;
    match &planner {
        Some(p) => info!(model = p.model(), "AI actions enabled"),
        None => warn!("OPENAI_API_KEY not set, AI actions will be skipped"),
    }
    let launcher = ChromeLauncher::new(settings.chrome(), planner);
    let store = OutputStore::new(&config.output_dir)?;
    info!(output_dir = %store.root().display(), "output directory");
    Ok(Arc::new(Orchestrator::new(
        Arc::new(launcher),
        ProgressRegistry::new(),
        store,
        config,
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let orchestrator = build_orchestrator(&cli.settings)?;
    let config = cli.settings.explorer();

    match cli.command {
        Command::Serve { bind } => {
            let shutdown = CancellationToken::new();
            let sweeper = spawn_sweeper(
                orchestrator.registry().clone(),
                orchestrator.store().clone(),
                config.sweep_interval,
                config.retention,
                shutdown.clone(),
            );
            {
                let shutdown = shutdown.clone();
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("shutting down");
                        for session in orchestrator.registry().list() {
                            orchestrator.cancel(&session.session_id);
                        }
                        shutdown.cancel();
                    }
                });
            }
            let state = face::AppState {
                orchestrator: Arc::clone(&orchestrator),
            };
            face::serve(state, bind, shutdown.clone()).await?;
            shutdown.cancel();
            sweeper.await.ok();
        }
        Command::Run { url, platform } => {
            let target = ExploreTarget::parse(&url, platform.as_deref())?;
            {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("interrupted, cancelling exploration");
                        for session in orchestrator.registry().list() {
                            orchestrator.cancel(&session.session_id);
                        }
                    }
                });
            }

            let result = orchestrator.run(target).await;
            let report = orchestrator
                .store()
                .root()
                .join(format!("{}.json", result.session_id));
            for phase in &result.phases {
                match &phase.error {
                    Some(e) => println!("{:<32} error: {e}", phase.task_name),
                    None => println!("{:<32} {} steps", phase.task_name, phase.results.len()),
                }
            }
            println!(
                "{} screenshots ({} after sign-in), report: {}",
                result.screenshots.len() + result.post_auth_screenshots.len(),
                result.post_auth_screenshots.len(),
                report.display()
            );
            if !result.success {
                bail!(
                    "exploration failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    Ok(())
}
