use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info};

use expert_swap::cache::swapper::{SwapError, Swapper};
use expert_swap::config::{Cli, Command, Config, WorkloadConfig};
use expert_swap::server::stats_api::{build_router, AppState};
use expert_swap::workload::{self, WorkloadReport};

type WorkloadResult = Result<WorkloadReport, SwapError>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "expert_swap=debug,tower_http=debug"
    } else {
        "expert_swap=info,tower_http=info"
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("expert-swap v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;

    info!(
        storage_dir = %config.swap.storage_dir.display(),
        max_memory_experts = config.swap.max_memory_experts,
        io_workers = config.swap.io_workers,
        zstd = config.swap.compression.zstd_compression,
        "Configuration loaded"
    );

    match cli.command {
        Command::Run { rounds } => {
            if let Some(rounds) = rounds {
                config.workload.rounds = rounds;
            }
            let swapper = Swapper::new(config.swap.clone())?;
            let report = spawn_workload(swapper, config.workload.clone())?.await??;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Serve { listen } => {
            let listen_addr = listen.unwrap_or_else(|| config.server.listen.clone());

            let swapper = Swapper::new(config.swap.clone())?;
            let state = Arc::new(AppState::new(swapper.metrics().clone()));
            info!(run_id = %state.run_id, "Starting workload");

            let done = spawn_workload(swapper, config.workload.clone())?;
            let publisher = state.clone();
            tokio::spawn(async move {
                match done.await {
                    Ok(Ok(report)) => *publisher.report.write().await = Some(report),
                    Ok(Err(e)) => error!(error = %e, "Workload failed"),
                    Err(_) => error!("Workload thread exited without a result"),
                }
            });

            // Build the HTTP router and start the server.
            let app = build_router(state);
            let listener = TcpListener::bind(&listen_addr).await?;
            info!("Listening on {listen_addr}");

            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Shutting down");
                })
                .await?;
        }
    }

    Ok(())
}

/// Seed and replay the workload on a dedicated thread.
///
/// The swapper owns a worker runtime and blocks on I/O, so it never runs on
/// (or is dropped from) the async executor.
fn spawn_workload(
    mut swapper: Swapper,
    plan: WorkloadConfig,
) -> std::io::Result<oneshot::Receiver<WorkloadResult>> {
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("expert-workload".to_string())
        .spawn(move || {
            let result = workload::seed_experts(&mut swapper, &plan)
                .and_then(|()| workload::run(&mut swapper, &plan));
            let closed = swapper.shutdown();
            let _ = tx.send(result.and_then(|report| closed.map(|()| report)));
        })?;
    Ok(rx)
}
