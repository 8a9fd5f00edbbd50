//! mtag - music tagging job engine
//!
//! One binary for every role: worker pool, stale sweep, review API, seeding
//! and one-shot review actions from the shell.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mtag_common::TaggerConfig;
use mtag_worker::models::JobId;
use mtag_worker::workflow::{run_sweep_loop, sweep_stale};
use mtag_worker::{build_router, Engine};

/// Command-line arguments for mtag
#[derive(Parser, Debug)]
#[command(name = "mtag")]
#[command(about = "Fingerprint, match and tag a music library")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "MTAG_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the job database
    #[arg(long, env = "MTAG_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Workers, sweep and review API together
    Run,
    /// Workers and sweep only
    Work,
    /// Review API only
    Serve,
    /// Queue music files for analysis
    Seed {
        /// Only seed this artist folder under the music directory
        #[arg(long)]
        artist: Option<String>,
        /// Report what would be queued without writing anything
        #[arg(long)]
        dry_run: bool,
        /// Music library root
        #[arg(long, env = "MTAG_MUSIC_DIR")]
        music_dir: Option<PathBuf>,
    },
    /// Print job counts per queue
    Stats,
    /// Approve jobs waiting for review
    Approve {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Reject jobs waiting for review
    Reject {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Send failed jobs back to analysis
    Retry {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Run one stale-claim sweep and exit
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TaggerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!(
                "mtag={level},mtag_worker={level},mtag_common={level},tower_http=info",
                level = config.log_level
            )
            .into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "mtag v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data directory {}", config.data_dir.display()))?;
    info!("Database: {}", config.database_path().display());

    if let Command::Seed { music_dir: Some(dir), .. } = &args.command {
        config.music_dir = dir.clone();
    }

    let engine = Engine::open(config).await.context("Failed to open job engine")?;

    match args.command {
        Command::Run => run(&engine, true, true).await,
        Command::Work => run(&engine, true, false).await,
        Command::Serve => run(&engine, false, true).await,
        Command::Seed { artist, dry_run, .. } => {
            let summary = engine
                .producer
                .seed(&engine.config.music_dir, artist.as_deref(), dry_run)
                .await
                .context("Seeding failed")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Stats => {
            let stats = engine.store.queue_stats().await.context("Failed to read stats")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Approve { ids } => {
            let count = engine.producer.approve_many(&job_ids(&ids)).await?;
            println!("approved {} of {}", count, ids.len());
            Ok(())
        }
        Command::Reject { ids } => {
            let count = engine.producer.reject_many(&job_ids(&ids)).await?;
            println!("rejected {} of {}", count, ids.len());
            Ok(())
        }
        Command::Retry { ids } => {
            for id in job_ids(&ids) {
                engine
                    .producer
                    .retry(id)
                    .await
                    .with_context(|| format!("Retry of job {} failed", id))?;
            }
            println!("retried {}", ids.len());
            Ok(())
        }
        Command::Sweep => {
            let report = sweep_stale(&engine.store, engine.dispatcher.as_ref(), engine.config.stale_after())
                .await
                .context("Sweep failed")?;
            println!(
                "recovered {}, redelivered {}",
                report.recovered, report.redelivered
            );
            Ok(())
        }
    }
}

/// Long-running roles; returns after a shutdown signal once workers have stopped
async fn run(engine: &Engine, workers: bool, api: bool) -> Result<()> {
    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    if workers {
        handles.extend(engine.workers.spawn(shutdown.clone()));
        handles.push(tokio::spawn(run_sweep_loop(
            engine.store.clone(),
            engine.dispatcher.clone(),
            engine.config.sweep_interval(),
            engine.config.stale_after(),
            shutdown.clone(),
        )));
    }

    if api {
        let app = build_router(engine.app_state());
        let listener = tokio::net::TcpListener::bind(&engine.config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", engine.config.bind_addr))?;
        info!("Review API listening on http://{}", engine.config.bind_addr);

        let server_shutdown = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                server_shutdown.cancel();
            })
            .await
            .context("Server error")?;
    } else {
        shutdown_signal().await;
        shutdown.cancel();
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Task ended abnormally");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

fn job_ids(ids: &[i64]) -> Vec<JobId> {
    ids.iter().copied().map(JobId).collect()
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
