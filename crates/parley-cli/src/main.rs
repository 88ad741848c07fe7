//! parley command-line entrypoint.
//!
//! Three long-running processes share one settings file:
//!
//! - `parley gateway` -- webhook ingress + media host
//! - `parley worker` -- inbound stream consumer (supervisor runtime)
//! - `parley dispatcher` -- outbound stream consumer (delivery)
//! - `parley all` -- all three in one process, for local development

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_gateway::GatewayState;
use parley_runtime::{build_dispatcher, build_worker};
use parley_stream::{InboundPublisher, RedisStreams};
use parley_types::Settings;

#[derive(Parser)]
#[command(
    name = "parley",
    version,
    about = "Multi-channel conversational gateway"
)]
struct Cli {
    /// Path to the TOML settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook ingress and media host.
    Gateway,
    /// Run the inbound stream worker.
    Worker,
    /// Run the outbound dispatcher.
    Dispatcher,
    /// Run gateway, worker, and dispatcher in one process.
    All,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Arc::new(
        Settings::load(cli.config.as_deref()).context("failed to load settings")?,
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    match cli.command {
        Command::Gateway => run_gateway(settings, cancel).await,
        Command::Worker => {
            let worker = build_worker(settings).await?;
            worker.start(cancel).await?;
            Ok(())
        }
        Command::Dispatcher => {
            let dispatcher = build_dispatcher(settings).await?;
            dispatcher.start(cancel).await?;
            Ok(())
        }
        Command::All => {
            let worker = build_worker(settings.clone()).await?;
            let dispatcher = build_dispatcher(settings.clone()).await?;

            let gateway = run_gateway(settings, cancel.clone());
            let worker_loop = worker.start(cancel.clone());
            let dispatcher_loop = dispatcher.start(cancel);

            let (gateway_result, worker_result, dispatcher_result) =
                tokio::join!(gateway, worker_loop, dispatcher_loop);
            gateway_result?;
            worker_result?;
            dispatcher_result?;
            Ok(())
        }
    }
}

async fn run_gateway(settings: Arc<Settings>, cancel: CancellationToken) -> anyhow::Result<()> {
    let streams = RedisStreams::connect(&settings.redis_url)
        .await
        .context("failed to connect to redis")?;
    let publisher = Arc::new(InboundPublisher::new(
        Arc::new(streams),
        settings.redis_stream_inbound.clone(),
    ));
    let bind_addr = settings.bind_addr.clone();
    let state = GatewayState {
        settings,
        publisher,
    };
    parley_gateway::serve(state, &bind_addr, cancel)
        .await
        .context("gateway server failed")?;
    Ok(())
}
