use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use easel_core::{loader_for, ArtifactStore, DeviceMap, Generator, Loader, DEFAULT_OUTPUT_DIR};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod error;
mod state;
mod ui;

use state::AppState;

// Define command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Easel image generation server")]
struct Args {
    /// Use CPU instead of GPU
    #[arg(long)]
    cpu: bool,

    /// Accelerator ordinal to bind the model to
    #[arg(long, default_value_t = 0)]
    device: usize,

    /// Hugging Face repository holding the Stable Diffusion weights
    #[arg(long, default_value = "runwayml/stable-diffusion-v1-5")]
    model: String,

    /// Run in full precision even on an accelerator
    #[arg(long)]
    use_f32: bool,

    /// Directory generated images are written to
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Host address to bind the server to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the server to
    #[arg(long, default_value_t = 7860)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "easel_server=info,easel_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // The model itself is loaded lazily by the first generation request.
    let loader = loader_for(
        &args.model,
        DeviceMap::from_args(args.cpu, args.device),
        args.use_f32,
    )?;
    let generator = Generator::new(loader, ArtifactStore::new(&args.output_dir));
    info!("Images will be written to {}", args.output_dir.display());

    let state = AppState::new(generator);
    let app = api::create_router(state.clone());

    // --- Start the server ---
    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address).await?;
    info!("Started server on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then release the model.
async fn shutdown_signal<L: Loader>(state: AppState<L>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
    state.generator.clear().await;
}
