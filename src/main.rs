//! Thumbnailer - An Image Resizing Service
//!
//! This is the main entry point. Without `--server` and `--image` it runs
//! the server from a config file; with both it resizes one image against a
//! running server and writes the result to disk.

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use thumbnailer::{Client, Endpoint, Network, Server, ServerConfig};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(version, about = "Thumbnail server and client")]
struct Args {
    /// Config file for server mode
    #[arg(short, long, default_value = thumbnailer::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Server address to send the image to (client mode)
    #[arg(short, long)]
    server: Option<String>,

    /// Network of the server address (tcp or unix)
    #[arg(long, default_value = "unix")]
    network: Network,

    /// Image to resize (client mode)
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Thumbnail width
    #[arg(short = 'W', long, default_value_t = 150)]
    width: u32,

    /// Thumbnail height
    #[arg(short = 'H', long, default_value_t = 150)]
    height: u32,

    /// Where to write the thumbnail (client mode)
    #[arg(short, long, default_value = "thumbnail.jpg")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG overrides the default level
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match (args.server.as_deref(), args.image.as_deref()) {
        (None, None) => run_server(&args).await,
        (Some(server), Some(image)) => {
            let endpoint = Endpoint::new(args.network, server);
            run_client(endpoint, image, &args).await
        }
        _ => Args::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "--server and --image must be given together",
            )
            .exit(),
    }
}

async fn run_server(args: &Args) -> anyhow::Result<()> {
    let config = ServerConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    info!(
        version = thumbnailer::VERSION,
        config = %args.config.display(),
        "Starting thumbnail server"
    );

    let server = Server::bind(config).await?;

    // Set up graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    server.serve_with_shutdown(shutdown).await?;
    info!("Server shutdown complete");
    Ok(())
}

async fn run_client(endpoint: Endpoint, image: &std::path::Path, args: &Args) -> anyhow::Result<()> {
    let mut client = Client::new(endpoint);
    let thumbnail = client
        .resize_file(image, args.width, args.height)
        .await
        .with_context(|| format!("resizing {}", image.display()))?;

    tokio::fs::write(&args.output, &thumbnail)
        .await
        .with_context(|| format!("writing {}", args.output.display()))?;
    info!(
        output = %args.output.display(),
        bytes = thumbnail.len(),
        "Thumbnail written"
    );
    Ok(())
}
