use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use s3proxy::config;
use s3proxy::server;

#[derive(Parser)]
#[command(name = "s3proxy")]
#[command(version)]
#[command(about = "Serve S3 buckets as browsable file trees over HTTP", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "/etc/s3proxy/config.json")]
    config: PathBuf,

    /// Log filter, overridden by RUST_LOG when set
    #[arg(short, long, default_value = "s3proxy=info,tower_http=info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting s3proxy {} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME")
    );

    let config = config::load_config(&cli.config)?;
    server::run(config).await
}
