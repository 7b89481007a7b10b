use clap::Parser;
use std::path::PathBuf;

use edge_router::config::{load_config, validate_config, ProxyConfig};
use edge_router::lifecycle;
use edge_router::observability::logging;

#[derive(Parser)]
#[command(name = "edge-router", version, about = "Registry-driven HTTP and TCP+SNI router")]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => {
            let config = ProxyConfig::default();
            if let Err(errors) = validate_config(&config) {
                for error in &errors {
                    eprintln!("{}", error);
                }
                return Err("invalid default configuration".into());
            }
            config
        }
    };

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-router starting");
    tracing::info!("Runtime config\n{}", serde_json::to_string_pretty(&config)?);

    if let Err(e) = lifecycle::run(config).await {
        tracing::error!(error = %e, "Fatal");
        return Err(e.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
