//! relayd — the event-routing runtime daemon.
//!
//! Loads the project config, brings up the runtime (bus, scheduler,
//! webhook ingress, control API), and runs until a signal or a
//! `POST /control/shutdown`.

use clap::Parser;
use tracing::info;

use relay_core::config::ProjectConfig;
use relay_runtime::Runtime;

/// Declarative event-routing runtime.
#[derive(Parser, Debug)]
#[command(name = "relayd", version, about)]
struct Cli {
    /// Path to the project config file.
    #[arg(long, env = "RELAY_CONFIG", default_value = "relay.yml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ProjectConfig::from_file(&cli.config)?;

    let runtime = Runtime::start_with_config(config, relay_plugins::default_registry()).await?;
    info!("relayd started");

    runtime.run_until_shutdown().await?;
    info!("relayd exited cleanly");
    Ok(())
}
