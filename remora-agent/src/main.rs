//! remora agent — entry point.
//!
//! ```text
//! remora-agent                  Run in the foreground
//! remora-agent --config <path>  Load a custom config TOML
//! remora-agent --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use remora_agent::config::AgentConfig;
use remora_agent::service::AgentService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "remora-agent", about = "remora remote-desktop host agent")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "remora-agent.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&AgentConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = AgentConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("remora-agent v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "control listener: {}:{}",
        config.network.bind_addr, config.network.port
    );
    info!("initial quality: {}", config.quality.initial);
    info!("monitor: {}", config.session.monitor_index);

    let service = AgentService::new(config);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received — shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    service.run().await?;

    Ok(())
}
