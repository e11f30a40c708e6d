use std::path::PathBuf;

use clap::Parser;
use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use daydreamer_mcp_server::runtime;
use daydreamer_mcp_server::server::Server;
use tracing::info;

/// Clap styling
const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

/// Arguments to the MCP gateway
#[derive(Debug, Parser)]
#[command(
    version,
    styles = STYLES,
    about = "DayDreamer MCP gateway - graph memory over SSE for conversational AI clients",
)]
struct Args {
    /// Path to an optional YAML config file; the environment always wins
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match args.config {
        Some(path) => runtime::read_config(path)?,
        None => runtime::read_config_from_env().unwrap_or_default(),
    };

    let _guard = runtime::logging::init(&config)?;

    info!(
        "DayDreamer MCP Server v{} // graph memory gateway // V6 schema",
        env!("CARGO_PKG_VERSION")
    );

    Ok(Server::builder().config(config).build().start().await?)
}
