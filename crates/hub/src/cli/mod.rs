pub mod config;

use clap::{Parser, Subcommand};

/// Axle — a hub brokering skill calls between a controller and its devices.
#[derive(Debug, Parser)]
#[command(name = "axle", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the hub server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `AXLE_CONFIG` (or
/// `axle.toml` by default).  Returns the parsed [`Config`] and the path
/// that was used. A missing file yields the built-in defaults.
pub fn load_config() -> anyhow::Result<(ax_domain::config::Config, String)> {
    let config_path = std::env::var("AXLE_CONFIG").unwrap_or_else(|_| "axle.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        ax_domain::config::Config::default()
    };

    Ok((config, config_path))
}
