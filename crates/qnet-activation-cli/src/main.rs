//! `qnet-activate`: operator tool for QNet node activation.
//!
//! Quotes, phase resolution, credential validation and status watching against the
//! verification service and the target-network registry. It never signs or pays.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod output;

use crate::commands::{Command, CommandContext};
use crate::config::CliConfig;
use crate::output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "qnet-activate", version, about = "QNet node activation inspection tool")]
struct Cli {
    /// Configuration file (toml, yaml or json)
    #[arg(short, long, env = "QNET_ACTIVATION_CONFIG")]
    config: Option<PathBuf>,

    /// Verification service base URL
    #[arg(long, env = "QNET_BRIDGE_URL")]
    bridge_url: Option<String>,

    /// Target-network registry base URL
    #[arg(long, env = "QNET_NETWORK_URL")]
    network_url: Option<String>,

    /// Log level or filter directive; RUST_LOG takes precedence
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Output format for command results
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Flags win over file and environment configuration.
    fn apply_overrides(&self, config: &mut CliConfig) {
        if let Some(url) = &self.bridge_url {
            config.bridge_url = url.clone();
        }
        if let Some(url) = &self.network_url {
            config.network_url = url.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json = true;
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    // Logs go to stderr so command output on stdout stays parseable.
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = CliConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply_overrides(&mut config);
    init_tracing(&config.logging.level, config.logging.json);

    tracing::debug!(
        bridge = %config.bridge_url,
        network = %config.network_url,
        "configuration loaded"
    );

    let ctx = CommandContext::new(config, cli.output)?;
    commands::execute(cli.command, &ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use qnet_activation_core::{NodeClass, Phase};

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_offline_quote_arguments() {
        let cli = Cli::try_parse_from([
            "qnet-activate",
            "quote",
            "full",
            "--network-size",
            "500000",
            "--phase",
            "2",
        ])
        .unwrap();

        match cli.command {
            Command::Quote(args) => {
                assert_eq!(args.class, NodeClass::Full);
                assert_eq!(args.network_size, Some(500_000));
                assert_eq!(args.phase, Some(Phase::Two));
                assert_eq!(args.burned, None);
            }
            other => panic!("expected quote, got {other:?}"),
        }
    }

    #[test]
    fn test_flags_override_loaded_config() {
        let cli = Cli::try_parse_from([
            "qnet-activate",
            "--bridge-url",
            "https://bridge.qnet.example",
            "--json-logs",
            "--output",
            "json",
            "health",
        ])
        .unwrap();

        let mut config = CliConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.bridge_url, "https://bridge.qnet.example");
        assert_eq!(config.network_url, CliConfig::default().network_url);
        assert!(config.logging.json);
        assert_eq!(cli.output, OutputFormat::Json);
    }

    #[test]
    fn test_watch_arguments() {
        let cli = Cli::try_parse_from([
            "qnet-activate",
            "watch",
            "QNET-F1A2B3-C4D5E6-X9Y83K",
            "--max-attempts",
            "12",
            "--interval-ms",
            "250",
        ])
        .unwrap();

        match cli.command {
            Command::Watch(args) => {
                assert_eq!(args.code, "QNET-F1A2B3-C4D5E6-X9Y83K");
                assert_eq!(args.max_attempts, Some(12));
                assert_eq!(args.interval_ms, Some(250));
            }
            other => panic!("expected watch, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_node_class_is_rejected() {
        assert!(Cli::try_parse_from(["qnet-activate", "pricing", "mega"]).is_err());
    }
}
