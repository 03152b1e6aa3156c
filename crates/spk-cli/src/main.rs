//! Speaker Gateway CLI
//!
//! Run the speaker gateway against a configured speaker server, or run a
//! device echo server for bench testing.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use spk_gateway::{GatewayConfig, ServerType};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod server;
mod service;

/// Speaker gateway - drives PA/intercom speaker zones from JSON commands
#[derive(Parser, Debug)]
#[command(name = "spk-gateway")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Shorthand for --log-level debug
    #[arg(short, long, global = true)]
    debug: bool,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Speaker server selection; every flag also reads its environment variable
#[derive(Args, Debug, Default, Clone, PartialEq)]
struct ServerArgs {
    /// Server type (spon, bosch, adam)
    #[arg(long = "svr-type", env = "SVR_TYPE")]
    server_type: Option<String>,

    /// Speaker server URL, e.g. tcp://10.0.0.5:2048
    #[arg(long = "spk-svr", env = "SPK_SVR")]
    server_url: Option<String>,

    /// Seconds before an AUTO action is released
    #[arg(long, env = "RELEASE_TIME")]
    release_time: Option<u64>,

    /// Login user (bosch)
    #[arg(long, env = "SVR_USER")]
    user: Option<String>,

    /// Login password (bosch)
    #[arg(long, env = "SVR_PASSWD", hide_env_values = true)]
    passwd: Option<String>,

    /// Service queue id
    #[arg(long, env = "SVC_QID")]
    qid: Option<u32>,
}

impl ServerArgs {
    /// Overlay explicitly given values on top of `config`
    fn apply(self, config: &mut GatewayConfig) {
        if let Some(server_type) = self.server_type {
            config.server_type = ServerType::from_name(&server_type);
        }
        if let Some(server_url) = self.server_url {
            config.server_url = server_url;
        }
        if let Some(release_time) = self.release_time {
            config.release_time = release_time;
        }
        if let Some(user) = self.user {
            config.user = user;
        }
        if let Some(passwd) = self.passwd {
            config.passwd = passwd;
        }
        if let Some(qid) = self.qid {
            config.qid = qid;
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gateway: JSON commands on stdin, state changes on stdout
    Run {
        #[command(flatten)]
        server: ServerArgs,
    },

    /// Start an echo server standing in for a speaker server
    Echo {
        /// Protocol to serve (tcp, udp)
        #[arg(short, long, default_value = "tcp")]
        protocol: String,

        /// Bind address
        #[arg(short, long, default_value = "0.0.0.0")]
        bind: String,

        /// Port number
        #[arg(short = 'P', long, default_value = "2048")]
        port: u16,
    },

    /// Show the effective configuration and version info
    Info {
        #[command(flatten)]
        server: ServerArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { cli.log_level.as_str() };
    setup_logging(level, cli.json_logs)?;

    // Handle Ctrl+C
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(()).await;
        }
    });

    match cli.command {
        Commands::Run { server } => {
            let config = effective_config(cli.config.as_deref(), server)?;
            eprintln!(
                "{} Driving {} server at {}",
                "SPK".cyan().bold(),
                config.server_type.to_string().green(),
                config.server_url
            );
            service::run(config, &mut shutdown_rx).await?;
        }

        Commands::Echo {
            protocol,
            bind,
            port,
        } => {
            server::run_echo_server(&protocol, &bind, port, &mut shutdown_rx).await?;
        }

        Commands::Info { server } => {
            let config = effective_config(cli.config.as_deref(), server)?;
            print_info(&config)?;
        }
    }

    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    // stdout carries state changes, logs go to stderr
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    Ok(())
}

/// Defaults, then the config file, then flags and environment
fn effective_config(path: Option<&Path>, args: ServerArgs) -> Result<GatewayConfig> {
    let mut config = load_config(path)?;
    args.apply(&mut config);
    Ok(config)
}

fn load_config(path: Option<&Path>) -> Result<GatewayConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(GatewayConfig::default()),
        },
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = parse_config(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

fn parse_config(content: &str) -> Result<GatewayConfig> {
    Ok(toml::from_str(content)?)
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("speaker-gateway").join("config.toml"))
}

fn print_info(config: &GatewayConfig) -> Result<()> {
    println!("{}", "Speaker Gateway".cyan().bold());
    println!();
    println!("Version:       {}", env!("CARGO_PKG_VERSION"));
    println!("Platform:      {}", std::env::consts::OS);
    println!();
    println!("{}", "Configuration:".green());
    println!("  Server type:  {}", config.server_type);
    println!("  Server:       {}", config.server_address()?);
    println!("  Release time: {}s", config.release_time);
    println!("  Queue:        {}", config.queue_name());
    println!(
        "  Routing:      {} -> {}",
        spk_core::ACTIONS_ROUTING_KEY,
        spk_core::ALARMS_ROUTING_KEY
    );
    if let Some(path) = default_config_path() {
        println!("  Config file:  {}", path.display());
    }
    println!();
    println!("{}", "Examples:".green());
    println!("  spk-gateway run --svr-type bosch --spk-svr tcp://10.0.0.5:2048");
    println!("  echo '{{\"action\":\"SPK_3\",\"status\":\"AUTO\"}}' | spk-gateway run");
    println!("  spk-gateway echo --protocol udp --port 2048");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "spk-gateway",
            "run",
            "--svr-type",
            "BOSCH",
            "--spk-svr",
            "tcp://10.0.0.5:4000",
            "--release-time",
            "5",
            "--qid",
            "2",
        ])
        .unwrap();

        let Commands::Run { server } = cli.command else {
            panic!("expected run");
        };
        let mut config = GatewayConfig::default();
        server.apply(&mut config);

        assert_eq!(config.server_type, ServerType::Bosch);
        assert_eq!(config.server_address().unwrap(), "10.0.0.5:4000");
        assert_eq!(config.release_time, 5);
        assert_eq!(config.qid, 2);
        assert_eq!(config.user, "admin");
    }

    #[test]
    fn test_flags_override_file() {
        let mut config = parse_config(
            r#"
            server_type = "adam"
            server_url = "tcp://io-module:502"
            release_time = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.server_type, ServerType::Adam);

        ServerArgs {
            release_time: Some(10),
            ..Default::default()
        }
        .apply(&mut config);

        assert_eq!(config.server_type, ServerType::Adam);
        assert_eq!(config.server_address().unwrap(), "io-module:502");
        assert_eq!(config.release_time, 10);
    }

    #[test]
    fn test_bad_config_file() {
        assert!(parse_config("release_time = \"soon\"").is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["spk-gateway", "echo", "-d", "--json-logs", "-P", "9000"])
            .unwrap();
        assert!(cli.debug);
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Commands::Echo { port: 9000, .. }));
    }
}
