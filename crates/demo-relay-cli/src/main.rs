use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use demo_relay_core::audit::{retention_days, AuditSink, NullAuditSink};
use demo_relay_core::audit_store::JsonlAuditStore;
use demo_relay_core::config::{Config, LoggingConfig};
use demo_relay_gateway::GatewayState;

#[derive(Parser)]
#[command(
    name = "demo-relay",
    about = "Single-controller relay that keeps demo displays in sync with a phone controller",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Port to listen on (default: 5000)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Show configuration summary
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show the interaction log
    Logs {
        /// Maximum number of entries to show
        #[arg(long, default_value_t = 100)]
        limit: usize,

        #[command(subcommand)]
        action: Option<LogsAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Check the configuration for problems
    Validate,
    /// Write the current configuration to the config path
    Init,
}

#[derive(Subcommand)]
enum LogsAction {
    /// Delete entries older than the given number of days
    Purge {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);

    let config = Config::load(&config_path)?;

    init_logging(config.logging.as_ref(), cli.verbose);

    match cli.command {
        Commands::Serve { port, bind } => {
            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("{w}");
            }
            if !errors.is_empty() {
                anyhow::bail!("Invalid configuration: {}", errors.join("; "));
            }

            let port = port.unwrap_or_else(|| config.gateway_port());
            let bind = bind.unwrap_or_else(|| config.gateway_bind());
            let audit = build_audit_sink(&config);

            let state = GatewayState::new(Arc::new(config), audit);
            #[cfg(feature = "metrics")]
            let state = match demo_relay_gateway::metrics::install_prometheus_recorder() {
                Ok(handle) => state.with_metrics(handle),
                Err(e) => {
                    tracing::warn!(%e, "Metrics recorder not installed");
                    state
                }
            };

            tracing::info!("Starting Demo Relay on {bind}:{port}");
            demo_relay_gateway::start_gateway(Arc::new(state), &bind, port).await?;
        }
        Commands::Status => {
            println!("Demo Relay v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!(
                "Gateway: {}:{}",
                config.gateway_bind(),
                config.gateway_port()
            );
            println!(
                "Controller timeout: {}s",
                config.controller_timeout().as_secs()
            );
            let catalog = config.catalog();
            for demo in catalog.ids() {
                println!(
                    "Demo: {demo} ({} slides)",
                    catalog.slide_count(demo).unwrap_or(0)
                );
            }
            if config.audit_enabled() {
                println!("Audit log: {}", config.audit_dir().display());
            } else {
                println!("Audit log: disabled");
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} configuration error(s)", errors.len());
                }
                println!("Configuration OK");
            }
            ConfigAction::Init => {
                if let Some(parent) = config_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                config.save(&config_path)?;
                println!("Wrote {}", config_path.display());
            }
        },
        Commands::Logs { limit, action } => {
            let audit = build_audit_sink(&config);
            match action {
                None => {
                    let entries = audit.recent(limit).await;
                    if entries.is_empty() {
                        println!("No interaction log entries");
                    }
                    for entry in entries {
                        println!(
                            "{:>5}  {}  {:<10}  {}",
                            entry.id,
                            entry.timestamp.to_rfc3339(),
                            entry.event_type,
                            entry.details
                        );
                    }
                }
                Some(LogsAction::Purge { days }) => {
                    if !audit.purge_older_than(retention_days(days)).await {
                        anyhow::bail!("Failed to clear logs. Check server logs for details.");
                    }
                    println!("Cleared logs older than {days} days");
                }
            }
        }
    }

    Ok(())
}

fn build_audit_sink(config: &Config) -> Arc<dyn AuditSink> {
    if config.audit_enabled() {
        Arc::new(JsonlAuditStore::new(config.audit_dir()))
    } else {
        Arc::new(NullAuditSink)
    }
}

/// Initialize logging. `RUST_LOG` wins over the configured level and filters.
fn init_logging(logging: Option<&LoggingConfig>, verbose: bool) {
    let level = match (verbose, logging.and_then(|l| l.level.as_deref())) {
        (true, _) => "debug",
        (false, Some(level)) => level,
        (false, None) => "info",
    };
    let mut directives = vec![level.to_string()];
    if let Some(logging) = logging {
        directives.extend(logging.filters.iter().cloned());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives.join(",")));
    let json = logging.is_some_and(|l| l.format == "json");
    let stdout = logging.is_some_and(|l| l.output == "stdout");

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}
