//! Agent Bus host
//!
//! Loads configuration, opens a local server agent, starts the configured
//! child agents and logs bus traffic until interrupted.

use agent_bus::{Bus, BusAgent, CallbackAgent};
use bus_core::{init_logging, load_config, BusConfig, ChildAgentSpec, LogConfig};
use clap::Parser;
use std::path::PathBuf;

/// Run a process-wide agent bus
#[derive(Parser, Debug)]
#[command(name = "agent-bus")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long, env = "AGENT_BUS_CONFIG", default_value = "agent-bus.toml")]
    config: PathBuf,

    /// Local server name (or socket path) peers connect to
    #[arg(short, long)]
    server: Option<String>,

    /// Fixed bus name for the local server
    #[arg(long)]
    server_name: Option<String>,

    /// Override the configured log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log as JSON
    #[arg(long)]
    json_logs: bool,

    /// Don't log bus traffic
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let from_file = args.config.exists();
    let mut config = if from_file {
        load_config(&args.config)?
    } else {
        BusConfig::default()
    };
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json = true;
    }

    init_logging(LogConfig::from(&config.logging));
    if !from_file {
        tracing::info!("No config at {}, using defaults", args.config.display());
    }

    tracing::info!("Agent Bus v{}", env!("CARGO_PKG_VERSION"));

    let bus = Bus::from_config(&config);
    let _monitor = if args.quiet {
        None
    } else {
        Some(traffic_monitor(&bus)?)
    };

    if let Some(server) = &args.server {
        let name = bus
            .create_local_server_agent(server, args.server_name.as_deref())
            .await?;
        tracing::info!(agent = %name, "Accepting local connections on {}", server);
    }

    let started = start_agents(&bus, &config.agents).await;
    tracing::info!(
        started,
        configured = config.agents.len(),
        "Bus ready with {} agent(s)",
        bus.len()
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupted, shutting down");

    bus.shutdown();
    Ok(())
}

/// Log every broadcast on the bus
fn traffic_monitor(bus: &Bus) -> anyhow::Result<CallbackAgent> {
    let monitor = bus.create_callback_agent(None, |message| {
        tracing::info!(from = %message.from, id = %message.id, "{}", message.data);
    })?;
    monitor.subscribe();
    Ok(monitor)
}

/// Start configured child agents; a failed start is logged and skipped
async fn start_agents(bus: &Bus, agents: &[ChildAgentSpec]) -> usize {
    let mut started = 0;
    for spec in agents {
        let privileged = spec.privileged_uuid.as_deref();
        let result = if spec.script {
            bus.create_child_script_process_agent(&spec.program, &spec.args, privileged)
                .await
        } else {
            bus.create_child_process_agent(&spec.program, &spec.args, privileged)
                .await
        };

        match result {
            Ok(name) => {
                tracing::info!(agent = %name, program = %spec.program, "Started agent");
                started += 1;
            }
            Err(e) => {
                tracing::error!(program = %spec.program, "Failed to start agent: {}", e);
            }
        }
    }
    started
}
