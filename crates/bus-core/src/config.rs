//! Configuration management for the agent bus
//!
//! Configuration is layered from:
//! - Default values
//! - A configuration file (TOML, JSON, YAML)
//! - Environment variables prefixed with `AGENT_BUS__`

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides (`AGENT_BUS__BUS__FORWARD_STDERR=true`)
pub const ENV_PREFIX: &str = "AGENT_BUS";

/// Main configuration for a bus host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Routing and transport settings
    #[serde(default)]
    pub bus: BusSettings,

    /// Script host used for script-backed child agents
    #[serde(default)]
    pub script: ScriptHostConfig,

    /// Child agents a host should start on boot
    #[serde(default)]
    pub agents: Vec<ChildAgentSpec>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// How point-to-point messages interact with the subscription table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectDelivery {
    /// Deliver whenever the recipient is registered
    #[default]
    Bypass,

    /// Deliver only if the recipient subscribes to everything or to the sender
    RequireSubscription,
}

/// Routing and transport settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusSettings {
    /// Point-to-point delivery policy
    #[serde(default)]
    pub direct_delivery: DirectDelivery,

    /// Broadcast child stderr lines as `{"stream": "stderr", "line": ...}`
    #[serde(default)]
    pub forward_stderr: bool,

    /// Directory for local server sockets given by bare name (defaults to the temp dir)
    #[serde(default)]
    pub socket_dir: Option<PathBuf>,
}

impl BusSettings {
    /// Directory where bare local server names are bound
    pub fn socket_dir(&self) -> PathBuf {
        self.socket_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Interpreter used to host script child processes and evaluate code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptHostConfig {
    /// Interpreter executable
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Arguments placed before the script path
    #[serde(default = "default_interpreter_args")]
    pub args: Vec<String>,

    /// Interpreter home, exported through `home_var`
    #[serde(default)]
    pub home: Option<PathBuf>,

    /// Module search path, joined and exported through `path_var`
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,

    /// Environment variable naming the interpreter home
    #[serde(default = "default_home_var")]
    pub home_var: String,

    /// Environment variable holding the search path
    #[serde(default = "default_path_var")]
    pub path_var: String,

    /// Arguments used for one-shot evaluation; code arrives on stdin, JSON leaves on stdout
    #[serde(default = "default_eval_args")]
    pub eval_args: Vec<String>,
}

impl Default for ScriptHostConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            args: default_interpreter_args(),
            home: None,
            search_paths: Vec::new(),
            home_var: default_home_var(),
            path_var: default_path_var(),
            eval_args: default_eval_args(),
        }
    }
}

impl BusConfig {
    /// Reject settings that parse but cannot work
    ///
    /// Privileged names must be non-blank, free of surrounding whitespace and
    /// unique across `agents`.
    pub fn validate(&self) -> Result<()> {
        if self.script.interpreter.trim().is_empty() {
            return Err(CoreError::invalid_setting(
                "script.interpreter",
                "must not be empty",
            ));
        }

        let mut privileged = std::collections::HashSet::new();
        for (i, agent) in self.agents.iter().enumerate() {
            if agent.program.trim().is_empty() {
                return Err(CoreError::invalid_setting(
                    format!("agents[{}].program", i),
                    "must not be empty",
                ));
            }
            let Some(name) = agent.privileged_uuid.as_deref() else {
                continue;
            };
            let key = format!("agents[{}].privileged_uuid", i);
            if name.trim().is_empty() || name.trim() != name {
                return Err(CoreError::invalid_setting(
                    key,
                    format!("{:?} is not a usable agent name", name),
                ));
            }
            if !privileged.insert(name) {
                return Err(CoreError::invalid_setting(
                    key,
                    format!("{:?} is used by more than one agent", name),
                ));
            }
        }
        Ok(())
    }
}

/// A child agent started by a bus host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildAgentSpec {
    /// Program (or script path when `script` is set)
    pub program: String,

    /// Program arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Launch under the script host
    #[serde(default)]
    pub script: bool,

    /// Fixed bus name for trusted agents
    #[serde(default)]
    pub privileged_uuid: Option<String>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_interpreter_args() -> Vec<String> {
    vec!["-u".to_string()]
}

fn default_home_var() -> String {
    "PYTHONHOME".to_string()
}

fn default_path_var() -> String {
    "PYTHONPATH".to_string()
}

fn default_eval_args() -> Vec<String> {
    vec![
        "-c".to_string(),
        "import json, sys; print(json.dumps(eval(sys.stdin.read())))".to_string(),
    ]
}

/// Load configuration from a file
///
/// Supports TOML, JSON, and YAML formats based on file extension.
/// Environment variables override file values.
///
/// # Example
///
/// ```no_run
/// use bus_core::config::load_config;
///
/// let config = load_config("agent-bus.toml").unwrap();
/// println!("Log level: {}", config.logging.level);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BusConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(CoreError::config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    let config: BusConfig = settings.try_deserialize()?;
    config.validate()?;

    tracing::info!("Configuration loaded from {}", path.display());

    Ok(config)
}

/// Load configuration with defaults if the file doesn't exist or fails to parse
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> BusConfig {
    match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            BusConfig::default()
        }
    }
}
