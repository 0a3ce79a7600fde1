//! Script host: interpreter-launched child agents and code evaluation
//!
//! The interpreter itself is an external program. This module only prepares
//! its environment (home directory, module search path), launches script
//! children under it, and offers a [`ScriptRuntime`] for one-shot evaluation.

use async_trait::async_trait;
use bus_core::ScriptHostConfig;
use serde_json::Value;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::process::{spawn_child_agent, ProcessFlavor};
use crate::{Bus, BusError, Result};

/// Environment variables the interpreter needs
///
/// Configured search paths are placed in front of any inherited value of
/// the search-path variable.
pub fn script_environment(host: &ScriptHostConfig) -> Result<Vec<(String, OsString)>> {
    let mut env = Vec::new();

    if let Some(home) = &host.home {
        env.push((host.home_var.clone(), home.clone().into_os_string()));
    }

    if !host.search_paths.is_empty() {
        let mut paths = host.search_paths.clone();
        if let Some(inherited) = std::env::var_os(&host.path_var) {
            paths.extend(std::env::split_paths(&inherited));
        }
        let joined = std::env::join_paths(paths)
            .map_err(|e| BusError::script(format!("Invalid search path: {}", e)))?;
        env.push((host.path_var.clone(), joined));
    }

    Ok(env)
}

/// Command that runs `program` under the configured interpreter
pub fn script_command(
    host: &ScriptHostConfig,
    program: &str,
    arguments: &[String],
) -> Result<Command> {
    let mut command = Command::new(&host.interpreter);
    command
        .args(&host.args)
        .arg(program)
        .args(arguments)
        .envs(script_environment(host)?);
    Ok(command)
}

impl Bus {
    /// Spawn `program` under the script host and register it as an agent
    ///
    /// Same naming and failure rules as [`Bus::create_child_process_agent`].
    pub async fn create_child_script_process_agent(
        &self,
        program: &str,
        arguments: &[String],
        privileged_uuid: Option<&str>,
    ) -> Result<String> {
        let host = self.script_host();
        let command = script_command(host, program, arguments)?;
        spawn_child_agent(
            self,
            command,
            &host.interpreter,
            ProcessFlavor::Script,
            privileged_uuid,
        )
    }
}

/// Something that can evaluate script code
///
/// Evaluation failures are returned by [`ScriptRuntime::eval`] only; the
/// provided methods log them and carry on.
#[async_trait]
pub trait ScriptRuntime: Send + Sync {
    /// Evaluate `code` and return its result as JSON
    async fn eval(&self, code: &str) -> Result<Value>;

    /// Evaluate `code` for its side effects
    async fn eval_and_discard(&self, code: &str) {
        if let Err(e) = self.eval(code).await {
            tracing::warn!("Script evaluation failed: {}", e);
        }
    }

    /// Extension type names exposed by the object bound to `api`
    async fn type_names(&self, api: &str) -> BTreeSet<String> {
        let code = format!("{}.typeNames()", api);
        match self.eval(&code).await {
            Ok(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            Ok(other) => {
                tracing::warn!(api, "typeNames() returned a non-list: {}", other);
                BTreeSet::new()
            }
            Err(e) => {
                tracing::warn!(api, "typeNames() failed: {}", e);
                BTreeSet::new()
            }
        }
    }
}

/// Runtime that evaluates each snippet in a fresh interpreter process
///
/// The code is written to the interpreter's stdin and its stdout is parsed
/// as JSON. Empty output evaluates to `null`. The interpreter process is
/// killed if evaluation is abandoned.
#[derive(Debug, Clone)]
pub struct SubprocessRuntime {
    host: ScriptHostConfig,
}

impl SubprocessRuntime {
    pub fn new(host: ScriptHostConfig) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &ScriptHostConfig {
        &self.host
    }
}

#[async_trait]
impl ScriptRuntime for SubprocessRuntime {
    async fn eval(&self, code: &str) -> Result<Value> {
        let mut child = Command::new(&self.host.interpreter)
            .args(&self.host.eval_args)
            .envs(script_environment(&self.host)?)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BusError::spawn(&self.host.interpreter, e))?;

        // stdin is fed while stdout and stderr are drained.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(code.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        if let Err(e) = &fed {
            tracing::debug!(interpreter = %self.host.interpreter, "Could not write code to stdin: {}", e);
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BusError::script(format!(
                "{} exited with {}: {}",
                self.host.interpreter,
                output.status,
                stderr.trim()
            )));
        }
        fed?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(stdout)?)
    }
}
