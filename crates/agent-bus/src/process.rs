//! Child-process agents
//!
//! The child's stdout carries line-delimited records onto the bus, messages
//! delivered to the agent are written to its stdin, and stderr is logged.
//! When the process exits the agent deregisters itself.

use serde_json::json;
use std::process::Stdio;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::agent::{ChannelInbox, Inbox};
use crate::codec::{read_frames, write_frames};
use crate::transport::Transport;
use crate::{AgentKind, Bus, BusError, Result, WeakBus};

/// How long to wait for buffered stdout after the child exits
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Running child process registered on the bus
pub(crate) struct ChildProcessAgent {
    name: String,
    inbox: Arc<dyn Inbox>,
    kill_tx: Option<oneshot::Sender<()>>,
    writer: JoinHandle<()>,
    stderr: JoinHandle<()>,
}

impl ChildProcessAgent {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inbox(&self) -> &Arc<dyn Inbox> {
        &self.inbox
    }
}

impl Drop for ChildProcessAgent {
    fn drop(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        self.writer.abort();
        self.stderr.abort();
        tracing::debug!(agent = %self.name, "Child process agent closed");
    }
}

impl Bus {
    /// Spawn `program` and register it as an agent
    ///
    /// The agent is named `privileged_uuid` if given, otherwise a generated
    /// UUID. Must be called from within a Tokio runtime.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use agent_bus::{Bus, BusAgent};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let bus = Bus::new();
    ///     let mut listener = bus.create_mailbox_agent(None)?;
    ///
    ///     let indexer = bus
    ///         .create_child_process_agent("indexer", &["--stdio".to_string()], None)
    ///         .await?;
    ///     listener.subscribe_to(&indexer);
    ///
    ///     while let Some(message) = listener.recv().await {
    ///         println!("{}: {}", message.from, message.data);
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub async fn create_child_process_agent(
        &self,
        program: &str,
        arguments: &[String],
        privileged_uuid: Option<&str>,
    ) -> Result<String> {
        let mut command = Command::new(program);
        command.args(arguments);
        spawn_child_agent(self, command, program, ProcessFlavor::Plain, privileged_uuid)
    }
}

/// How a child agent was launched
#[derive(Debug, Clone, Copy)]
pub(crate) enum ProcessFlavor {
    Plain,
    Script,
}

impl ProcessFlavor {
    fn kind(self, pid: Option<u32>) -> AgentKind {
        match self {
            ProcessFlavor::Plain => AgentKind::ChildProcess { pid },
            ProcessFlavor::Script => AgentKind::ScriptProcess { pid },
        }
    }
}

/// Spawn a prepared command and bridge its stdio to the bus
pub(crate) fn spawn_child_agent(
    bus: &Bus,
    mut command: Command,
    program: &str,
    flavor: ProcessFlavor,
    privileged: Option<&str>,
) -> Result<String> {
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| BusError::spawn(program, e))?;
    let pid = child.id();

    let missing = |stream: &str| {
        BusError::spawn(
            program,
            std::io::Error::other(format!("{} was not captured", stream)),
        )
    };
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    let (tx, rx) = mpsc::unbounded_channel();
    let inbox: Arc<dyn Inbox> = Arc::new(ChannelInbox::new(tx));
    // On failure `child` is dropped here and killed.
    let name = bus.register(Arc::downgrade(&inbox), flavor.kind(pid), privileged)?;

    let weak = bus.downgrade();
    let forward_stderr = bus.settings().forward_stderr;
    let writer = tokio::spawn(write_frames(stdin, rx, name.clone()));
    let stderr = tokio::spawn(log_stderr(stderr, weak.clone(), name.clone(), forward_stderr));
    let reader = tokio::spawn(read_frames(stdout, weak.clone(), name.clone()));

    let (kill_tx, kill_rx) = oneshot::channel();
    tokio::spawn(supervise(
        child,
        reader,
        kill_rx,
        weak,
        name.clone(),
        Arc::downgrade(&inbox),
    ));

    bus.adopt_transport(Transport::Process(ChildProcessAgent {
        name: name.clone(),
        inbox,
        kill_tx: Some(kill_tx),
        writer,
        stderr,
    }));

    tracing::info!(agent = %name, program, ?pid, ?flavor, "Child process agent started");
    Ok(name)
}

async fn log_stderr(stderr: ChildStderr, bus: WeakBus, agent: String, forward: bool) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::warn!(agent = %agent, "stderr: {}", line);
        if forward {
            let Some(bus) = bus.upgrade() else {
                break;
            };
            bus.send(&agent, json!({"stream": "stderr", "line": line}));
        }
    }
}

/// Wait for the child to exit or for a kill request, then clean up
async fn supervise(
    mut child: Child,
    mut reader: JoinHandle<()>,
    kill_rx: oneshot::Receiver<()>,
    bus: WeakBus,
    agent: String,
    inbox: Weak<dyn Inbox>,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill_rx => None,
    };

    let Some(status) = exited else {
        // Closed by the bus: the agent is already deregistered.
        reader.abort();
        if let Err(e) = child.start_kill() {
            tracing::debug!(agent = %agent, "Kill failed: {}", e);
        }
        let status = child.wait().await;
        tracing::info!(agent = %agent, ?status, "Child process terminated");
        return;
    };

    match status {
        Ok(status) if status.success() => {
            tracing::info!(agent = %agent, "Child process exited");
        }
        Ok(status) => {
            tracing::warn!(agent = %agent, %status, "Child process exited with failure");
        }
        Err(e) => {
            tracing::warn!(agent = %agent, "Failed to wait for child process: {}", e);
        }
    }

    if tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, &mut reader)
        .await
        .is_err()
    {
        tracing::debug!(agent = %agent, "Stdout still open after exit; abandoning it");
        reader.abort();
    }

    if let Some(bus) = bus.upgrade() {
        bus.deregister_owned(&agent, &inbox);
    }
}
