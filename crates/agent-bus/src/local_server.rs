//! Local-socket server agents (Unix domain sockets)
//!
//! The server itself is one agent. Every accepted connection registers as a
//! further agent named `<server>:<n>` and speaks the same line-delimited
//! framing as child processes. Messages delivered to the server agent are
//! copied to every live connection.

use dashmap::DashMap;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::agent::{ChannelInbox, Inbox};
use crate::codec::{read_frames, write_frames};
use crate::transport::Transport;
use crate::{AgentKind, Bus, BusError, BusMessage, Result, WeakBus};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

struct Connection {
    inbox: Arc<dyn Inbox>,
    writer: JoinHandle<()>,
    reader: Option<JoinHandle<()>>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.writer.abort();
        if let Some(reader) = &self.reader {
            reader.abort();
        }
    }
}

type Connections = Arc<DashMap<String, Connection>>;

/// Server inbox: fan out to every connection
struct ServerInbox {
    connections: Connections,
}

impl Inbox for ServerInbox {
    fn deliver(&self, message: &BusMessage) {
        let inboxes: Vec<Arc<dyn Inbox>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(&entry.value().inbox))
            .collect();
        for inbox in inboxes {
            inbox.deliver(message);
        }
    }
}

/// Listening local server registered on the bus
pub(crate) struct LocalServerAgent {
    name: String,
    path: PathBuf,
    inbox: Arc<dyn Inbox>,
    connections: Connections,
    accept: JoinHandle<()>,
    bus: WeakBus,
}

impl LocalServerAgent {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inbox(&self) -> &Arc<dyn Inbox> {
        &self.inbox
    }
}

impl Drop for LocalServerAgent {
    fn drop(&mut self) {
        self.accept.abort();

        let names: Vec<String> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let bus = self.bus.upgrade();
        for name in names {
            if let Some((_, connection)) = self.connections.remove(&name) {
                if let Some(bus) = &bus {
                    bus.deregister_owned(&name, &Arc::downgrade(&connection.inbox));
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), "Could not remove socket file: {}", e);
        }
        tracing::info!(agent = %self.name, "Local server closed");
    }
}

/// Socket path for a server name: paths are used as-is, bare names go in `socket_dir`
pub fn resolve_socket_path(server_name: &str, socket_dir: &Path) -> PathBuf {
    if server_name.contains('/') {
        PathBuf::from(server_name)
    } else {
        socket_dir.join(server_name)
    }
}

impl Bus {
    /// Listen on a local socket and register the server as an agent
    ///
    /// Fails with [`BusError::AlreadyBound`] if another server is accepting
    /// under the same name. A stale socket file is replaced.
    pub async fn create_local_server_agent(
        &self,
        server_name: &str,
        privileged_uuid: Option<&str>,
    ) -> Result<String> {
        if server_name.trim().is_empty() {
            return Err(BusError::InvalidName(server_name.to_string()));
        }

        let path = resolve_socket_path(server_name, &self.settings().socket_dir());
        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            // Only a socket nobody accepts on may be replaced.
            if !metadata.file_type().is_socket() {
                return Err(BusError::Bind {
                    path,
                    source: std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "path exists and is not a socket",
                    ),
                });
            }
            if UnixStream::connect(&path).await.is_ok() {
                return Err(BusError::AlreadyBound(path));
            }
            tracing::debug!(path = %path.display(), "Removing stale socket file");
            std::fs::remove_file(&path).map_err(|source| BusError::Bind {
                path: path.clone(),
                source,
            })?;
        }

        let listener = UnixListener::bind(&path).map_err(|source| BusError::Bind {
            path: path.clone(),
            source,
        })?;

        let connections: Connections = Arc::new(DashMap::new());
        let inbox: Arc<dyn Inbox> = Arc::new(ServerInbox {
            connections: Arc::clone(&connections),
        });
        let kind = AgentKind::LocalServer { path: path.clone() };
        let name = match self.register(Arc::downgrade(&inbox), kind, privileged_uuid) {
            Ok(name) => name,
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
        };

        let weak = self.downgrade();
        let accept = tokio::spawn(accept_loop(
            listener,
            weak.clone(),
            name.clone(),
            Arc::clone(&connections),
        ));

        self.adopt_transport(Transport::LocalServer(LocalServerAgent {
            name: name.clone(),
            path: path.clone(),
            inbox,
            connections,
            accept,
            bus: weak,
        }));

        tracing::info!(agent = %name, path = %path.display(), "Local server listening");
        Ok(name)
    }
}

async fn accept_loop(listener: UnixListener, bus: WeakBus, server: String, connections: Connections) {
    let counter = AtomicU64::new(0);
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _addr)) => stream,
            Err(e) => {
                tracing::warn!(agent = %server, "Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        let Some(bus) = bus.upgrade() else {
            break;
        };

        let id = counter.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!("{}:{}", server, id);
        if let Err(e) = open_connection(&bus, stream, &server, name, &connections) {
            tracing::warn!(agent = %server, "Rejected connection: {}", e);
        }
    }
}

fn open_connection(
    bus: &Bus,
    stream: UnixStream,
    server: &str,
    name: String,
    connections: &Connections,
) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    let inbox: Arc<dyn Inbox> = Arc::new(ChannelInbox::new(tx));
    let kind = AgentKind::LocalConnection {
        server: server.to_string(),
    };
    let name = bus.register_named(Arc::downgrade(&inbox), kind, name, false)?;

    let (read_half, write_half) = stream.into_split();
    let writer = tokio::spawn(write_frames(write_half, rx, name.clone()));
    let weak_inbox = Arc::downgrade(&inbox);
    connections.insert(
        name.clone(),
        Connection {
            inbox,
            writer,
            reader: None,
        },
    );

    let reader = tokio::spawn(run_connection(
        read_half,
        bus.downgrade(),
        name.clone(),
        Arc::clone(connections),
        weak_inbox,
    ));
    match connections.get_mut(&name) {
        Some(mut connection) => connection.reader = Some(reader),
        // Already closed; the reader finishes on its own.
        None => drop(reader),
    }

    tracing::info!(agent = %name, server, "Local connection accepted");
    Ok(())
}

async fn run_connection(
    read_half: tokio::net::unix::OwnedReadHalf,
    bus: WeakBus,
    name: String,
    connections: Connections,
    inbox: Weak<dyn Inbox>,
) {
    read_frames(read_half, bus.clone(), name.clone()).await;

    if let Some(bus) = bus.upgrade() {
        bus.deregister_owned(&name, &inbox);
    }
    // Also aborts this task's own handle; nothing awaits past this point.
    let closed = connections.remove(&name);
    drop(closed);
    tracing::info!(agent = %name, "Local connection closed");
}
