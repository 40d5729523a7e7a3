//! Listeners and connected streams for each address scheme.
//!
//! - TCP: `TcpListener` / `TcpStream`
//! - IPC: Unix domain socket (unix only)
//! - inproc: named entries in a process-wide registry, each connection is a
//!   `tokio::io::duplex` pipe handed to the listener through a channel

use std::collections::HashMap;
use std::io;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::Address;
use crate::config::TransportConfig;
use crate::error::{Result, ZrpcError};

/// Pending inproc connections a listener may queue.
const INPROC_BACKLOG: usize = 128;

/// First delay between connect attempts; doubles up to [`MAX_RETRY_DELAY`].
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(10);
const MAX_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Read half of any connection.
pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of any connection.
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A connected stream, already split.
pub(crate) struct Connection {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    /// Human-readable peer description for logs.
    pub peer: String,
}

impl Connection {
    fn tcp(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "tcp peer".to_string());
        // Small request/reply messages; latency matters more than batching.
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer,
        }
    }

    fn duplex(stream: DuplexStream, name: &str) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer: format!("inproc://{}", name),
        }
    }

    #[cfg(unix)]
    fn unix(stream: tokio::net::UnixStream, path: &std::path::Path) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer: format!("ipc://{}", path.display()),
        }
    }
}

// ============================================================================
// In-process registry
// ============================================================================

type InprocTable = HashMap<String, mpsc::Sender<DuplexStream>>;

fn inproc_table() -> std::sync::MutexGuard<'static, InprocTable> {
    static TABLE: OnceLock<Mutex<InprocTable>> = OnceLock::new();
    TABLE
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn inproc_bind(name: &str) -> Result<(mpsc::Sender<DuplexStream>, mpsc::Receiver<DuplexStream>)> {
    let mut table = inproc_table();
    if let Some(existing) = table.get(name) {
        if !existing.is_closed() {
            return Err(ZrpcError::Io(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("inproc://{} is already bound", name),
            )));
        }
    }
    let (tx, rx) = mpsc::channel(INPROC_BACKLOG);
    table.insert(name.to_string(), tx.clone());
    Ok((tx, rx))
}

async fn inproc_connect(name: &str, buffer_size: usize) -> io::Result<DuplexStream> {
    let acceptor = inproc_table().get(name).cloned();
    let acceptor = acceptor.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("inproc://{} is not bound", name),
        )
    })?;

    let (local, remote) = tokio::io::duplex(buffer_size);
    acceptor.send(remote).await.map_err(|_| {
        io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("inproc://{} stopped accepting", name),
        )
    })?;
    Ok(local)
}

// ============================================================================
// Listener
// ============================================================================

/// Cleanup performed when a bound endpoint goes away.
///
/// Removes the ipc socket file or the inproc registry entry. The inproc
/// entry is only removed if it still belongs to this binding.
pub(crate) enum BindGuard {
    Tcp,
    #[cfg(unix)]
    Ipc(std::path::PathBuf),
    Inproc {
        name: String,
        sender: mpsc::Sender<DuplexStream>,
    },
}

impl Drop for BindGuard {
    fn drop(&mut self) {
        match self {
            BindGuard::Tcp => {}
            #[cfg(unix)]
            BindGuard::Ipc(path) => {
                let _ = std::fs::remove_file(path);
            }
            BindGuard::Inproc { name, sender } => {
                let mut table = inproc_table();
                if table.get(name.as_str()).is_some_and(|s| s.same_channel(sender)) {
                    table.remove(name.as_str());
                }
            }
        }
    }
}

/// A bound listener for one address.
pub(crate) enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Ipc {
        listener: tokio::net::UnixListener,
        path: std::path::PathBuf,
    },
    Inproc {
        name: String,
        incoming: mpsc::Receiver<DuplexStream>,
    },
}

impl Listener {
    /// Bind to an address.
    ///
    /// Returns the listener, the resolved address (a tcp port of 0 becomes
    /// the assigned port) and the guard that releases the address.
    pub async fn bind(address: &Address) -> Result<(Self, Address, BindGuard)> {
        match address {
            Address::Tcp(addr) => {
                let listener = TcpListener::bind(addr.as_str()).await?;
                let resolved = Address::Tcp(listener.local_addr()?.to_string());
                Ok((Listener::Tcp(listener), resolved, BindGuard::Tcp))
            }
            #[cfg(unix)]
            Address::Ipc(path) => {
                // Remove a stale socket left behind by a previous process
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = tokio::net::UnixListener::bind(path)?;
                Ok((
                    Listener::Ipc {
                        listener,
                        path: path.clone(),
                    },
                    address.clone(),
                    BindGuard::Ipc(path.clone()),
                ))
            }
            #[cfg(not(unix))]
            Address::Ipc(path) => Err(ZrpcError::InvalidAddress(format!(
                "ipc://{} (unix only)",
                path.display()
            ))),
            Address::Inproc(name) => {
                let (sender, incoming) = inproc_bind(name)?;
                Ok((
                    Listener::Inproc {
                        name: name.clone(),
                        incoming,
                    },
                    address.clone(),
                    BindGuard::Inproc {
                        name: name.clone(),
                        sender,
                    },
                ))
            }
        }
    }

    /// Accept the next connection.
    ///
    /// Fails with `ConnectionClosed` once an inproc listener can no longer
    /// receive connections.
    pub async fn accept(&mut self) -> Result<Connection> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, _addr) = listener.accept().await?;
                Ok(Connection::tcp(stream))
            }
            #[cfg(unix)]
            Listener::Ipc { listener, path } => {
                let (stream, _addr) = listener.accept().await?;
                Ok(Connection::unix(stream, path))
            }
            Listener::Inproc { name, incoming } => match incoming.recv().await {
                Some(stream) => Ok(Connection::duplex(stream, name)),
                None => Err(ZrpcError::ConnectionClosed),
            },
        }
    }
}

// ============================================================================
// Connect
// ============================================================================

async fn connect_once(address: &Address, config: &TransportConfig) -> io::Result<Connection> {
    match address {
        Address::Tcp(addr) => Ok(Connection::tcp(TcpStream::connect(addr.as_str()).await?)),
        #[cfg(unix)]
        Address::Ipc(path) => {
            let stream = tokio::net::UnixStream::connect(path).await?;
            Ok(Connection::unix(stream, path))
        }
        #[cfg(not(unix))]
        Address::Ipc(_) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "ipc:// needs unix domain sockets",
        )),
        Address::Inproc(name) => {
            let stream = inproc_connect(name, config.read_buffer_size).await?;
            Ok(Connection::duplex(stream, name))
        }
    }
}

/// Errors that mean "nobody is listening yet".
fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
    )
}

/// Connect to an address, retrying while the peer is not yet listening.
///
/// Gives up with `Timeout` after `config.connect_timeout`.
pub(crate) async fn connect(address: &Address, config: &TransportConfig) -> Result<Connection> {
    let deadline = Instant::now() + config.connect_timeout;
    let mut delay = INITIAL_RETRY_DELAY;

    loop {
        match connect_once(address, config).await {
            Ok(conn) => return Ok(conn),
            Err(e) if is_retryable(&e) => {
                if Instant::now() + delay > deadline {
                    tracing::debug!(%address, error = %e, "giving up on connect");
                    return Err(ZrpcError::Timeout(config.connect_timeout));
                }
                tracing::trace!(%address, error = %e, ?delay, "peer not listening yet, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RETRY_DELAY);
            }
            Err(e) => return Err(e.into()),
        }
    }
}
