//! Message endpoint: one socket kind, any number of peers.
//!
//! An [`Endpoint`] either binds (and accepts peers in a background task) or
//! connects to exactly one peer. Each peer gets a reader task feeding a
//! shared inbound channel and a writer task fed by its own channel:
//!
//! ```text
//!             ┌─► reader task ─┐
//! peer A ◄────┤                ├─► inbound mpsc ─► recv_multipart()
//!             └─◄ writer task ◄┼── send_multipart()
//!             ┌─► reader task ─┘
//! peer B ◄────┤
//!             └─◄ writer task
//! ```
//!
//! The endpoint kind decides who gets a message and in which order calls are
//! allowed:
//!
//! | Kind      | send                       | receive                    |
//! |-----------|----------------------------|----------------------------|
//! | `Request` | round-robin, then must receive | only from that peer    |
//! | `Reply`   | to the last requester      | any peer, then must send   |
//! | `Push`    | round-robin, waits for a peer | not allowed             |
//! | `Pull`    | not allowed                | fan-in from every peer     |

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use super::socket::{connect, BindGuard, BoxedReader, Connection, Listener};
use super::Address;
use crate::config::{EndpointConfig, EndpointKind, Role, TransportConfig};
use crate::error::{Result, ZrpcError};
use crate::protocol::{MessageBuffer, Multipart};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Identifier of a connected peer, unique within one endpoint.
pub type PeerId = u64;

/// How long `close` waits for all writers to flush.
const CLOSE_LINGER: Duration = Duration::from_secs(1);

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

enum Inbound {
    Message(PeerId, Multipart),
    Failed(PeerId, ZrpcError),
    Closed(PeerId),
}

struct Peer {
    writer: WriterHandle,
    writer_task: JoinHandle<Result<()>>,
    reader_task: JoinHandle<()>,
}

/// State shared with the accept and reader tasks.
struct Peers {
    table: Mutex<BTreeMap<PeerId, Peer>>,
    joined: Notify,
    next_id: AtomicU64,
    transport: TransportConfig,
}

impl Peers {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<PeerId, Peer>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(self: &Arc<Self>, conn: Connection, inbound: mpsc::Sender<Inbound>) -> PeerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (writer, writer_task) = spawn_writer_task(conn.writer, self.transport.channel_capacity);

        // The reader removes the peer on EOF, so the entry must exist before
        // the reader can observe the table.
        let mut table = self.lock();
        let reader_task = tokio::spawn(read_loop(id, conn.reader, self.clone(), inbound));
        table.insert(
            id,
            Peer {
                writer,
                writer_task,
                reader_task,
            },
        );
        drop(table);

        tracing::debug!(peer_id = id, peer = %conn.peer, "peer connected");
        self.joined.notify_waiters();
        id
    }

    fn remove(&self, id: PeerId) {
        if self.lock().remove(&id).is_some() {
            tracing::debug!(peer_id = id, "peer disconnected");
        }
    }

    fn writer(&self, id: PeerId) -> Option<WriterHandle> {
        self.lock().get(&id).map(|p| p.writer.clone())
    }

    /// Pick the peer after `cursor` in id order, wrapping around.
    fn next_after(&self, cursor: Option<PeerId>) -> Option<(PeerId, WriterHandle)> {
        let table = self.lock();
        let after = cursor.and_then(|c| table.range(c + 1..).next());
        after
            .or_else(|| table.iter().next())
            .map(|(id, peer)| (*id, peer.writer.clone()))
    }
}

/// Reads one peer's byte stream and forwards reassembled messages.
async fn read_loop(
    id: PeerId,
    mut reader: BoxedReader,
    peers: Arc<Peers>,
    inbound: mpsc::Sender<Inbound>,
) {
    let mut buffer =
        MessageBuffer::with_limits(peers.transport.max_part_size, peers.transport.max_parts);
    let mut buf = vec![0u8; peers.transport.read_buffer_size.max(1)];

    let last = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break Inbound::Closed(id),
            Ok(n) => n,
            Err(e) => break Inbound::Failed(id, e.into()),
        };

        match buffer.push(&buf[..n]) {
            Ok(messages) => {
                for message in messages {
                    if inbound.send(Inbound::Message(id, message)).await.is_err() {
                        // Endpoint dropped its receiver
                        return;
                    }
                }
            }
            Err(e) => break Inbound::Failed(id, e),
        }
    };

    peers.remove(id);
    let _ = inbound.send(last).await;
}

async fn accept_loop(mut listener: Listener, peers: Arc<Peers>, inbound: mpsc::Sender<Inbound>) {
    loop {
        match listener.accept().await {
            Ok(conn) => {
                peers.add(conn, inbound.clone());
            }
            Err(ZrpcError::ConnectionClosed) => return,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Where the endpoint is in its send/receive cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    /// Free to start a new exchange.
    Idle,
    /// Request sent to this peer, reply outstanding.
    AwaitingReply(PeerId),
    /// Request received from this peer, reply owed.
    OwesReply(PeerId),
}

/// A framed message socket.
///
/// Owned by exactly one component; operations take `&mut self`, so the
/// strict alternation of request-reply cannot be interleaved.
pub struct Endpoint {
    kind: EndpointKind,
    role: Role,
    address: Address,
    peers: Arc<Peers>,
    inbound: mpsc::Receiver<Inbound>,
    turn: Turn,
    cursor: Option<PeerId>,
    accept_task: Option<JoinHandle<()>>,
    guard: Option<BindGuard>,
    closed: bool,
}

impl Endpoint {
    /// Bind or connect according to `config.role`.
    ///
    /// A connecting endpoint retries until `connect_timeout`, so it may be
    /// opened before the binding side exists.
    pub async fn open(config: &EndpointConfig, address: &Address) -> Result<Self> {
        let (inbound_tx, inbound) = mpsc::channel(config.transport.channel_capacity.max(1));
        let peers = Arc::new(Peers {
            table: Mutex::new(BTreeMap::new()),
            joined: Notify::new(),
            next_id: AtomicU64::new(1),
            transport: config.transport.clone(),
        });

        let (resolved, accept_task, guard) = match config.role {
            Role::Bind => {
                let (listener, resolved, guard) = Listener::bind(address).await?;
                tracing::debug!(kind = %config.kind, address = %resolved, "bound");
                let task = tokio::spawn(accept_loop(listener, peers.clone(), inbound_tx));
                (resolved, Some(task), Some(guard))
            }
            Role::Connect => {
                let conn = connect(address, &config.transport).await?;
                tracing::debug!(kind = %config.kind, %address, "connected");
                peers.add(conn, inbound_tx);
                (address.clone(), None, None)
            }
        };

        Ok(Self {
            kind: config.kind,
            role: config.role,
            address: resolved,
            peers,
            inbound,
            turn: Turn::Idle,
            cursor: None,
            accept_task,
            guard,
            closed: false,
        })
    }

    /// Parse `address` and open.
    pub async fn open_str(config: &EndpointConfig, address: &str) -> Result<Self> {
        Self::open(config, &address.parse()?).await
    }

    /// Socket kind.
    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Bind or connect.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Address actually in use. For a tcp bind on port 0 this carries the
    /// assigned port.
    pub fn bound_address(&self) -> &Address {
        &self.address
    }

    /// Number of currently connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send one multipart message.
    ///
    /// Returns once the message is queued on the peer's writer. Messages the
    /// transport limits would make the peer reject fail here with `Protocol`
    /// and leave the alternation state untouched.
    pub async fn send_multipart(&mut self, message: Multipart) -> Result<()> {
        self.ensure_open()?;
        if !self.kind.can_send() {
            return Err(ZrpcError::Protocol(format!("{} endpoint cannot send", self.kind)));
        }
        let transport = &self.peers.transport;
        message.check_limits(transport.max_part_size, transport.max_parts)?;

        match self.kind {
            EndpointKind::Reply => {
                let peer = match self.turn {
                    Turn::OwesReply(peer) => peer,
                    _ => {
                        return Err(ZrpcError::Protocol(
                            "reply endpoint must receive a request before sending".to_string(),
                        ))
                    }
                };
                self.turn = Turn::Idle;
                match self.peers.writer(peer) {
                    Some(writer) => writer.send(message).await,
                    None => {
                        // Requester went away; nobody is left to read the reply.
                        tracing::debug!(peer_id = peer, "dropping reply for disconnected peer");
                        Ok(())
                    }
                }
            }
            EndpointKind::Request => {
                if let Turn::AwaitingReply(_) = self.turn {
                    return Err(ZrpcError::Protocol(
                        "request endpoint must receive the reply before sending again".to_string(),
                    ));
                }
                let peer = self.send_round_robin(message).await?;
                self.turn = Turn::AwaitingReply(peer);
                Ok(())
            }
            _ => self.send_round_robin(message).await.map(|_| ()),
        }
    }

    /// Receive one multipart message.
    pub async fn recv_multipart(&mut self) -> Result<Multipart> {
        self.ensure_open()?;
        if !self.kind.can_receive() {
            return Err(ZrpcError::Protocol(format!("{} endpoint cannot receive", self.kind)));
        }
        let expected = match (self.kind, self.turn) {
            (EndpointKind::Request, Turn::AwaitingReply(peer)) => Some(peer),
            (EndpointKind::Request, _) => {
                return Err(ZrpcError::Protocol(
                    "request endpoint must send before receiving".to_string(),
                ))
            }
            (EndpointKind::Reply, Turn::OwesReply(_)) => {
                return Err(ZrpcError::Protocol(
                    "reply endpoint must send its reply before receiving again".to_string(),
                ))
            }
            _ => None,
        };

        loop {
            let event = self.inbound.recv().await.ok_or(ZrpcError::ConnectionClosed)?;
            match event {
                Inbound::Message(peer, message) => {
                    if expected.is_some_and(|p| p != peer) {
                        tracing::warn!(peer_id = peer, "discarding message from unexpected peer");
                        continue;
                    }
                    if self.kind == EndpointKind::Reply {
                        self.turn = Turn::OwesReply(peer);
                    } else {
                        self.turn = Turn::Idle;
                    }
                    return Ok(message);
                }
                Inbound::Failed(peer, e) => {
                    if self.is_fatal(peer, expected) {
                        self.turn = Turn::Idle;
                        return Err(e);
                    }
                    tracing::warn!(peer_id = peer, error = %e, "dropped misbehaving peer");
                }
                Inbound::Closed(peer) => {
                    if self.is_fatal(peer, expected) {
                        self.turn = Turn::Idle;
                        return Err(ZrpcError::ConnectionClosed);
                    }
                }
            }
        }
    }

    /// Flush queued messages and release the address.
    ///
    /// Idempotent. Every later send or receive fails with
    /// `ConnectionClosed`.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(task) = self.accept_task.take() {
            task.abort();
            let _ = task.await;
        }

        // Dropping every handle first lets all writers drain at once; the
        // linger is one deadline shared by all of them.
        let peers = std::mem::take(&mut *self.peers.lock());
        let mut writers = Vec::with_capacity(peers.len());
        for (id, peer) in peers {
            peer.reader_task.abort();
            drop(peer.writer);
            writers.push((id, peer.writer_task));
        }

        let deadline = tokio::time::Instant::now() + CLOSE_LINGER;
        for (id, mut task) in writers {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(Err(e))) => tracing::debug!(peer_id = id, error = %e, "writer ended with error"),
                Err(_) => {
                    tracing::debug!(peer_id = id, "writer did not flush in time");
                    task.abort();
                }
                _ => {}
            }
        }

        self.inbound.close();
        self.guard.take();
        tracing::debug!(kind = %self.kind, address = %self.address, "closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(ZrpcError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    /// A lost peer ends the current operation when it was the one being
    /// waited on or the only peer this endpoint will ever have.
    fn is_fatal(&self, peer: PeerId, expected: Option<PeerId>) -> bool {
        expected == Some(peer) || self.role == Role::Connect
    }

    async fn send_round_robin(&mut self, message: Multipart) -> Result<PeerId> {
        loop {
            let joined = self.peers.joined.notified();
            match self.peers.next_after(self.cursor) {
                Some((peer, writer)) => {
                    self.cursor = Some(peer);
                    match writer.send(message.clone()).await {
                        Ok(()) => return Ok(peer),
                        Err(_) if self.role == Role::Connect => {
                            return Err(ZrpcError::ConnectionClosed)
                        }
                        Err(_) => self.peers.remove(peer),
                    }
                }
                None if self.role == Role::Connect => return Err(ZrpcError::ConnectionClosed),
                None => {
                    tracing::trace!(kind = %self.kind, "waiting for a peer");
                    joined.await;
                }
            }
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        for peer in self.peers.lock().values() {
            peer.reader_task.abort();
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("kind", &self.kind)
            .field("role", &self.role)
            .field("address", &self.address)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn msg(parts: &[&'static [u8]]) -> Multipart {
        Multipart::from(parts.iter().map(|p| Bytes::from_static(*p)).collect::<Vec<_>>())
    }

    fn inproc(name: &str) -> Address {
        Address::Inproc(name.to_string())
    }

    async fn pair(name: &str, bind: EndpointConfig, connect: EndpointConfig) -> (Endpoint, Endpoint) {
        let address = inproc(name);
        let bound = Endpoint::open(&bind, &address).await.unwrap();
        let connected = Endpoint::open(&connect, &address).await.unwrap();
        (bound, connected)
    }

    #[tokio::test]
    async fn test_request_reply_round_trip() {
        let (mut rep, mut req) =
            pair("endpoint-rr", EndpointConfig::reply(), EndpointConfig::request()).await;

        req.send_multipart(msg(&[b"echo", b"hi"])).await.unwrap();
        let got = rep.recv_multipart().await.unwrap();
        assert_eq!(got, msg(&[b"echo", b"hi"]));

        rep.send_multipart(msg(&[b"ok"])).await.unwrap();
        assert_eq!(req.recv_multipart().await.unwrap(), msg(&[b"ok"]));
    }

    #[tokio::test]
    async fn test_request_alternation_enforced() {
        let (_rep, mut req) =
            pair("endpoint-req-alt", EndpointConfig::reply(), EndpointConfig::request()).await;

        assert!(matches!(
            req.recv_multipart().await,
            Err(ZrpcError::Protocol(_))
        ));
        req.send_multipart(msg(&[b"a"])).await.unwrap();
        assert!(matches!(
            req.send_multipart(msg(&[b"b"])).await,
            Err(ZrpcError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_reply_alternation_enforced() {
        let (mut rep, mut req) =
            pair("endpoint-rep-alt", EndpointConfig::reply(), EndpointConfig::request()).await;

        assert!(matches!(
            rep.send_multipart(msg(&[b"early"])).await,
            Err(ZrpcError::Protocol(_))
        ));

        req.send_multipart(msg(&[b"q"])).await.unwrap();
        rep.recv_multipart().await.unwrap();
        assert!(matches!(
            rep.recv_multipart().await,
            Err(ZrpcError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_reply_goes_to_requesting_peer() {
        let address = inproc("endpoint-rep-route");
        let mut rep = Endpoint::open(&EndpointConfig::reply(), &address).await.unwrap();
        let mut a = Endpoint::open(&EndpointConfig::request(), &address).await.unwrap();
        let mut b = Endpoint::open(&EndpointConfig::request(), &address).await.unwrap();

        b.send_multipart(msg(&[b"from b"])).await.unwrap();
        assert_eq!(rep.recv_multipart().await.unwrap(), msg(&[b"from b"]));
        rep.send_multipart(msg(&[b"to b"])).await.unwrap();
        assert_eq!(b.recv_multipart().await.unwrap(), msg(&[b"to b"]));

        a.send_multipart(msg(&[b"from a"])).await.unwrap();
        assert_eq!(rep.recv_multipart().await.unwrap(), msg(&[b"from a"]));
        rep.send_multipart(msg(&[b"to a"])).await.unwrap();
        assert_eq!(a.recv_multipart().await.unwrap(), msg(&[b"to a"]));
    }

    #[tokio::test]
    async fn test_push_pull_delivers_in_order() {
        let (mut pull, mut push) =
            pair("endpoint-pp", EndpointConfig::pull(), EndpointConfig::push()).await;

        for _ in 0..5 {
            push.send_multipart(msg(&[b"job"])).await.unwrap();
        }
        for _ in 0..5 {
            assert_eq!(pull.recv_multipart().await.unwrap(), msg(&[b"job"]));
        }

        assert!(matches!(
            push.recv_multipart().await,
            Err(ZrpcError::Protocol(_))
        ));
        assert!(matches!(
            pull.send_multipart(msg(&[b"x"])).await,
            Err(ZrpcError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_bound_push_waits_for_peer() {
        let address = inproc("endpoint-push-wait");
        let mut push = Endpoint::open(&EndpointConfig::push().with_role(Role::Bind), &address)
            .await
            .unwrap();

        let late = address.clone();
        let puller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let config = EndpointConfig::pull().with_role(Role::Connect);
            let mut pull = Endpoint::open(&config, &late).await.unwrap();
            pull.recv_multipart().await.unwrap()
        });

        push.send_multipart(msg(&[b"queued"])).await.unwrap();
        assert_eq!(puller.await.unwrap(), msg(&[b"queued"]));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let (mut rep, _req) =
            pair("endpoint-close", EndpointConfig::reply(), EndpointConfig::request()).await;

        rep.close().await.unwrap();
        rep.close().await.unwrap();
        assert!(rep.is_closed());
        assert!(matches!(
            rep.recv_multipart().await,
            Err(ZrpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_flushes_final_reply() {
        let (mut rep, mut req) =
            pair("endpoint-flush", EndpointConfig::reply(), EndpointConfig::request()).await;

        req.send_multipart(msg(&[b"bye"])).await.unwrap();
        rep.recv_multipart().await.unwrap();
        rep.send_multipart(msg(&[b"ack"])).await.unwrap();
        rep.close().await.unwrap();

        assert_eq!(req.recv_multipart().await.unwrap(), msg(&[b"ack"]));
    }

    #[tokio::test]
    async fn test_request_sees_server_going_away() {
        let (mut rep, mut req) =
            pair("endpoint-gone", EndpointConfig::reply(), EndpointConfig::request()).await;

        req.send_multipart(msg(&[b"q"])).await.unwrap();
        rep.close().await.unwrap();

        assert!(matches!(
            req.recv_multipart().await,
            Err(ZrpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_name_reusable_after_close() {
        let address = inproc("endpoint-reuse");
        let mut first = Endpoint::open(&EndpointConfig::reply(), &address).await.unwrap();
        first.close().await.unwrap();
        assert!(Endpoint::open(&EndpointConfig::reply(), &address).await.is_ok());
    }

    #[tokio::test]
    async fn test_oversized_send_rejected_locally() {
        let address = inproc("endpoint-oversized");
        let mut rep = Endpoint::open(&EndpointConfig::reply(), &address).await.unwrap();
        let small = TransportConfig::default().max_part_size(8).max_parts(2);
        let mut req = Endpoint::open(&EndpointConfig::request().with_transport(small), &address)
            .await
            .unwrap();

        let big = Multipart::from(vec![Bytes::from(vec![0u8; 16])]);
        assert!(matches!(
            req.send_multipart(big).await,
            Err(ZrpcError::Protocol(_))
        ));
        assert!(matches!(
            req.send_multipart(msg(&[b"a", b"b", b"c"])).await,
            Err(ZrpcError::Protocol(_))
        ));

        // Nothing was sent, so the request side may still start an exchange.
        req.send_multipart(msg(&[b"fits"])).await.unwrap();
        assert_eq!(rep.recv_multipart().await.unwrap(), msg(&[b"fits"]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_peers_leave_table() {
        let address = inproc("endpoint-churn");
        let pull = Endpoint::open(&EndpointConfig::pull(), &address).await.unwrap();

        for _ in 0..200 {
            let conn = connect(&address, &TransportConfig::default()).await.unwrap();
            drop(conn);
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while pull.peer_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_lingers_once_for_all_stuck_peers() {
        let address = inproc("endpoint-linger");
        let mut push = Endpoint::open(&EndpointConfig::push().with_role(Role::Bind), &address)
            .await
            .unwrap();

        // Peers that never read, behind 16-byte pipes.
        let tiny = TransportConfig::default().read_buffer_size(16);
        let mut stuck = Vec::new();
        for _ in 0..3 {
            stuck.push(connect(&address, &tiny).await.unwrap());
        }
        while push.peer_count() < 3 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        for _ in 0..3 {
            let payload = Multipart::from(vec![Bytes::from(vec![7u8; 1024])]);
            push.send_multipart(payload).await.unwrap();
        }

        let started = tokio::time::Instant::now();
        push.close().await.unwrap();
        assert!(started.elapsed() < CLOSE_LINGER * 2);
        drop(stuck);
    }

    #[tokio::test]
    async fn test_tcp_bound_address_has_port() {
        let mut rep = Endpoint::open_str(&EndpointConfig::reply(), "tcp://127.0.0.1:0")
            .await
            .unwrap();
        let address = rep.bound_address().clone();
        let mut req = Endpoint::open(&EndpointConfig::request(), &address).await.unwrap();

        req.send_multipart(msg(&[b"over tcp"])).await.unwrap();
        assert_eq!(rep.recv_multipart().await.unwrap(), msg(&[b"over tcp"]));
    }
}
