//! Endpoint and transport configuration.
//!
//! Which socket pattern an endpoint speaks and whether it binds or connects
//! are plain data, chosen per component:
//!
//! | Component | Kind      | Default role |
//! |-----------|-----------|--------------|
//! | Server    | `Reply`   | `Bind`       |
//! | Client    | `Request` | `Connect`    |
//! | Worker    | `Pull`    | `Bind`       |
//! | Master    | `Push`    | `Connect`    |

use std::fmt;
use std::time::Duration;

use crate::protocol::{DEFAULT_MAX_PARTS, DEFAULT_MAX_PART_SIZE};

/// Default capacity of each peer's outbound channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default socket read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default time spent retrying a connect before giving up.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket kind within a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Requesting side: send, then receive.
    Request,
    /// Replying side: receive, then send.
    Reply,
    /// Sending side of a one-way channel.
    Push,
    /// Receiving side of a one-way channel.
    Pull,
}

impl EndpointKind {
    /// Whether this kind may send.
    pub fn can_send(self) -> bool {
        !matches!(self, EndpointKind::Pull)
    }

    /// Whether this kind may receive.
    pub fn can_receive(self) -> bool {
        !matches!(self, EndpointKind::Push)
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EndpointKind::Request => "request",
            EndpointKind::Reply => "reply",
            EndpointKind::Push => "push",
            EndpointKind::Pull => "pull",
        };
        f.write_str(name)
    }
}

/// Whether the endpoint listens on the address or dials it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Listen and accept any number of peers.
    Bind,
    /// Dial exactly one peer.
    Connect,
}

/// Low-level transport tuning.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Largest part sent or accepted, in bytes.
    pub max_part_size: u32,
    /// Most parts in one message, sent or accepted.
    pub max_parts: usize,
    /// Outbound messages queued per peer before senders wait.
    pub channel_capacity: usize,
    /// Socket read buffer size.
    pub read_buffer_size: usize,
    /// How long a connecting endpoint retries before failing.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_part_size: DEFAULT_MAX_PART_SIZE,
            max_parts: DEFAULT_MAX_PARTS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Set the maximum part size.
    pub fn max_part_size(mut self, bytes: u32) -> Self {
        self.max_part_size = bytes;
        self
    }

    /// Set the maximum number of parts per message.
    pub fn max_parts(mut self, parts: usize) -> Self {
        self.max_parts = parts;
        self
    }

    /// Set the per-peer outbound channel capacity.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the read buffer size.
    pub fn read_buffer_size(mut self, bytes: usize) -> Self {
        self.read_buffer_size = bytes;
        self
    }

    /// Set the connect retry window.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Full description of an endpoint: kind, role and transport tuning.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Socket kind.
    pub kind: EndpointKind,
    /// Bind or connect.
    pub role: Role,
    /// Transport tuning.
    pub transport: TransportConfig,
}

impl EndpointConfig {
    /// Create a config with default transport settings.
    pub fn new(kind: EndpointKind, role: Role) -> Self {
        Self {
            kind,
            role,
            transport: TransportConfig::default(),
        }
    }

    /// Server side of request-reply.
    pub fn reply() -> Self {
        Self::new(EndpointKind::Reply, Role::Bind)
    }

    /// Client side of request-reply.
    pub fn request() -> Self {
        Self::new(EndpointKind::Request, Role::Connect)
    }

    /// Worker side of push-pull.
    pub fn pull() -> Self {
        Self::new(EndpointKind::Pull, Role::Bind)
    }

    /// Master side of push-pull.
    pub fn push() -> Self {
        Self::new(EndpointKind::Push, Role::Connect)
    }

    /// Override the role.
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Override the transport settings.
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}
