//! Endpoint addresses.
//!
//! | Scheme      | Example                 | Backing                     |
//! |-------------|-------------------------|-----------------------------|
//! | `tcp://`    | `tcp://127.0.0.1:5555`  | TCP socket                  |
//! | `ipc://`    | `ipc:///tmp/zrpc.sock`  | Unix domain socket (unix)   |
//! | `inproc://` | `inproc://jobs`         | in-process duplex pipe      |
//!
//! `tcp://*:PORT` binds on all interfaces.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ZrpcError;

/// A parsed endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// `host:port` for TCP.
    Tcp(String),
    /// Filesystem path of a Unix domain socket.
    Ipc(PathBuf),
    /// Name in the in-process registry.
    Inproc(String),
}

impl Address {
    /// Scheme prefix without the `://`.
    pub fn scheme(&self) -> &'static str {
        match self {
            Address::Tcp(_) => "tcp",
            Address::Ipc(_) => "ipc",
            Address::Inproc(_) => "inproc",
        }
    }
}

impl FromStr for Address {
    type Err = ZrpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ZrpcError::InvalidAddress(s.to_string());
        let (scheme, rest) = s.split_once("://").ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }

        match scheme {
            "tcp" => {
                let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
                port.parse::<u16>().map_err(|_| invalid())?;
                let host = match host {
                    "*" | "" => "0.0.0.0",
                    h => h,
                };
                Ok(Address::Tcp(format!("{}:{}", host, port)))
            }
            "ipc" if cfg!(unix) => Ok(Address::Ipc(PathBuf::from(rest))),
            "ipc" => Err(ZrpcError::InvalidAddress(format!(
                "{} (ipc:// needs unix domain sockets)",
                s
            ))),
            "inproc" => Ok(Address::Inproc(rest.to_string())),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp(addr) => write!(f, "tcp://{}", addr),
            Address::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Address::Inproc(name) => write!(f, "inproc://{}", name),
        }
    }
}
