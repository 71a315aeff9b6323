use std::collections::HashMap;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use siprail_sip_core::Message;

use crate::error::{Error, Result};

/// Wire protocol a message travels over.
///
/// Reliability decides timer behavior upstream: reliable transports
/// suppress retransmissions and skip the lingering wait states that
/// exist only to absorb UDP re-sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Udp,
    Tcp,
    Tls,
    Ws,
}

impl TransportKind {
    pub fn is_reliable(&self) -> bool {
        !matches!(self, TransportKind::Udp)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Udp => "UDP",
            TransportKind::Tcp => "TCP",
            TransportKind::Tls => "TLS",
            TransportKind::Ws => "WS",
        }
    }

    /// Default port for this transport when the URI names none
    pub fn default_port(&self) -> u16 {
        match self {
            TransportKind::Tls => 5061,
            _ => 5060,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "UDP" => Ok(TransportKind::Udp),
            "TCP" => Ok(TransportKind::Tcp),
            "TLS" => Ok(TransportKind::Tls),
            "WS" => Ok(TransportKind::Ws),
            other => Err(Error::Resolve(format!("unknown transport {other}"))),
        }
    }
}

/// Events surfaced by a running transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A complete SIP message arrived
    MessageReceived {
        message: Message,
        source: SocketAddr,
        destination: SocketAddr,
    },
    /// A receive or parse problem that did not stop the transport
    Error { error: String },
    /// The transport shut down; no further events follow
    Closed,
}

/// A bound transport able to push bytes toward a destination
pub trait Transport: Send + Sync + fmt::Debug {
    fn kind(&self) -> TransportKind;

    fn local_addr(&self) -> Result<SocketAddr>;

    fn send_to(&self, bytes: &[u8], destination: SocketAddr) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Renders and sends a full message
    fn send_message(&self, message: &Message, destination: SocketAddr) -> Result<()> {
        self.send_to(&message.to_wire(), destination)
    }
}

/// Registry of bound transports, one per kind.
///
/// This is the raw send seam the upper layers hold: bytes, a host, a
/// port and a transport kind. Host names are resolved to a socket
/// address here, so callers can hand over SRV targets untouched.
#[derive(Default)]
pub struct TransportPool {
    slots: RwLock<HashMap<TransportKind, Arc<dyn Transport>>>,
}

impl TransportPool {
    pub fn new() -> Self {
        TransportPool {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a transport under its own kind, replacing any previous
    /// one of the same kind
    pub fn register(&self, transport: Arc<dyn Transport>) {
        debug!(kind = %transport.kind(), "Transport registered");
        self.slots.write().insert(transport.kind(), transport);
    }

    pub fn get(&self, kind: TransportKind) -> Option<Arc<dyn Transport>> {
        self.slots.read().get(&kind).cloned()
    }

    /// Sends raw bytes to `host:port` over the transport of `kind`
    pub fn send(&self, bytes: &[u8], host: &str, port: u16, kind: TransportKind) -> Result<()> {
        let transport = self.get(kind).ok_or(Error::UnsupportedTransport(kind))?;
        let destination = first_addr(host, port)?;
        transport.send_to(bytes, destination)
    }

    /// Closes every registered transport
    pub fn close_all(&self) {
        for transport in self.slots.read().values() {
            let _ = transport.close();
        }
    }
}

fn first_addr(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::Resolve(format!("{host}:{port}: {e}")))?
        .next()
        .ok_or_else(|| Error::Resolve(format!("{host}:{port}: no addresses")))
}
