//! SIP transport layer for the siprail stack
//!
//! This crate owns the socket plumbing and next-hop selection the rest
//! of the stack treats as collaborators: a [`Transport`] pushes rendered
//! bytes toward a destination and feeds received messages into an event
//! channel, the [`TransportPool`] is the bytes/host/port/kind send seam,
//! and [`resolve`] walks RFC 3263 candidate hops lazily.
//!
//! Only UDP is concretely implemented; the [`Transport`] trait is the
//! seam where TCP, TLS or WebSocket would slot in.

mod error;
pub mod resolve;
pub mod transport;
mod udp;

pub use error::{Error, Result};
pub use resolve::{resolve, Hop, HopIter, NaptrRecord, RecordSource, SrvRecord, StaticSource};
pub use transport::{Transport, TransportEvent, TransportKind, TransportPool};
pub use udp::{UdpTransport, MAX_UDP_PACKET_SIZE};

/// Simplified bind for the common UDP case
pub fn bind_udp(
    addr: std::net::SocketAddr,
) -> Result<(UdpTransport, crossbeam_channel::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr, None)
}

/// Re-export of common types for easier use
pub mod prelude {
    pub use super::{
        bind_udp, resolve, Error, Hop, RecordSource, Result, StaticSource, Transport,
        TransportEvent, TransportKind, TransportPool, UdpTransport,
    };
}
