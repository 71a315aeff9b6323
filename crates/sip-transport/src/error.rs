use std::net::SocketAddr;

use thiserror::Error;

use crate::transport::TransportKind;

/// Transport layer errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, #[source] std::io::Error),

    #[error("Failed to send to {0}: {1}")]
    SendFailed(SocketAddr, #[source] std::io::Error),

    #[error("Packet too large: {0} bytes (max {1})")]
    PacketTooLarge(usize, usize),

    #[error("Transport closed")]
    TransportClosed,

    #[error("No transport registered for {0}")]
    UnsupportedTransport(TransportKind),

    #[error("Cannot resolve {0}")]
    Resolve(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
