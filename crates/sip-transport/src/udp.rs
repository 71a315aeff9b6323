use std::fmt;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info, trace, warn};

use siprail_sip_core::parse_message;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent, TransportKind};

// Maximum UDP packet size
pub const MAX_UDP_PACKET_SIZE: usize = 65_507;
// Buffer size for receiving packets
const UDP_BUFFER_SIZE: usize = 8192;
// Default channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 100;
// Receive timeout; bounds how long close() takes to be observed
const RECV_TIMEOUT: Duration = Duration::from_millis(250);

/// UDP transport for SIP messages.
///
/// One datagram is one message: each received packet is parsed whole
/// and surfaced as a [`TransportEvent`]. Malformed packets become
/// `Error` events and never stop the receive loop.
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: UdpSocket,
    closed: AtomicBool,
    events_tx: Sender<TransportEvent>,
}

impl UdpTransport {
    /// Binds a socket and starts the receive thread.
    ///
    /// Returns the transport handle and the event stream fed by the
    /// receive thread. Dropping the receiver ends the thread.
    pub fn bind(
        addr: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, Receiver<TransportEvent>)> {
        let socket = UdpSocket::bind(addr).map_err(|e| Error::BindFailed(addr, e))?;
        // A blocking recv would pin the thread forever across close();
        // a short timeout lets it notice the flag
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;

        let local_addr = socket.local_addr()?;
        info!("SIP UDP transport bound to {}", local_addr);

        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = bounded(capacity);

        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                socket,
                closed: AtomicBool::new(false),
                events_tx,
            }),
        };
        transport.spawn_receive_loop()?;

        Ok((transport, events_rx))
    }

    fn spawn_receive_loop(&self) -> Result<()> {
        let transport = self.clone();
        thread::Builder::new()
            .name("siprail-udp-recv".into())
            .spawn(move || transport.receive_loop())?;
        Ok(())
    }

    fn receive_loop(&self) {
        let inner = &self.inner;
        let mut buffer = vec![0u8; UDP_BUFFER_SIZE];

        while !inner.closed.load(Ordering::Relaxed) {
            let (len, src) = match inner.socket.recv_from(&mut buffer) {
                Ok(pair) => pair,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) => {
                    if inner.closed.load(Ordering::Relaxed) {
                        break;
                    }
                    error!("Error receiving UDP packet: {}", e);
                    let _ = inner.events_tx.send(TransportEvent::Error {
                        error: format!("Error receiving packet: {e}"),
                    });
                    continue;
                }
            };

            let local_addr = match inner.socket.local_addr() {
                Ok(addr) => addr,
                Err(e) => {
                    error!("Error getting local address: {}", e);
                    continue;
                }
            };

            let packet = Bytes::copy_from_slice(&buffer[..len]);
            trace!("Received {} bytes from {}", packet.len(), src);

            match parse_message(&packet) {
                Ok(message) => {
                    let event = TransportEvent::MessageReceived {
                        message,
                        source: src,
                        destination: local_addr,
                    };
                    if inner.events_tx.send(event).is_err() {
                        debug!("Event receiver dropped, stopping receive loop");
                        break;
                    }
                }
                Err(e) => {
                    warn!("Error parsing SIP message from {}: {}", src, e);
                    let _ = inner.events_tx.send(TransportEvent::Error {
                        error: format!("Error parsing SIP message: {e}"),
                    });
                }
            }
        }

        let _ = inner.events_tx.send(TransportEvent::Closed);
        info!("UDP receive loop terminated");
    }
}

impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.socket.local_addr().map_err(Error::from)
    }

    fn send_to(&self, bytes: &[u8], destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        if bytes.len() > MAX_UDP_PACKET_SIZE {
            return Err(Error::PacketTooLarge(bytes.len(), MAX_UDP_PACKET_SIZE));
        }
        self.inner
            .socket
            .send_to(bytes, destination)
            .map_err(|e| Error::SendFailed(destination, e))?;
        trace!("Sent {} bytes to {}", bytes.len(), destination);
        Ok(())
    }

    /// Flags the transport closed; the receive thread exits within one
    /// read timeout
    fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(addr) = self.inner.socket.local_addr() {
            write!(f, "UdpTransport({})", addr)
        } else {
            write!(f, "UdpTransport(<error>)")
        }
    }
}
