use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use crate::error::Result;

/// UDP sender for finished media packets.
///
/// Address-only: it knows nothing about sessions. Callers resolve the
/// client's address from [`SessionState`](crate::session::SessionState)
/// and the negotiated port before calling [`send_to`](Self::send_to).
#[derive(Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind an ephemeral UDP socket on all interfaces.
    pub fn bind() -> Result<Self> {
        Self::bind_addr("0.0.0.0:0")
    }

    pub fn bind_addr(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        tracing::debug!(local = ?socket.local_addr().ok(), "UDP sender bound");
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send raw bytes to a specific socket address.
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(payload, addr)?)
    }

    /// Send packets in order, stopping at the first failure.
    pub fn send_all<P: AsRef<[u8]>>(&self, packets: &[P], addr: SocketAddr) -> Result<usize> {
        let mut sent = 0;
        for packet in packets {
            sent += self.send_to(packet.as_ref(), addr)?;
        }
        tracing::trace!(%addr, packets = packets.len(), bytes = sent, "packets sent");
        Ok(sent)
    }
}
