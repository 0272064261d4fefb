//! UDP transport implementation

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use murmur_core::{MurmurError, MurmurResult};
use murmur_wire::{Envelope, MAX_DATAGRAM_SIZE};

use crate::PortRange;

/// UDP transport for murmur
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind to a local address
    pub async fn bind(addr: SocketAddr) -> MurmurResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| MurmurError::TransportError(e.to_string()))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| MurmurError::TransportError(e.to_string()))?;

        Ok(UdpTransport {
            socket: Arc::new(socket),
            local_addr,
        })
    }

    /// Try each port of `range` in order and keep the first that binds
    pub async fn bind_in_range(ip: IpAddr, range: PortRange) -> MurmurResult<Self> {
        for port in range.ports() {
            match Self::bind(SocketAddr::new(ip, port)).await {
                Ok(transport) => {
                    tracing::info!(port, "bound UDP port");
                    return Ok(transport);
                }
                Err(e) => tracing::debug!(port, error = %e, "port unavailable"),
            }
        }

        tracing::error!(
            first = range.first(),
            last = range.last(),
            "no ports in the default range are available"
        );
        Err(MurmurError::NoUsablePort {
            first: range.first(),
            last: range.last(),
        })
    }

    /// Get local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Encode and send an envelope to a destination
    pub async fn send_to(&self, envelope: &Envelope, dest: SocketAddr) -> MurmurResult<()> {
        let bytes = envelope.encode()?;
        self.send_bytes_to(&bytes, dest).await
    }

    /// Send raw bytes to a destination
    pub async fn send_bytes_to(&self, bytes: &[u8], dest: SocketAddr) -> MurmurResult<()> {
        self.socket
            .send_to(bytes, dest)
            .await
            .map_err(|e| MurmurError::TransportError(e.to_string()))?;
        Ok(())
    }

    /// Receive and decode one envelope
    pub async fn recv_from(&self) -> MurmurResult<(Envelope, SocketAddr)> {
        let (bytes, addr) = self.recv_bytes_from().await?;
        let envelope = Envelope::decode(&bytes)?;
        Ok((envelope, addr))
    }

    /// Receive raw bytes
    pub async fn recv_bytes_from(&self) -> MurmurResult<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, addr) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| MurmurError::TransportError(e.to_string()))?;

        Ok((buf[..len].to_vec(), addr))
    }

    /// Get a clone of the socket for concurrent operations
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }
}

/// Interface address the host would use to reach `peer`. Connecting a UDP
/// socket only selects a route; nothing is sent.
pub async fn local_ip_towards(peer: SocketAddr) -> MurmurResult<IpAddr> {
    let any: IpAddr = match peer {
        SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    };
    let socket = UdpSocket::bind(SocketAddr::new(any, 0))
        .await
        .map_err(|e| MurmurError::TransportError(e.to_string()))?;
    socket
        .connect(peer)
        .await
        .map_err(|e| MurmurError::TransportError(e.to_string()))?;
    let local = socket
        .local_addr()
        .map_err(|e| MurmurError::TransportError(e.to_string()))?;
    Ok(local.ip())
}

/// Packet receiver channel
pub type PacketReceiver = mpsc::Receiver<(Vec<u8>, SocketAddr)>;

/// Packet sender channel
pub type PacketSender = mpsc::Sender<(Vec<u8>, SocketAddr)>;

/// Start a background receive loop
pub fn start_receive_loop(socket: Arc<UdpSocket>, buffer_size: usize) -> PacketReceiver {
    let (tx, rx) = mpsc::channel(buffer_size);

    tokio::spawn(async move {
        // One spare byte so an oversized datagram is seen as such and
        // rejected by the decoder instead of being silently truncated.
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, addr)) => {
                    let packet = buf[..len].to_vec();
                    if tx.send((packet, addr)).await.is_err() {
                        break; // Receiver dropped
                    }
                }
                Err(e) => {
                    tracing::warn!("UDP receive error: {}", e);
                }
            }
        }
    });

    rx
}
