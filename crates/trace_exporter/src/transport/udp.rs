use super::SpanTransport;
use crate::assembler::Batch;
use crate::codec::SpanCodec;
use crate::error::TransportError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{lookup_host, UdpSocket};

/// Sends each batch as exactly one datagram to a Jaeger agent.
pub struct UdpTransport {
    socket: UdpSocket,
    codec: Arc<dyn SpanCodec>,
    max_packet_size: usize,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Resolves the agent address and connects a local socket to it.
    pub async fn connect(
        host: &str,
        port: u16,
        codec: Arc<dyn SpanCodec>,
        max_packet_size: usize,
    ) -> Result<Self, TransportError> {
        let peer = lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| TransportError::Io(format!("no address for {host}:{port}")))?;
        let local: SocketAddr = if peer.is_ipv4() {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        tracing::debug!(%peer, max_packet_size, "udp transport connected");

        Ok(Self {
            socket,
            codec,
            max_packet_size,
            peer,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl SpanTransport for UdpTransport {
    async fn send(&self, batch: Batch) -> Result<usize, TransportError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let datagram = self.codec.frame(&batch);
        if datagram.len() > self.max_packet_size {
            return Err(TransportError::OversizedDatagram {
                size: datagram.len(),
                limit: self.max_packet_size,
            });
        }

        let written = self.socket.send(&datagram).await?;
        if written != datagram.len() {
            return Err(TransportError::Io(format!(
                "short datagram write: {written} of {} bytes",
                datagram.len()
            )));
        }
        Ok(batch.len())
    }

    fn name(&self) -> &str {
        "udp"
    }
}
