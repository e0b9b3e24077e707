//! UDP directory transport.
//!
//! Every query is sent to a single gateway (the server the connection is
//! attached to), which routes it by the query's `to` field and sends the reply
//! back on the same socket.

use super::protocol::{DirectoryMessage, DirectoryQuery, DirectoryReply};
use super::{DirectoryTransport, QueryError};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Largest datagram the receive loop accepts
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Directory transport over a connected UDP socket
pub struct UdpDirectoryTransport {
    socket: Arc<UdpSocket>,
    gateway: SocketAddr,
    receiver: JoinHandle<()>,
}

impl UdpDirectoryTransport {
    /// Bind an ephemeral socket, connect it to `gateway` and start receiving
    ///
    /// Returns the transport and the channel of decoded replies, to be handed
    /// to [`super::DirectoryClient::spawn_dispatcher`].
    ///
    /// # Errors
    ///
    /// Returns error if the socket cannot be bound or connected.
    pub async fn connect(
        gateway: SocketAddr,
    ) -> Result<(Self, mpsc::UnboundedReceiver<DirectoryReply>), QueryError> {
        let bind_addr: SocketAddr = if gateway.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(gateway).await?;
        let socket = Arc::new(socket);

        let (tx, rx) = mpsc::unbounded_channel();
        let receiver = tokio::spawn(receive_loop(socket.clone(), tx));

        tracing::debug!("Directory transport connected to gateway {}", gateway);

        Ok((
            Self {
                socket,
                gateway,
                receiver,
            },
            rx,
        ))
    }

    /// Gateway address
    #[must_use]
    pub fn gateway(&self) -> SocketAddr {
        self.gateway
    }

    /// Local socket address
    ///
    /// # Errors
    ///
    /// Returns error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, QueryError> {
        Ok(self.socket.local_addr()?)
    }
}

impl DirectoryTransport for UdpDirectoryTransport {
    async fn send(&self, query: &DirectoryQuery) -> Result<(), QueryError> {
        let bytes = DirectoryMessage::Query(query.clone()).to_bytes()?;
        self.socket
            .send(&bytes)
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;
        Ok(())
    }
}

impl Drop for UdpDirectoryTransport {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, replies: mpsc::UnboundedSender<DirectoryReply>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        match socket.recv(&mut buf).await {
            Ok(len) => match DirectoryMessage::from_bytes(&buf[..len]) {
                Ok(DirectoryMessage::Reply(reply)) => {
                    if replies.send(reply).is_err() {
                        break;
                    }
                }
                Ok(other) => {
                    tracing::debug!("Ignoring unexpected {} datagram", other.message_type());
                }
                Err(e) => {
                    tracing::debug!("Ignoring undecodable datagram: {}", e);
                }
            },
            // ICMP port unreachable from a previous send surfaces here
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                tracing::debug!("Gateway refused datagram: {}", e);
            }
            Err(e) => {
                tracing::warn!("Directory transport receive error: {}", e);
                break;
            }
        }
    }
}
