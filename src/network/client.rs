//! Voice client endpoint
//!
//! Network side of a game client: learns the relay endpoint through the
//! handshake, refuses to send audio until it has one, and filters its own
//! frames out of whatever it receives.

use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

use crate::config::SocketConfig;
use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::{NetworkError, Result};
use crate::network::udp::create_socket;
use crate::protocol::{AudioFrame, ControlMessage};
use crate::spatial::Vec3;

/// UDP endpoint of one voice chat participant
pub struct VoiceClient {
    socket: UdpSocket,
    identity: String,
    /// Relay endpoint resolved by the handshake
    server: Option<SocketAddr>,
}

impl VoiceClient {
    /// Bind a client socket. Use port 0 for an ephemeral port.
    pub fn bind(identity: impl Into<String>, local: SocketAddr) -> Result<Self> {
        let socket = create_socket(local, &SocketConfig::default())?;
        Ok(Self {
            socket,
            identity: identity.into(),
            server: None,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Relay endpoint, once the handshake has succeeded
    pub fn server_endpoint(&self) -> Option<SocketAddr> {
        self.server
    }

    /// Ask the relay at `target` for its endpoint.
    ///
    /// Datagrams that are not control messages are ignored while waiting.
    /// Any control message other than a handshake reply fails the handshake.
    pub async fn handshake(&mut self, target: SocketAddr, timeout: Duration) -> Result<SocketAddr> {
        self.socket
            .send_to(&ControlMessage::HandshakeRequest.encode(), target)
            .await
            .map_err(|e| NetworkError::SendFailed {
                to: target,
                reason: e.to_string(),
            })?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (len, from) = tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf))
                .await
                .map_err(|_| NetworkError::Timeout)?
                .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

            match ControlMessage::decode(&buf[..len]) {
                Ok(ControlMessage::HandshakeReply {
                    server_ip,
                    server_port,
                }) => {
                    let endpoint = SocketAddr::new(server_ip, server_port);
                    tracing::info!("Handshake successful, relay endpoint {}", endpoint);
                    self.server = Some(endpoint);
                    return Ok(endpoint);
                }
                Ok(other) => {
                    tracing::error!("Invalid handshake response from {}", from);
                    let reason = format!("unexpected {:?} from {}", other.type_str(), from);
                    return Err(NetworkError::HandshakeRejected(reason).into());
                }
                Err(e) => {
                    tracing::debug!("Ignoring datagram from {} during handshake: {}", from, e);
                }
            }
        }
    }

    /// Send one encoded audio frame to the relay.
    ///
    /// Fails with [`NetworkError::NotConnected`] until a handshake succeeded.
    pub async fn send_audio(
        &self,
        payload: impl Into<Bytes>,
        position: Vec3,
        direction: Vec3,
    ) -> Result<()> {
        let server = self.server.ok_or(NetworkError::NotConnected)?;

        let frame = AudioFrame::new(self.identity.clone(), payload, position, direction);
        if frame.encoded_len() > MAX_DATAGRAM_SIZE {
            return Err(NetworkError::PacketTooLarge(frame.encoded_len()).into());
        }

        self.socket
            .send_to(&frame.encode(), server)
            .await
            .map_err(|e| NetworkError::SendFailed {
                to: server,
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Wait for the next relayed frame from another participant.
    ///
    /// Undecodable datagrams and frames carrying this client's own identity
    /// are dropped.
    pub async fn recv_audio(&self) -> Result<AudioFrame> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, from) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

            match AudioFrame::decode(&buf[..len]) {
                Ok(frame) if frame.identity == self.identity => continue,
                Ok(frame) => return Ok(frame),
                Err(e) => {
                    tracing::debug!("Dropping datagram from {}: {}", from, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_send_requires_handshake() {
        let client = VoiceClient::bind("me", loopback()).unwrap();
        let err = client.send_audio(vec![1u8], Vec3::zeros(), Vec3::zeros()).await.unwrap_err();
        assert!(matches!(err, Error::Network(NetworkError::NotConnected)));
    }

    #[tokio::test]
    async fn test_handshake_times_out() {
        let silent = UdpSocket::bind(loopback()).await.unwrap();
        let mut client = VoiceClient::bind("me", loopback()).unwrap();

        let err = client
            .handshake(silent.local_addr().unwrap(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(NetworkError::Timeout)));
        assert!(client.server_endpoint().is_none());
    }

    #[tokio::test]
    async fn test_handshake_rejects_wrong_reply() {
        let fake = UdpSocket::bind(loopback()).await.unwrap();
        let fake_addr = fake.local_addr().unwrap();
        let mut client = VoiceClient::bind("me", loopback()).unwrap();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let (_, from) = fake.recv_from(&mut buf).await.unwrap();
            fake.send_to(&ControlMessage::HandshakeRequest.encode(), from).await.unwrap();
        });

        let err = client.handshake(fake_addr, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, Error::Network(NetworkError::HandshakeRejected(_))));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_recv_drops_own_frames() {
        let peer = UdpSocket::bind(loopback()).await.unwrap();
        let client = VoiceClient::bind("me", loopback()).unwrap();
        let client_addr = client.local_addr().unwrap();

        let own = AudioFrame::new("me", vec![1u8], Vec3::zeros(), Vec3::zeros());
        let other = AudioFrame::new("them", vec![2u8], Vec3::zeros(), Vec3::zeros());
        peer.send_to(&own.encode(), client_addr).await.unwrap();
        peer.send_to(&[0xff, 0xff], client_addr).await.unwrap();
        peer.send_to(&other.encode(), client_addr).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), client.recv_audio())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, other);
    }
}
