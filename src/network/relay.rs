//! Per-datagram relay logic
//!
//! [`RelayCore`] turns one inbound datagram into the datagrams that should go
//! out in response. It updates the registry but performs no socket I/O, so the
//! receive loop can send the result after every lock has been released.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::{AudioPostProcessor, EffectContext};
use crate::config::RelayConfig;
use crate::network::fanout::{plan_fanout, Delivery};
use crate::protocol::{AudioFrame, ControlMessage, Packet};
use crate::registry::ClientRegistry;

/// A datagram to send
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Destination
    pub to: SocketAddr,
    /// Encoded datagram
    pub bytes: Bytes,
    /// Fan-out details for relayed audio, `None` for control replies
    pub delivery: Option<Delivery>,
}

/// Relay counters
#[derive(Debug, Default)]
pub struct RelayStats {
    datagrams_received: AtomicU64,
    bytes_received: AtomicU64,
    handshakes: AtomicU64,
    frames_relayed: AtomicU64,
    datagrams_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_failures: AtomicU64,
    invalid_datagrams: AtomicU64,
}

impl RelayStats {
    pub fn record_sent(&self, bytes: usize) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time copy of the counters
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            handshakes: self.handshakes.load(Ordering::Relaxed),
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            invalid_datagrams: self.invalid_datagrams.load(Ordering::Relaxed),
        }
    }
}

/// Relay statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    pub datagrams_received: u64,
    pub bytes_received: u64,
    pub handshakes: u64,
    pub frames_relayed: u64,
    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
    pub invalid_datagrams: u64,
}

/// Handshake and relay state machine shared by the server tasks
pub struct RelayCore {
    config: RelayConfig,
    registry: ClientRegistry,
    processor: Arc<dyn AudioPostProcessor>,
    stats: RelayStats,
}

impl RelayCore {
    /// Create a relay core. `config` is expected to be validated.
    pub fn new(
        config: RelayConfig,
        registry: ClientRegistry,
        processor: Arc<dyn AudioPostProcessor>,
    ) -> Self {
        Self {
            config,
            registry,
            processor,
            stats: RelayStats::default(),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    pub fn processor_name(&self) -> &'static str {
        self.processor.name()
    }

    /// Process one inbound datagram and return what to send in response.
    ///
    /// Malformed datagrams are counted, logged at debug level and dropped.
    pub fn handle_datagram(&self, data: &[u8], from: SocketAddr) -> Vec<Outbound> {
        self.stats.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_received.fetch_add(data.len() as u64, Ordering::Relaxed);

        match Packet::decode(data) {
            Ok(Packet::Control(ControlMessage::HandshakeRequest)) => {
                vec![self.handshake_reply(from)]
            }
            Ok(Packet::Control(other)) => {
                tracing::debug!("Ignoring {} from {}", other.type_str(), from);
                Vec::new()
            }
            Ok(Packet::Audio(frame)) => self.relay_audio(frame, from),
            Err(e) => {
                self.stats.invalid_datagrams.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Discarding {} byte datagram from {}: {}", data.len(), from, e);
                Vec::new()
            }
        }
    }

    /// Reply with the address this datagram was observed from and the
    /// configured listening port
    fn handshake_reply(&self, from: SocketAddr) -> Outbound {
        self.stats.handshakes.fetch_add(1, Ordering::Relaxed);

        let reply = ControlMessage::HandshakeReply {
            server_ip: from.ip().to_canonical(),
            server_port: self.config.port,
        };
        tracing::debug!("Handshake from {}, replying with port {}", from, self.config.port);

        Outbound {
            to: from,
            bytes: reply.encode(),
            delivery: None,
        }
    }

    fn relay_audio(&self, frame: AudioFrame, from: SocketAddr) -> Vec<Outbound> {
        let sender = self
            .registry
            .upsert_from_audio(&frame.identity, frame.position, frame.direction, Some(from));
        let others = self.registry.for_each_other(&frame.identity);
        let deliveries = plan_fanout(&sender, &others, self.config.max_range);

        self.stats.frames_relayed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            "Frame from {} ({} bytes) -> {} of {} participants",
            frame.identity,
            frame.payload.len(),
            deliveries.len(),
            others.len()
        );

        if !self.config.muffling {
            let shared = frame.encode();
            return deliveries
                .into_iter()
                .map(|delivery| Outbound {
                    to: delivery.endpoint,
                    bytes: shared.clone(),
                    delivery: Some(delivery),
                })
                .collect();
        }

        deliveries
            .into_iter()
            .map(|delivery| {
                let ctx = EffectContext {
                    distance: delivery.distance,
                    max_range: self.config.max_range,
                    gain: delivery.gain,
                    pan: delivery.pan,
                };
                let relayed = AudioFrame {
                    identity: frame.identity.clone(),
                    payload: self.processor.process(&frame.payload, &ctx),
                    position: sender.position,
                    direction: sender.direction,
                };
                Outbound {
                    to: delivery.endpoint,
                    bytes: relayed.encode(),
                    delivery: Some(delivery),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Passthrough;
    use crate::spatial::{attenuation, Vec3};
    use std::net::IpAddr;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn core(config: RelayConfig) -> RelayCore {
        RelayCore::new(config, ClientRegistry::new(), Arc::new(Passthrough))
    }

    fn frame(id: &str, x: f32) -> Bytes {
        let direction = Vec3::new(1.0, 0.0, 0.0);
        AudioFrame::new(id, vec![7u8; 12], Vec3::new(x, 0.0, 0.0), direction).encode()
    }

    /// Reverses the payload, so tests can tell it ran
    struct Reverse;

    impl AudioPostProcessor for Reverse {
        fn process(&self, payload: &Bytes, _ctx: &EffectContext) -> Bytes {
            payload.iter().rev().copied().collect::<Vec<u8>>().into()
        }
    }

    #[test]
    fn test_handshake_reply_uses_observed_address() {
        let core = core(RelayConfig {
            port: 50050,
            ..Default::default()
        });
        let from = addr("203.0.113.5:40000");

        let out = core.handle_datagram(&ControlMessage::HandshakeRequest.encode(), from);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, from);
        assert!(out[0].delivery.is_none());
        match ControlMessage::decode(&out[0].bytes).unwrap() {
            ControlMessage::HandshakeReply {
                server_ip,
                server_port,
            } => {
                assert_eq!(server_ip.to_string(), "203.0.113.5");
                assert_eq!(server_port, 50050);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(core.registry().is_empty());
        assert_eq!(core.stats().snapshot().handshakes, 1);
    }

    #[test]
    fn test_handshake_reply_unmaps_ipv4_mapped_source() {
        let core = core(RelayConfig::default());
        let from = addr("[::ffff:198.51.100.7]:1234");
        let out = core.handle_datagram(&ControlMessage::HandshakeRequest.encode(), from);
        match ControlMessage::decode(&out[0].bytes).unwrap() {
            ControlMessage::HandshakeReply { server_ip, .. } => {
                assert_eq!(server_ip, "198.51.100.7".parse::<IpAddr>().unwrap());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fanout_scenario() {
        let core = core(RelayConfig {
            max_range: 64.0,
            ..Default::default()
        });
        let (a, b, c) = (addr("10.0.0.1:1"), addr("10.0.0.2:2"), addr("10.0.0.3:3"));

        // Register B and C by having them speak first
        core.handle_datagram(&frame("B", 10.0), b);
        core.handle_datagram(&frame("C", 1000.0), c);

        let out = core.handle_datagram(&frame("A", 0.0), a);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, b);
        let delivery = out[0].delivery.as_ref().unwrap();
        assert_eq!(delivery.gain, attenuation(10.0, 64.0));

        let relayed = AudioFrame::decode(&out[0].bytes).unwrap();
        assert_eq!(relayed.identity, "A");
        assert_eq!(relayed.position, Vec3::zeros());
        assert_eq!(relayed.payload.len(), 12);
    }

    #[test]
    fn test_nan_position_frame_not_relayed() {
        let core = core(RelayConfig::default());
        core.handle_datagram(&frame("FAR", 100_000.0), addr("10.0.0.9:9"));
        core.handle_datagram(&frame("NEAR", 1.0), addr("10.0.0.8:8"));

        let out = core.handle_datagram(&frame("A", f32::NAN), addr("10.0.0.1:1"));
        assert!(out.is_empty());
    }

    #[test]
    fn test_sender_endpoint_recorded() {
        let core = core(RelayConfig::default());
        let from = addr("192.0.2.10:7000");
        core.handle_datagram(&frame("A", 3.0), from);

        let participant = core.registry().get("A").unwrap();
        assert_eq!(participant.endpoint, Some(from));
        assert_eq!(participant.position.x, 3.0);
    }

    #[test]
    fn test_corrupt_datagram_is_dropped() {
        let core = core(RelayConfig::default());
        let bytes = frame("A", 0.0);

        assert!(core.handle_datagram(&bytes[..bytes.len() - 3], addr("10.0.0.1:1")).is_empty());
        assert!(core.handle_datagram(&[], addr("10.0.0.1:1")).is_empty());
        assert!(core.registry().is_empty());
        assert_eq!(core.stats().snapshot().invalid_datagrams, 2);

        // Still serving afterwards
        core.handle_datagram(&frame("B", 1.0), addr("10.0.0.2:2"));
        assert_eq!(core.handle_datagram(&frame("A", 0.0), addr("10.0.0.1:1")).len(), 1);
    }

    #[test]
    fn test_processor_applied_only_with_muffling() {
        let b = addr("10.0.0.2:2");
        let payload = |out: &[Outbound]| AudioFrame::decode(&out[0].bytes).unwrap().payload;
        let input = AudioFrame::new("A", vec![1u8, 2, 3], Vec3::zeros(), Vec3::zeros()).encode();

        let muffled =
            RelayCore::new(RelayConfig::default(), ClientRegistry::new(), Arc::new(Reverse));
        muffled.handle_datagram(&frame("B", 1.0), b);
        let out = muffled.handle_datagram(&input, addr("10.0.0.1:1"));
        assert_eq!(&payload(&out)[..], &[3, 2, 1]);

        let plain = RelayCore::new(
            RelayConfig {
                muffling: false,
                ..Default::default()
            },
            ClientRegistry::new(),
            Arc::new(Reverse),
        );
        plain.handle_datagram(&frame("B", 1.0), b);
        let out = plain.handle_datagram(&input, addr("10.0.0.1:1"));
        assert_eq!(&payload(&out)[..], &[1, 2, 3]);
    }

    #[test]
    fn test_stray_reply_is_ignored() {
        let core = core(RelayConfig::default());
        let reply = ControlMessage::HandshakeReply {
            server_ip: "127.0.0.1".parse().unwrap(),
            server_port: 50050,
        };
        assert!(core.handle_datagram(&reply.encode(), addr("10.0.0.1:1")).is_empty());
        assert!(core.registry().is_empty());
    }
}
