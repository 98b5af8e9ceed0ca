//! # Spatial Voice Relay
//!
//! UDP relay for proximity voice chat. Every participant streams short encoded
//! audio frames tagged with its position; the relay forwards each frame only
//! to participants within hearing range.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────┐   ┌───────────────┐                ┌───────────────┐
//! │   Client A    │   │   Client B    │      ...       │   Client N    │
//! │ VoiceClient   │   │ VoiceClient   │                │ VoiceClient   │
//! └──────┬────────┘   └──────┬────────┘                └──────┬────────┘
//!        │ handshake / audio frames (UDP)                     │
//!        ▼                   ▼                                ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                RelayServer (network::server) - Single Socket        │
//! │  ┌───────────────┐   ┌────────────────────────────────────────────┐ │
//! │  │ protocol      │──▶│ RelayCore (network::relay)                 │ │
//! │  │ classify /    │   │  handshake ─▶ reply to observed address    │ │
//! │  │ decode        │   │  audio ─────▶ registry upsert              │ │
//! │  └───────────────┘   │            ─▶ plan_fanout (spatial model)  │ │
//! │                      │            ─▶ post-processor per recipient │ │
//! │                      └──────────────────────┬─────────────────────┘ │
//! │  ┌───────────────────────────┐              │ Outbound datagrams    │
//! │  │ ClientRegistry (registry) │◀── position ─┤ sent after the lock   │
//! │  │ identity -> Participant   │    feed      │ is released           │
//! │  └───────────────────────────┘   (position) ▼                       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod position;
pub mod protocol;
pub mod registry;
pub mod spatial;

pub use config::RelayConfig;
pub use error::{Error, Result};
pub use network::{RelayServer, VoiceClient};
pub use position::{PositionFeed, PositionSource, PositionUpdate};
pub use protocol::{AudioFrame, ControlMessage, Packet, PacketKind};
pub use registry::{ClientRegistry, Participant};
pub use spatial::Vec3;

/// Application-wide constants
pub mod constants {
    /// Default UDP port for the relay
    pub const DEFAULT_UDP_PORT: u16 = 50050;

    /// Default hearing range in world units
    pub const DEFAULT_MAX_RANGE: f32 = 64.0;

    /// Default codec label
    pub const DEFAULT_CODEC: &str = "opus";

    /// Duration of one audio frame in milliseconds
    pub const FRAME_DURATION_MS: u64 = 20;

    /// Default cadence for polling position sources, in milliseconds
    pub const DEFAULT_POSITION_SYNC_MS: u64 = 50;

    /// Handshake reply timeout in milliseconds
    pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 2000;

    /// Largest UDP payload over IPv4
    pub const MAX_DATAGRAM_SIZE: usize = 65_507;

    /// Default kernel socket buffer size
    pub const DEFAULT_SOCKET_BUFFER_SIZE: usize = 1024 * 1024;

    /// Upper bound between stale participant checks
    pub const STALE_CHECK_INTERVAL_SECS: u64 = 30;
}
