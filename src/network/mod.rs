//! Network subsystem: UDP relay server, fan-out and client endpoint

pub mod client;
pub mod fanout;
pub mod relay;
pub mod server;
pub mod udp;

pub use client::VoiceClient;
pub use fanout::{plan_fanout, Delivery};
pub use relay::{Outbound, RelayCore, RelayStats, RelayStatsSnapshot};
pub use server::RelayServer;
pub use udp::create_socket;
