//! Voice Probe
//!
//! Test client: performs the handshake, then streams silent frames while
//! walking in a circle and logs every frame relayed to it.
//!
//! Usage: `voice-probe [SERVER_ADDR] [IDENTITY] [RADIUS]`

use anyhow::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spatial_voice_relay::{
    constants::*,
    spatial::{attenuation, distance, stereo_pan},
    Vec3, VoiceClient,
};

/// Payload size of a 20 ms Opus voice frame at 24 kbps
const PROBE_PAYLOAD_SIZE: usize = 60;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let server_addr: SocketAddr = args
        .next()
        .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_UDP_PORT))
        .parse()?;
    let identity = args
        .next()
        .unwrap_or_else(|| format!("probe-{}", std::process::id()));
    let radius: f32 = match args.next() {
        Some(r) => r.parse()?,
        None => 8.0,
    };

    let mut client = VoiceClient::bind(identity.clone(), "0.0.0.0:0".parse()?)?;
    tracing::info!("Probe {} bound to {}", identity, client.local_addr()?);

    client
        .handshake(server_addr, Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS))
        .await?;

    let payload = vec![0u8; PROBE_PAYLOAD_SIZE];
    let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_DURATION_MS));
    let mut frames_sent: u64 = 0;
    let mut position = Vec3::zeros();
    let mut direction = Vec3::new(1.0, 0.0, 0.0);

    tracing::info!("Streaming - press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let angle = frames_sent as f32 * 0.01;
                position = Vec3::new(radius * angle.cos(), 0.0, radius * angle.sin());
                direction = Vec3::new(-angle.sin(), 0.0, angle.cos());

                if let Err(e) = client.send_audio(payload.clone(), position, direction).await {
                    tracing::warn!("Failed to send frame: {}", e);
                }
                frames_sent += 1;
                if frames_sent % 500 == 0 {
                    tracing::info!("{} frames sent", frames_sent);
                }
            }
            received = client.recv_audio() => {
                match received {
                    Ok(frame) => {
                        let d = distance(&frame.position, &position);
                        let (left, right) = stereo_pan(&frame.position, &position, &direction);
                        tracing::info!(
                            "Heard {} at {:.1} units (gain {:.3}, L {:.2} / R {:.2}, {} bytes)",
                            frame.identity,
                            d,
                            attenuation(d, DEFAULT_MAX_RANGE),
                            left,
                            right,
                            frame.payload.len()
                        );
                    }
                    Err(e) => tracing::warn!("Receive failed: {}", e),
                }
            }
        }
    }

    tracing::info!("Probe stopped after {} frames", frames_sent);
    Ok(())
}
