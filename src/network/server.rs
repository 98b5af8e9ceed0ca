//! Relay server lifecycle
//!
//! One tokio task owns the socket and handles datagrams strictly one after
//! another. Shutdown is a `watch` channel raced against the pending receive in
//! `select!`; when it fires the task returns and drops the socket, closing it.
//! Optional background tasks (stale participant sweep, stats logging,
//! position sync) listen to the same channel.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::audio::{AudioPostProcessor, Passthrough};
use crate::config::RelayConfig;
use crate::constants::{MAX_DATAGRAM_SIZE, STALE_CHECK_INTERVAL_SECS};
use crate::error::{NetworkError, Result};
use crate::network::relay::{Outbound, RelayCore, RelayStatsSnapshot};
use crate::network::udp::create_socket;
use crate::position::{PositionFeed, PositionSource};
use crate::registry::{ClientRegistry, Participant};

/// Proximity voice relay server
pub struct RelayServer {
    core: Arc<RelayCore>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl RelayServer {
    /// Create a server with the pass-through post-processor.
    ///
    /// Fails with a configuration error if `config` does not validate.
    pub fn new(config: RelayConfig) -> Result<Self> {
        Self::with_processor(config, Arc::new(Passthrough))
    }

    /// Create a server with a custom distance post-processor
    pub fn with_processor(
        config: RelayConfig,
        processor: Arc<dyn AudioPostProcessor>,
    ) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            core: Arc::new(RelayCore::new(config, ClientRegistry::new(), processor)),
            shutdown_tx,
            tasks: Vec::new(),
            local_addr: None,
        })
    }

    /// Bind the socket and spawn the receive loop.
    ///
    /// Must be called from within a tokio runtime. Returns the bound address;
    /// calling it on a running server returns the existing address.
    pub fn start(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.local_addr {
            return Ok(addr);
        }

        let config = self.core.config();
        let socket = create_socket(config.listen_addr(), &config.socket)?;
        let local_addr = socket.local_addr()?;

        self.shutdown_tx.send_replace(false);
        self.tasks.push(tokio::spawn(receive_loop(
            self.core.clone(),
            socket,
            self.shutdown_tx.subscribe(),
        )));

        if let Some(timeout) = config.participant_timeout() {
            self.tasks.push(tokio::spawn(sweep_loop(
                self.core.registry().clone(),
                timeout,
                self.shutdown_tx.subscribe(),
            )));
        }

        if let Some(interval) = config.stats_interval() {
            self.tasks.push(tokio::spawn(stats_loop(
                self.core.clone(),
                interval,
                self.shutdown_tx.subscribe(),
            )));
        }

        tracing::info!(
            "Voice relay listening on {} (max range {}, muffling {}, {} post-processor)",
            local_addr,
            config.max_range,
            if config.muffling { "on" } else { "off" },
            self.core.processor_name()
        );

        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Start, serve until `shutdown` resolves, then stop
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start()?;
        shutdown.await;
        self.stop().await;
        Ok(())
    }

    /// Stop every server task and close the socket.
    ///
    /// Safe to call when the server was never started, and more than once.
    pub async fn stop(&mut self) {
        self.shutdown_tx.send_replace(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!("Relay task ended abnormally: {}", e);
            }
        }

        if let Some(addr) = self.local_addr.take() {
            let stats = self.stats();
            tracing::info!(
                "Voice relay on {} stopped: {} datagrams in, {} out, {} invalid, {} send failures",
                addr,
                stats.datagrams_received,
                stats.datagrams_sent,
                stats.invalid_datagrams,
                stats.send_failures
            );
        }
    }

    /// Poll `source` into the registry every `position_sync_ms` for as long
    /// as the server runs
    pub fn attach_position_source<S>(&mut self, source: S)
    where
        S: PositionSource + 'static,
    {
        let interval = self.core.config().position_sync_interval();
        let handle = self
            .position_feed()
            .spawn_sync(source, interval, self.shutdown_tx.subscribe());
        self.tasks.push(handle);
    }

    /// Handle for external position updates
    pub fn position_feed(&self) -> PositionFeed {
        PositionFeed::new(self.core.registry().clone())
    }

    /// Drop a participant, e.g. on disconnect
    pub fn remove_participant(&self, identity: &str) -> Option<Participant> {
        self.core.registry().remove(identity)
    }

    pub fn registry(&self) -> &ClientRegistry {
        self.core.registry()
    }

    pub fn config(&self) -> &RelayConfig {
        self.core.config()
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.core.stats().snapshot()
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.local_addr.is_some()
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// Receive, handle and fan out datagrams until shutdown
async fn receive_loop(
    core: Arc<RelayCore>,
    socket: UdpSocket,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, from)) => {
                        let outbound = core.handle_datagram(&buf[..len], from);
                        send_all(&core, &socket, outbound).await;
                    }
                    Err(e) if is_closed(&e) => break,
                    Err(e) => {
                        // ICMP unreachable from a departed client surfaces here on some platforms
                        tracing::debug!("{}", NetworkError::ReceiveFailed(e.to_string()));
                    }
                }
            }
        }
    }

    tracing::debug!("Receive loop on {:?} exited", socket.local_addr().ok());
}

/// Send every outbound datagram; a failed send only affects its recipient
async fn send_all(core: &RelayCore, socket: &UdpSocket, outbound: Vec<Outbound>) {
    for datagram in outbound {
        match socket.send_to(&datagram.bytes, datagram.to).await {
            Ok(sent) => {
                core.stats().record_sent(sent);
                if let Some(delivery) = &datagram.delivery {
                    tracing::trace!(
                        "Relayed to {} at {} (gain {:.3}, pan {:.2}/{:.2})",
                        delivery.identity,
                        datagram.to,
                        delivery.gain,
                        delivery.pan.0,
                        delivery.pan.1
                    );
                }
            }
            Err(e) => {
                core.stats().record_send_failure();
                tracing::warn!(
                    "{}",
                    NetworkError::SendFailed {
                        to: datagram.to,
                        reason: e.to_string(),
                    }
                );
            }
        }
    }
}

fn is_closed(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionAborted
    )
}

/// Periodically evict participants that stopped sending and updating
async fn sweep_loop(
    registry: ClientRegistry,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let check_every = (timeout / 2).clamp(
        Duration::from_millis(100),
        Duration::from_secs(STALE_CHECK_INTERVAL_SECS),
    );
    let mut ticker = tokio::time::interval(check_every);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                for identity in registry.remove_stale(timeout) {
                    tracing::info!("Participant {} timed out after {:?}", identity, timeout);
                }
            }
        }
    }
}

/// Periodically log relay counters
async fn stats_loop(
    core: Arc<RelayCore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let stats = core.stats().snapshot();
                tracing::info!(
                    "Relay stats: {} participants, {} frames relayed, {} datagrams sent \
                     ({:.1} KB), {} handshakes, {} invalid, {} send failures",
                    core.registry().len(),
                    stats.frames_relayed,
                    stats.datagrams_sent,
                    stats.bytes_sent as f64 / 1024.0,
                    stats.handshakes,
                    stats.invalid_datagrams,
                    stats.send_failures
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, Error};

    #[test]
    fn test_invalid_config_rejected_before_start() {
        let result = RelayServer::new(RelayConfig {
            max_range: 0.0,
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::Config(ConfigError::InvalidMaxRange(_)))));
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let mut server = RelayServer::new(RelayConfig::default()).unwrap();
        server.stop().await;
        server.stop().await;
        assert!(!server.is_running());
    }
}
