//! Position feed from the host game
//!
//! The game pushes player positions independently of audio traffic, so a
//! listener who is silent still has an up-to-date position. Updates for
//! players that have not sent audio yet create placeholder participants with
//! no endpoint.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::registry::{ClientRegistry, Participant};
use crate::spatial::Vec3;

/// One player's spatial state as reported by the game
#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    pub identity: String,
    pub position: Vec3,
    pub direction: Vec3,
}

impl PositionUpdate {
    pub fn new(identity: impl Into<String>, position: Vec3, direction: Vec3) -> Self {
        Self {
            identity: identity.into(),
            position,
            direction,
        }
    }
}

/// Game-side provider of player positions, polled on every sync tick
pub trait PositionSource: Send {
    fn poll_positions(&mut self) -> Vec<PositionUpdate>;
}

impl<F> PositionSource for F
where
    F: FnMut() -> Vec<PositionUpdate> + Send,
{
    fn poll_positions(&mut self) -> Vec<PositionUpdate> {
        self()
    }
}

/// Entry point for external position updates
#[derive(Clone)]
pub struct PositionFeed {
    registry: ClientRegistry,
}

impl PositionFeed {
    pub fn new(registry: ClientRegistry) -> Self {
        Self { registry }
    }

    /// Refresh one participant's position and direction
    pub fn update_participant(
        &self,
        identity: &str,
        position: Vec3,
        direction: Vec3,
    ) -> Participant {
        self.registry.upsert_from_position_feed(identity, position, direction)
    }

    /// Apply a batch of updates
    pub fn apply(&self, updates: &[PositionUpdate]) {
        for update in updates {
            self.update_participant(&update.identity, update.position, update.direction);
        }
    }

    /// Drop a participant, e.g. when the player disconnects
    pub fn remove_participant(&self, identity: &str) -> Option<Participant> {
        self.registry.remove(identity)
    }

    /// Poll `source` every `interval` and push its updates into the registry
    /// until `shutdown` turns true or its sender is dropped.
    pub fn spawn_sync<S>(
        &self,
        mut source: S,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()>
    where
        S: PositionSource + 'static,
    {
        let feed = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let updates = source.poll_positions();
                        feed.apply(&updates);
                    }
                }
            }
            tracing::debug!("Position sync stopped");
        })
    }
}
