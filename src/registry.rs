//! Participant registry
//!
//! The registry is the single owner of participant state. Both the receive
//! loop and the position feed mutate it concurrently, so every operation takes
//! the one lock guarding the whole map, does its work, and releases it before
//! returning. Callers get owned copies and never hold the lock across I/O.
//!
//! State is in-memory only and lost on restart.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::spatial::{self, Vec3};

/// A registered voice chat participant
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    /// Stable identity (player UID)
    pub identity: String,
    /// Last observed network endpoint, unknown until the first audio frame
    pub endpoint: Option<SocketAddr>,
    /// World position
    pub position: Vec3,
    /// Facing or motion direction
    pub direction: Vec3,
    /// Time of the last audio frame or position update
    pub last_update: DateTime<Utc>,
}

impl Participant {
    fn new(identity: &str, position: Vec3, direction: Vec3, endpoint: Option<SocketAddr>) -> Self {
        Self {
            identity: identity.to_string(),
            endpoint,
            position,
            direction,
            last_update: Utc::now(),
        }
    }

    /// Distance to another participant
    pub fn distance_to(&self, other: &Participant) -> f32 {
        spatial::distance(&self.position, &other.position)
    }

    /// Whether relayed audio can be delivered to this participant
    pub fn is_reachable(&self) -> bool {
        self.endpoint.is_some()
    }
}

/// Concurrent identity -> participant store
///
/// Cloning yields another handle to the same map.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    participants: Arc<RwLock<HashMap<String, Participant>>>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an audio frame from `identity`.
    ///
    /// Creates the participant if unknown, otherwise updates position and
    /// direction. A provided endpoint replaces the stored one (latest wins).
    pub fn upsert_from_audio(
        &self,
        identity: &str,
        position: Vec3,
        direction: Vec3,
        endpoint: Option<SocketAddr>,
    ) -> Participant {
        let mut participants = self.participants.write();
        match participants.get_mut(identity) {
            Some(participant) => {
                participant.position = position;
                participant.direction = direction;
                if endpoint.is_some() {
                    participant.endpoint = endpoint;
                }
                participant.last_update = Utc::now();
                participant.clone()
            }
            None => {
                tracing::debug!("Registering participant {} from audio ({:?})", identity, endpoint);
                let participant = Participant::new(identity, position, direction, endpoint);
                participants.insert(identity.to_string(), participant.clone());
                participant
            }
        }
    }

    /// Record an external position update. Never touches the endpoint.
    pub fn upsert_from_position_feed(
        &self,
        identity: &str,
        position: Vec3,
        direction: Vec3,
    ) -> Participant {
        let mut participants = self.participants.write();
        match participants.get_mut(identity) {
            Some(participant) => {
                participant.position = position;
                participant.direction = direction;
                participant.last_update = Utc::now();
                participant.clone()
            }
            None => {
                tracing::debug!(
                    "Registering placeholder participant {} from position feed",
                    identity
                );
                let participant = Participant::new(identity, position, direction, None);
                participants.insert(identity.to_string(), participant.clone());
                participant
            }
        }
    }

    /// Look up a participant
    pub fn get(&self, identity: &str) -> Option<Participant> {
        self.participants.read().get(identity).cloned()
    }

    /// Remove a participant. Removing an unknown identity is a no-op.
    pub fn remove(&self, identity: &str) -> Option<Participant> {
        let removed = self.participants.write().remove(identity);
        if removed.is_some() {
            tracing::debug!("Removed participant {}", identity);
        }
        removed
    }

    /// Snapshot of every participant except `exclude`, taken under one lock
    pub fn for_each_other(&self, exclude: &str) -> Vec<Participant> {
        self.participants
            .read()
            .values()
            .filter(|p| p.identity != exclude)
            .cloned()
            .collect()
    }

    /// Remove participants not updated within `max_age`; returns their identities
    pub fn remove_stale(&self, max_age: Duration) -> Vec<String> {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return Vec::new();
        };
        let cutoff = Utc::now() - max_age;

        let mut participants = self.participants.write();
        let stale: Vec<String> = participants
            .values()
            .filter(|p| p.last_update < cutoff)
            .map(|p| p.identity.clone())
            .collect();
        for identity in &stale {
            participants.remove(identity);
        }
        stale
    }

    /// Identities of all participants
    pub fn identities(&self) -> Vec<String> {
        self.participants.read().keys().cloned().collect()
    }

    /// Number of participants
    pub fn len(&self) -> usize {
        self.participants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.read().is_empty()
    }
}
