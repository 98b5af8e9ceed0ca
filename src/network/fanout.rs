//! Recipient selection for one relayed frame
//!
//! Pure: decides who hears a frame and how loud, without sending anything.

use std::net::SocketAddr;

use crate::registry::Participant;
use crate::spatial::{attenuation, stereo_pan};

/// One recipient of a relayed frame
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Recipient identity
    pub identity: String,
    /// Where to send the frame
    pub endpoint: SocketAddr,
    /// Distance from the sender
    pub distance: f32,
    /// Distance attenuation
    pub gain: f32,
    /// (left, right) balance relative to the recipient's direction
    pub pan: (f32, f32),
}

/// Select recipients within `max_range` of `sender` that have a known endpoint.
///
/// The sender itself is never selected, even if it appears in `others`.
/// Recipients whose distance cannot be computed are treated as out of range.
pub fn plan_fanout(sender: &Participant, others: &[Participant], max_range: f32) -> Vec<Delivery> {
    others
        .iter()
        .filter(|recipient| recipient.identity != sender.identity)
        .filter_map(|recipient| {
            let distance = sender.distance_to(recipient);
            // Non-finite positions give a NaN distance, never in range
            if distance.is_nan() || distance > max_range {
                return None;
            }
            // Position-feed placeholders cannot receive audio yet
            let endpoint = recipient.endpoint?;

            Some(Delivery {
                identity: recipient.identity.clone(),
                endpoint,
                distance,
                gain: attenuation(distance, max_range),
                pan: stereo_pan(&sender.position, &recipient.position, &recipient.direction),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ClientRegistry;
    use crate::spatial::Vec3;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    fn registry_abc() -> ClientRegistry {
        let registry = ClientRegistry::new();
        registry.upsert_from_audio("A", Vec3::zeros(), Vec3::new(1.0, 0.0, 0.0), Some(addr(1)));
        registry.upsert_from_audio(
            "B",
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(-1.0, 0.0, 0.0),
            Some(addr(2)),
        );
        registry.upsert_from_audio("C", Vec3::new(1000.0, 0.0, 0.0), Vec3::zeros(), Some(addr(3)));
        registry
    }

    #[test]
    fn test_only_in_range_recipients() {
        let registry = registry_abc();
        let sender = registry.get("A").unwrap();

        let plan = plan_fanout(&sender, &registry.for_each_other("A"), 64.0);

        assert_eq!(plan.len(), 1);
        let delivery = &plan[0];
        assert_eq!(delivery.identity, "B");
        assert_eq!(delivery.endpoint, addr(2));
        assert_eq!(delivery.distance, 10.0);
        assert_eq!(delivery.gain, attenuation(10.0, 64.0));
        // B faces A, so A is straight ahead
        assert!((delivery.pan.1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sender_never_selected() {
        let registry = registry_abc();
        let sender = registry.get("A").unwrap();
        let everyone: Vec<_> = ["A", "B", "C"]
            .iter()
            .filter_map(|id| registry.get(id))
            .collect();

        let plan = plan_fanout(&sender, &everyone, 10_000.0);
        assert!(plan.iter().all(|d| d.identity != "A"));
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_unknown_endpoint_skipped() {
        let registry = registry_abc();
        registry.upsert_from_position_feed("D", Vec3::new(1.0, 0.0, 0.0), Vec3::zeros());
        let sender = registry.get("A").unwrap();

        let plan = plan_fanout(&sender, &registry.for_each_other("A"), 64.0);
        assert!(plan.iter().all(|d| d.identity != "D"));
    }

    #[test]
    fn test_edge_of_range_is_silent_but_delivered() {
        let registry = ClientRegistry::new();
        let sender = registry.upsert_from_audio("A", Vec3::zeros(), Vec3::zeros(), Some(addr(1)));
        registry.upsert_from_audio("E", Vec3::new(64.0, 0.0, 0.0), Vec3::zeros(), Some(addr(5)));

        let plan = plan_fanout(&sender, &registry.for_each_other("A"), 64.0);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].gain, 0.0);
    }

    #[test]
    fn test_nan_sender_position_reaches_nobody() {
        let registry = ClientRegistry::new();
        let far = Vec3::new(100_000.0, 0.0, 0.0);
        registry.upsert_from_audio("FAR", far, Vec3::zeros(), Some(addr(9)));
        registry.upsert_from_audio("NEAR", Vec3::new(1.0, 0.0, 0.0), Vec3::zeros(), Some(addr(8)));
        let nan = Vec3::new(f32::NAN, 0.0, 0.0);
        let sender = registry.upsert_from_audio("A", nan, Vec3::zeros(), Some(addr(1)));

        let plan = plan_fanout(&sender, &registry.for_each_other("A"), 64.0);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_nan_recipient_position_is_out_of_range() {
        let registry = ClientRegistry::new();
        let sender = registry.upsert_from_audio("A", Vec3::zeros(), Vec3::zeros(), Some(addr(1)));
        registry.upsert_from_audio("B", Vec3::new(2.0, 0.0, 0.0), Vec3::zeros(), Some(addr(2)));
        let nan = Vec3::new(0.0, f32::NAN, 0.0);
        registry.upsert_from_audio("GHOST", nan, Vec3::zeros(), Some(addr(3)));

        let plan = plan_fanout(&sender, &registry.for_each_other("A"), 64.0);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].identity, "B");
    }
}
