//! Distance effects hook
//!
//! The relay never decodes audio. Payloads are opaque codec frames, so any
//! distance effect (muffling, low-pass, gain baking) is an external transform
//! plugged in here. The default leaves the payload untouched.

use bytes::Bytes;

/// Per-recipient parameters handed to a post-processor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectContext {
    /// Distance between sender and recipient
    pub distance: f32,
    /// Configured hearing range
    pub max_range: f32,
    /// Distance attenuation for this recipient
    pub gain: f32,
    /// (left, right) balance for this recipient
    pub pan: (f32, f32),
}

/// Transform applied to a payload before it is relayed to one recipient
pub trait AudioPostProcessor: Send + Sync {
    fn process(&self, payload: &Bytes, ctx: &EffectContext) -> Bytes;

    /// Short name for logs
    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Relays payloads unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl AudioPostProcessor for Passthrough {
    fn process(&self, payload: &Bytes, _ctx: &EffectContext) -> Bytes {
        payload.clone()
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_keeps_payload() {
        let payload = Bytes::from_static(&[1, 2, 3]);
        let ctx = EffectContext {
            distance: 10.0,
            max_range: 64.0,
            gain: 0.4,
            pan: (0.5, 0.5),
        };
        assert_eq!(Passthrough.process(&payload, &ctx), payload);
        assert_eq!(Passthrough.name(), "passthrough");
    }
}
