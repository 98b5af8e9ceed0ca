//! Spatial audio model
//!
//! Pure functions mapping listener/source geometry to per-listener gain and
//! stereo balance. Nothing here touches the network or the registry.

use nalgebra::Vector3;

/// 3D position or direction in world units
pub type Vec3 = Vector3<f32>;

/// Neutral stereo balance used when no direction can be derived
pub const CENTER_PAN: (f32, f32) = (0.5, 0.5);

/// Euclidean distance between two points
pub fn distance(a: &Vec3, b: &Vec3) -> f32 {
    (a - b).norm()
}

/// Logarithmic distance attenuation.
///
/// Returns `1 - ln(distance + 1) / ln(max_range + 1)` clamped to `[0, 1]`:
/// full volume at distance 0, silent at `max_range` and beyond.
///
/// `max_range` must be positive; the relay rejects other values when the
/// configuration is validated.
pub fn attenuation(distance: f32, max_range: f32) -> f32 {
    let gain = 1.0 - (distance + 1.0).ln() / (max_range + 1.0).ln();
    if gain.is_nan() {
        return 0.0;
    }
    gain.clamp(0.0, 1.0)
}

/// Stereo balance of a source as heard by a listener facing `listener_direction`.
///
/// Returns `(left, right)` gains summing to 1. A source straight ahead of the
/// listener pans fully right and one straight behind fully left, matching the
/// game-side mixer. Coincident positions, a zero-length direction or any
/// non-finite component yield [`CENTER_PAN`].
pub fn stereo_pan(source: &Vec3, listener: &Vec3, listener_direction: &Vec3) -> (f32, f32) {
    let Some(to_source) = unit(&(source - listener)) else {
        return CENTER_PAN;
    };
    let Some(facing) = unit(listener_direction) else {
        return CENTER_PAN;
    };

    let angle = to_source.dot(&facing).clamp(-1.0, 1.0);
    let pan = (angle + 1.0) / 2.0;
    (1.0 - pan, pan)
}

/// Normalize `v`, or `None` if it is degenerate or not finite
fn unit(v: &Vec3) -> Option<Vec3> {
    if !v.iter().all(|c| c.is_finite()) {
        return None;
    }
    v.try_normalize(f32::EPSILON)
}
