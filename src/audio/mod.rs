//! Audio post-processing applied per recipient during fan-out

pub mod effects;

pub use effects::{AudioPostProcessor, EffectContext, Passthrough};
