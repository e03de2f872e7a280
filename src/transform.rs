use serde::{Deserialize, Serialize};

/// Invertible reparameterization between free space and raw space.
///
/// Perturbations always happen on the free side, so a constrained raw
/// parameter can never be pushed outside its domain by the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Transform {
    /// raw = free.
    Identity,
    /// raw = exp(free); constrains the raw parameter to (0, inf).
    Positive,
    /// raw = lower + (upper - lower) * sigmoid(free); constrains the raw
    /// parameter to the open interval (lower, upper).
    Bounded { lower: f64, upper: f64 },
}

impl Transform {
    /// Maps a free value into raw space.
    pub fn to_raw(&self, free: f64) -> f64 {
        match *self {
            Transform::Identity => free,
            Transform::Positive => free.exp(),
            Transform::Bounded { lower, upper } => lower + (upper - lower) * sigmoid(free),
        }
    }

    /// Maps a raw value back into free space, or `None` when the raw value
    /// lies outside the transform's image.
    pub fn to_free(&self, raw: f64) -> Option<f64> {
        match *self {
            Transform::Identity => Some(raw),
            Transform::Positive => (raw > 0.0).then(|| raw.ln()),
            Transform::Bounded { lower, upper } => (raw > lower && raw < upper)
                .then(|| ((raw - lower) / (upper - raw)).ln()),
        }
    }

    /// Jacobian factor d(raw)/d(free) at the given free value, used to
    /// chain-rule raw-space gradients into free space.
    pub fn d_raw_d_free(&self, free: f64) -> f64 {
        match *self {
            Transform::Identity => 1.0,
            Transform::Positive => free.exp(),
            Transform::Bounded { lower, upper } => {
                let s = sigmoid(free);
                (upper - lower) * s * (1.0 - s)
            }
        }
    }
}

// Branch on sign so neither exponential can overflow.
fn sigmoid(y: f64) -> f64 {
    if y >= 0.0 {
        1.0 / (1.0 + (-y).exp())
    } else {
        let e = y.exp();
        e / (1.0 + e)
    }
}
