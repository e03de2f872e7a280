use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Parameter vector in free (unconstrained, collapsed) space.
///
/// Free space is what the verifier perturbs: tied groups are counted once
/// and constrained parameters are mapped through their transform, so any
/// finite free vector expands to a valid raw configuration.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct FreeParams(pub Array1<f64>);

impl FreeParams {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn zeros(len: usize) -> Self {
        Self(Array1::zeros(len))
    }
}

impl Deref for FreeParams {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for FreeParams {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl AsRef<Array1<f64>> for FreeParams {
    fn as_ref(&self) -> &Array1<f64> {
        &self.0
    }
}

impl From<Array1<f64>> for FreeParams {
    fn from(values: Array1<f64>) -> Self {
        Self(values)
    }
}

impl From<FreeParams> for Array1<f64> {
    fn from(values: FreeParams) -> Self {
        values.0
    }
}

/// Parameter vector in raw (model-visible, constrained) space.
///
/// Raw space is the parameterization the kernel/model evaluates under:
/// every tied copy holds its own slot, fixed parameters are present, and
/// constrained values live inside their domain (e.g. positive variances).
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct RawParams(pub Array1<f64>);

impl RawParams {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn zeros(len: usize) -> Self {
        Self(Array1::zeros(len))
    }
}

impl Deref for RawParams {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for RawParams {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl AsRef<Array1<f64>> for RawParams {
    fn as_ref(&self) -> &Array1<f64> {
        &self.0
    }
}

impl From<Array1<f64>> for RawParams {
    fn from(values: Array1<f64>) -> Self {
        Self(values)
    }
}

impl From<RawParams> for Array1<f64> {
    fn from(values: RawParams) -> Self {
        values.0
    }
}

/// Finite-difference check configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CheckOptions {
    /// Central-difference step in free space.
    pub step: f64,
    /// Maximum allowed per-parameter relative error.
    pub tolerance: f64,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            step: 1e-6,
            tolerance: 1e-3,
        }
    }
}
