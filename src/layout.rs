use ndarray::Array1;
use thiserror::Error;

use crate::transform::Transform;
use crate::types::{FreeParams, RawParams};

/// Relative tolerance for agreement between tied raw parameters.
const TIE_CONSISTENCY_TOL: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("raw parameter index {index} is out of range for a layout of {raw_len} parameters")]
    IndexOutOfRange { index: usize, raw_len: usize },

    #[error("raw parameter {index} already has a binding; it cannot be tied and fixed at once")]
    ConflictingBinding { index: usize },

    #[error("a tie group needs at least two distinct members, got {got}")]
    TieTooSmall { got: usize },

    #[error("members of a tie group must share one transform; raw parameter {index} disagrees")]
    MixedTieTransforms { index: usize },

    #[error("bounded transform requires lower < upper, got [{lower}, {upper}]")]
    InvalidBounds { lower: f64, upper: f64 },

    #[error(
        "tied raw parameters disagree beyond tolerance: index {index} holds {value} while its representative holds {representative}"
    )]
    InconsistentTie {
        index: usize,
        value: f64,
        representative: f64,
    },

    #[error("raw value {value} at index {index} lies outside the domain of its constraint transform")]
    DomainViolation { index: usize, value: f64 },

    #[error("expected a vector of length {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },
}

/// Resolution of one raw parameter against the free vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Binding {
    /// Untied parameter, or the representative of a tie group.
    Free {
        free_index: usize,
        transform: Transform,
    },
    /// Non-representative member of a tie group; always mirrors the raw
    /// value produced for its representative's free slot.
    Tied {
        free_index: usize,
        transform: Transform,
    },
    /// Held constant and excluded from the free vector.
    Fixed { value: f64 },
}

/// Immutable raw<->free mapping, built once per model under test.
///
/// Ties and fixes are explicit index sets resolved at build time, so the
/// hot path never inspects parameter names.
#[derive(Debug, Clone)]
pub struct ParamLayout {
    bindings: Vec<Binding>,
    names: Vec<String>,
    free_len: usize,
}

impl ParamLayout {
    /// Layout with every raw parameter free and untransformed.
    pub fn identity(raw_len: usize) -> Self {
        let bindings = (0..raw_len)
            .map(|i| Binding::Free {
                free_index: i,
                transform: Transform::Identity,
            })
            .collect();
        Self {
            bindings,
            names: default_names(raw_len),
            free_len: raw_len,
        }
    }

    pub fn raw_len(&self) -> usize {
        self.bindings.len()
    }

    pub fn free_len(&self) -> usize {
        self.free_len
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Display names of the free parameters. A tie group renders as its
    /// member names joined with `=`.
    pub fn free_names(&self) -> Vec<String> {
        let mut grouped: Vec<Vec<&str>> = vec![Vec::new(); self.free_len];
        for (i, binding) in self.bindings.iter().enumerate() {
            match binding {
                Binding::Free { free_index, .. } | Binding::Tied { free_index, .. } => {
                    grouped[*free_index].push(self.names[i].as_str());
                }
                Binding::Fixed { .. } => {}
            }
        }
        grouped.into_iter().map(|parts| parts.join("=")).collect()
    }

    /// Expands a free vector into raw space: inverse transforms, tie
    /// broadcast, fixed-value insertion.
    ///
    /// After expansion every member of a tie group holds the same raw
    /// value by construction.
    pub fn expand(&self, free: &FreeParams) -> Result<RawParams, LayoutError> {
        if free.len() != self.free_len {
            return Err(LayoutError::LengthMismatch {
                expected: self.free_len,
                got: free.len(),
            });
        }
        let mut raw = Array1::zeros(self.bindings.len());
        for (i, binding) in self.bindings.iter().enumerate() {
            raw[i] = match binding {
                Binding::Free {
                    free_index,
                    transform,
                }
                | Binding::Tied {
                    free_index,
                    transform,
                } => transform.to_raw(free[*free_index]),
                Binding::Fixed { value } => *value,
            };
        }
        Ok(RawParams::new(raw))
    }

    /// Collapses a raw vector into free space, requiring tie members to
    /// agree with their representative to numerical tolerance.
    pub fn collapse(&self, raw: &RawParams) -> Result<FreeParams, LayoutError> {
        let (free, rep_raw) = self.collapse_representatives(raw)?;
        for (i, binding) in self.bindings.iter().enumerate() {
            if let Binding::Tied { free_index, .. } = binding {
                let rep = rep_raw[*free_index];
                let tol = TIE_CONSISTENCY_TOL * rep.abs().max(1.0);
                if (raw[i] - rep).abs() > tol {
                    return Err(LayoutError::InconsistentTie {
                        index: i,
                        value: raw[i],
                        representative: rep,
                    });
                }
            }
        }
        Ok(free)
    }

    /// Collapses a raw vector, then re-expands it: tied members snap to
    /// their representative's value and fixed slots snap to the layout's
    /// pinned value. Returns both sides of the normalized state.
    pub fn normalize(&self, raw: &RawParams) -> Result<(FreeParams, RawParams), LayoutError> {
        let (free, _) = self.collapse_representatives(raw)?;
        let raw = self.expand(&free)?;
        Ok((free, raw))
    }

    /// Chain rule from a raw-space gradient to free space: members of a
    /// tie group accumulate into one slot, then each slot picks up its
    /// transform Jacobian at the current free value. Fixed parameters
    /// contribute nothing.
    pub fn collapse_gradient(
        &self,
        raw_grad: &Array1<f64>,
        free: &FreeParams,
    ) -> Result<Array1<f64>, LayoutError> {
        if raw_grad.len() != self.bindings.len() {
            return Err(LayoutError::LengthMismatch {
                expected: self.bindings.len(),
                got: raw_grad.len(),
            });
        }
        if free.len() != self.free_len {
            return Err(LayoutError::LengthMismatch {
                expected: self.free_len,
                got: free.len(),
            });
        }
        let mut grad = Array1::zeros(self.free_len);
        for (i, binding) in self.bindings.iter().enumerate() {
            match binding {
                Binding::Free {
                    free_index,
                    transform,
                }
                | Binding::Tied {
                    free_index,
                    transform,
                } => {
                    grad[*free_index] += raw_grad[i] * transform.d_raw_d_free(free[*free_index]);
                }
                Binding::Fixed { .. } => {}
            }
        }
        Ok(grad)
    }

    /// Forward transform of representatives only; tie members are not
    /// consulted. Also returns each representative's raw value so callers
    /// can audit tie agreement.
    fn collapse_representatives(
        &self,
        raw: &RawParams,
    ) -> Result<(FreeParams, Vec<f64>), LayoutError> {
        if raw.len() != self.bindings.len() {
            return Err(LayoutError::LengthMismatch {
                expected: self.bindings.len(),
                got: raw.len(),
            });
        }
        let mut free = Array1::zeros(self.free_len);
        let mut rep_raw = vec![f64::NAN; self.free_len];
        for (i, binding) in self.bindings.iter().enumerate() {
            if let Binding::Free {
                free_index,
                transform,
            } = binding
            {
                free[*free_index] =
                    transform
                        .to_free(raw[i])
                        .ok_or(LayoutError::DomainViolation {
                            index: i,
                            value: raw[i],
                        })?;
                rep_raw[*free_index] = raw[i];
            }
        }
        Ok((FreeParams::new(free), rep_raw))
    }
}

/// Builder for [`ParamLayout`]. All requests are validated together in
/// [`LayoutBuilder::build`]; later `name`/`transform` requests for the
/// same index win over earlier ones.
#[derive(Debug, Clone)]
pub struct LayoutBuilder {
    raw_len: usize,
    names: Vec<(usize, String)>,
    transforms: Vec<(usize, Transform)>,
    ties: Vec<Vec<usize>>,
    fixes: Vec<(usize, f64)>,
}

impl LayoutBuilder {
    pub fn new(raw_len: usize) -> Self {
        Self {
            raw_len,
            names: Vec::new(),
            transforms: Vec::new(),
            ties: Vec::new(),
            fixes: Vec::new(),
        }
    }

    /// Display name for one raw parameter.
    pub fn name(mut self, index: usize, name: impl Into<String>) -> Self {
        self.names.push((index, name.into()));
        self
    }

    /// Constraint transform for one raw parameter.
    pub fn transform(mut self, index: usize, transform: Transform) -> Self {
        self.transforms.push((index, transform));
        self
    }

    /// Ties the given raw parameters to one shared free value. The member
    /// with the smallest index becomes the representative.
    pub fn tie(mut self, members: &[usize]) -> Self {
        self.ties.push(members.to_vec());
        self
    }

    /// Pins one raw parameter to a constant, excluding it from the free
    /// vector.
    pub fn fix(mut self, index: usize, value: f64) -> Self {
        self.fixes.push((index, value));
        self
    }

    pub fn build(self) -> Result<ParamLayout, LayoutError> {
        let raw_len = self.raw_len;
        let check_index = |index: usize| {
            if index >= raw_len {
                Err(LayoutError::IndexOutOfRange { index, raw_len })
            } else {
                Ok(())
            }
        };

        let mut names = default_names(raw_len);
        for (index, name) in self.names {
            check_index(index)?;
            names[index] = name;
        }

        let mut transforms = vec![Transform::Identity; raw_len];
        for (index, transform) in self.transforms {
            check_index(index)?;
            if let Transform::Bounded { lower, upper } = transform
                && lower >= upper
            {
                return Err(LayoutError::InvalidBounds { lower, upper });
            }
            transforms[index] = transform;
        }

        let mut fixed_value = vec![None; raw_len];
        for (index, value) in self.fixes {
            check_index(index)?;
            if fixed_value[index].is_some() {
                return Err(LayoutError::ConflictingBinding { index });
            }
            fixed_value[index] = Some(value);
        }

        // Tie groups: sorted, deduplicated, disjoint from each other and
        // from the fixed set, and transform-uniform.
        let mut tie_rep = vec![None; raw_len];
        for group in self.ties {
            let mut members = group;
            for &index in &members {
                check_index(index)?;
            }
            members.sort_unstable();
            members.dedup();
            if members.len() < 2 {
                return Err(LayoutError::TieTooSmall { got: members.len() });
            }
            let representative = members[0];
            for &index in &members {
                if fixed_value[index].is_some() || tie_rep[index].is_some() {
                    return Err(LayoutError::ConflictingBinding { index });
                }
                if transforms[index] != transforms[representative] {
                    return Err(LayoutError::MixedTieTransforms { index });
                }
                tie_rep[index] = Some(representative);
            }
        }

        // Assign free slots in raw order. Representatives have the
        // smallest index in their group, so a Tied binding always refers
        // to a slot assigned earlier in the walk.
        let mut bindings = Vec::with_capacity(raw_len);
        let mut free_slot_of_raw = vec![None; raw_len];
        let mut free_len = 0usize;
        for index in 0..raw_len {
            let binding = if let Some(value) = fixed_value[index] {
                Binding::Fixed { value }
            } else {
                match tie_rep[index] {
                    Some(representative) if representative != index => Binding::Tied {
                        free_index: free_slot_of_raw[representative]
                            .ok_or(LayoutError::ConflictingBinding { index })?,
                        transform: transforms[index],
                    },
                    _ => {
                        let free_index = free_len;
                        free_len += 1;
                        free_slot_of_raw[index] = Some(free_index);
                        Binding::Free {
                            free_index,
                            transform: transforms[index],
                        }
                    }
                }
            };
            bindings.push(binding);
        }

        Ok(ParamLayout {
            bindings,
            names,
            free_len,
        })
    }
}

fn default_names(raw_len: usize) -> Vec<String> {
    (0..raw_len).map(|i| format!("theta[{i}]")).collect()
}
