use ndarray::Array1;

use crate::layout::{LayoutError, ParamLayout};
use crate::types::{FreeParams, RawParams};

/// Capability interface the verifier consumes: a scalar objective over an
/// ordered free-parameter vector, with an analytic gradient of matching
/// length and order.
///
/// `evaluate` and `analytic_gradient` report numerical trouble by
/// producing non-finite values; the verifier turns those into a
/// [`CheckError`](crate::verify::CheckError) instead of a failed
/// comparison.
pub trait ParameterizedModel {
    /// Current free-parameter vector. Fixed parameters and redundant tied
    /// copies are excluded.
    fn free_parameters(&self) -> FreeParams;

    /// Replaces the free-parameter vector. The length must match
    /// [`ParameterizedModel::free_parameters`].
    fn set_free_parameters(&mut self, values: &FreeParams);

    /// Objective at the current parameters (e.g. a log marginal
    /// likelihood or a kernel self-consistency scalar).
    fn evaluate(&self) -> f64;

    /// Analytic gradient with respect to the free parameters.
    fn analytic_gradient(&self) -> Array1<f64>;

    /// Display names for report rows, one per free parameter.
    fn parameter_names(&self) -> Vec<String> {
        (0..self.free_parameters().len())
            .map(|i| format!("p[{i}]"))
            .collect()
    }
}

/// What a kernel or model naturally implements: the same objective, but
/// parameterized in raw space with no knowledge of ties, fixes, or
/// constraint transforms.
pub trait RawObjective {
    fn raw_parameters(&self) -> RawParams;

    fn set_raw_parameters(&mut self, values: &RawParams);

    fn objective(&self) -> f64;

    /// Gradient with respect to the raw parameters, including fixed and
    /// tied slots.
    fn raw_gradient(&self) -> Array1<f64>;
}

/// Adapter pairing a [`RawObjective`] with a [`ParamLayout`] to present
/// the free-space interface the verifier needs.
///
/// Perturbations arrive in free space and are expanded to raw space
/// before touching the inner model, so a constraint can never be violated
/// by a finite-difference step. The analytic free-space gradient is the
/// chain rule over the inner model's raw gradient.
pub struct ConstrainedModel<M> {
    inner: M,
    layout: ParamLayout,
    free: FreeParams,
}

impl<M: RawObjective> ConstrainedModel<M> {
    /// Wraps `inner` under `layout`, normalizing its parameters first:
    /// tied members snap to their representative's value and fixed slots
    /// take the layout's pinned value.
    pub fn new(inner: M, layout: ParamLayout) -> Result<Self, LayoutError> {
        let raw = inner.raw_parameters();
        if raw.len() != layout.raw_len() {
            return Err(LayoutError::LengthMismatch {
                expected: layout.raw_len(),
                got: raw.len(),
            });
        }
        let (free, normalized) = layout.normalize(&raw)?;
        let mut inner = inner;
        inner.set_raw_parameters(&normalized);
        Ok(Self {
            inner,
            layout,
            free,
        })
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn into_inner(self) -> M {
        self.inner
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }
}

impl<M: RawObjective> ParameterizedModel for ConstrainedModel<M> {
    fn free_parameters(&self) -> FreeParams {
        self.free.clone()
    }

    fn set_free_parameters(&mut self, values: &FreeParams) {
        match self.layout.expand(values) {
            Ok(raw) => {
                self.inner.set_raw_parameters(&raw);
                self.free = values.clone();
            }
            Err(err) => panic!("free parameter update rejected: {err}"),
        }
    }

    fn evaluate(&self) -> f64 {
        self.inner.objective()
    }

    fn analytic_gradient(&self) -> Array1<f64> {
        match self
            .layout
            .collapse_gradient(&self.inner.raw_gradient(), &self.free)
        {
            Ok(grad) => grad,
            Err(err) => {
                // Surfaces to the verifier as a non-finite gradient rather
                // than a panic inside the model under test.
                log::warn!("raw gradient could not be collapsed to free space: {err}");
                Array1::from_elem(self.layout.free_len(), f64::NAN)
            }
        }
    }

    fn parameter_names(&self) -> Vec<String> {
        self.layout.free_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutBuilder;
    use crate::transform::Transform;
    use approx::assert_relative_eq;
    use ndarray::array;

    /// f(x) = x0 * x1 + x2, with the obvious raw gradient.
    struct Product3 {
        raw: RawParams,
    }

    impl RawObjective for Product3 {
        fn raw_parameters(&self) -> RawParams {
            self.raw.clone()
        }

        fn set_raw_parameters(&mut self, values: &RawParams) {
            self.raw = values.clone();
        }

        fn objective(&self) -> f64 {
            self.raw[0] * self.raw[1] + self.raw[2]
        }

        fn raw_gradient(&self) -> Array1<f64> {
            array![self.raw[1], self.raw[0], 1.0]
        }
    }

    #[test]
    fn construction_normalizes_inner_parameters() {
        let layout = LayoutBuilder::new(3)
            .tie(&[0, 1])
            .fix(2, -4.0)
            .build()
            .expect("layout");
        let model = ConstrainedModel::new(
            Product3 {
                raw: RawParams::new(array![3.0, 99.0, 0.0]),
            },
            layout,
        )
        .expect("model");
        assert_eq!(model.inner().raw.0, array![3.0, 3.0, -4.0]);
        assert_eq!(model.free_parameters().0, array![3.0]);
    }

    #[test]
    fn tied_gradient_applies_the_chain_rule() {
        let layout = LayoutBuilder::new(3)
            .tie(&[0, 1])
            .fix(2, 0.0)
            .build()
            .expect("layout");
        let mut model = ConstrainedModel::new(
            Product3 {
                raw: RawParams::new(array![3.0, 3.0, 0.0]),
            },
            layout,
        )
        .expect("model");

        // d/dv of v*v is 2v.
        assert_relative_eq!(model.analytic_gradient()[0], 6.0);

        model.set_free_parameters(&FreeParams::new(array![5.0]));
        assert_eq!(model.inner().raw.0, array![5.0, 5.0, 0.0]);
        assert_relative_eq!(model.evaluate(), 25.0);
    }

    #[test]
    fn transformed_setter_keeps_raw_in_domain() {
        let layout = LayoutBuilder::new(3)
            .transform(0, Transform::Positive)
            .fix(1, 1.0)
            .fix(2, 0.0)
            .build()
            .expect("layout");
        let mut model = ConstrainedModel::new(
            Product3 {
                raw: RawParams::new(array![2.0, 1.0, 0.0]),
            },
            layout,
        )
        .expect("model");

        // Free value is ln(2); a large negative step still lands positive.
        model.set_free_parameters(&FreeParams::new(array![-30.0]));
        assert!(model.inner().raw[0] > 0.0);
    }

    #[test]
    fn raw_length_mismatch_is_rejected_at_construction() {
        let layout = LayoutBuilder::new(2).build().expect("layout");
        let err = ConstrainedModel::new(
            Product3 {
                raw: RawParams::new(array![1.0, 2.0, 3.0]),
            },
            layout,
        )
        .err()
        .expect("length mismatch");
        assert!(matches!(
            err,
            LayoutError::LengthMismatch {
                expected: 2,
                got: 3
            }
        ));
    }
}
