use gpcheck::{CheckOptions, FreeParams, ParameterizedModel, check_gradient, check_gradient_with};
use ndarray::{Array1, array};

/// f(x) = sum_i w_i x_i^2 with gradient 2 w_i x_i.
struct QuadraticBowl {
    weights: Array1<f64>,
    params: FreeParams,
}

impl QuadraticBowl {
    fn new(weights: Array1<f64>, params: Array1<f64>) -> Self {
        Self {
            weights,
            params: FreeParams::new(params),
        }
    }
}

impl ParameterizedModel for QuadraticBowl {
    fn free_parameters(&self) -> FreeParams {
        self.params.clone()
    }

    fn set_free_parameters(&mut self, values: &FreeParams) {
        self.params = values.clone();
    }

    fn evaluate(&self) -> f64 {
        self.weights
            .iter()
            .zip(self.params.iter())
            .map(|(w, x)| w * x * x)
            .sum()
    }

    fn analytic_gradient(&self) -> Array1<f64> {
        Array1::from_iter(
            self.weights
                .iter()
                .zip(self.params.iter())
                .map(|(w, x)| 2.0 * w * x),
        )
    }
}

/// Same bowl, but the reported gradient is corrupted in one coordinate.
struct CorruptedBowl {
    inner: QuadraticBowl,
    corrupt_index: usize,
}

impl ParameterizedModel for CorruptedBowl {
    fn free_parameters(&self) -> FreeParams {
        self.inner.free_parameters()
    }

    fn set_free_parameters(&mut self, values: &FreeParams) {
        self.inner.set_free_parameters(values);
    }

    fn evaluate(&self) -> f64 {
        self.inner.evaluate()
    }

    fn analytic_gradient(&self) -> Array1<f64> {
        let mut grad = self.inner.analytic_gradient();
        grad[self.corrupt_index] += 0.5;
        grad
    }
}

#[test]
fn square_at_three_agrees_to_one_part_in_a_million() {
    let mut model = QuadraticBowl::new(array![1.0], array![3.0]);
    let report = check_gradient_with(
        &mut model,
        &CheckOptions {
            step: 1e-6,
            tolerance: 1e-6,
        },
    )
    .expect("check");
    assert!(report.passed, "report:\n{report}");
    assert!(
        report.max_rel_err() < 1e-6,
        "central difference should be nearly exact for a quadratic, got {:.3e}",
        report.max_rel_err()
    );
    let entry = &report.entries[0];
    assert!((entry.analytic - 6.0).abs() < 1e-12);
    assert!((entry.numeric - 6.0).abs() < 1e-4);
}

#[test]
fn multivariate_bowl_passes_with_defaults() {
    let mut model = QuadraticBowl::new(array![0.5, 2.0, -1.5, 3.0], array![1.0, -0.7, 2.2, 0.1]);
    let report = check_gradient(&mut model).expect("check");
    assert!(report.passed, "report:\n{report}");
    assert_eq!(report.entries.len(), 4);
}

#[test]
fn corrupted_gradient_fails_and_names_the_culprit() {
    let mut model = CorruptedBowl {
        inner: QuadraticBowl::new(array![1.0, 1.0, 1.0], array![0.4, -1.1, 0.9]),
        corrupt_index: 1,
    };
    let report = check_gradient(&mut model).expect("check");
    assert!(!report.passed, "corruption must be detected:\n{report}");
    let worst = report.worst().expect("non-empty report");
    assert_eq!(worst.name, "p[1]");
    assert!(!worst.within_tolerance);
    // The untouched coordinates still agree.
    assert!(report.entries[0].within_tolerance);
    assert!(report.entries[2].within_tolerance);
}

#[test]
fn parameters_are_restored_on_pass_and_on_fail() {
    let mut good = QuadraticBowl::new(array![1.0, 2.0], array![0.3, -0.8]);
    let before = good.free_parameters();
    let report = check_gradient(&mut good).expect("check");
    assert!(report.passed);
    assert_eq!(good.free_parameters(), before);

    let mut bad = CorruptedBowl {
        inner: QuadraticBowl::new(array![1.0, 2.0], array![0.3, -0.8]),
        corrupt_index: 0,
    };
    let before = bad.free_parameters();
    let report = check_gradient(&mut bad).expect("check");
    assert!(!report.passed);
    assert_eq!(bad.free_parameters(), before);
}

#[test]
fn tolerance_boundary_is_inclusive() {
    let mut model = QuadraticBowl::new(array![1.0], array![2.0]);
    let report = check_gradient(&mut model).expect("check");
    // A report that passes at its measured error also passes when the
    // tolerance equals that error exactly.
    let measured = report.max_rel_err();
    let exact = check_gradient_with(
        &mut model,
        &CheckOptions {
            step: 1e-6,
            tolerance: measured.max(f64::MIN_POSITIVE),
        },
    )
    .expect("check");
    assert!(exact.passed);
}
