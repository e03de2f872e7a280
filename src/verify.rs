use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::ParameterizedModel;
use crate::types::{CheckOptions, FreeParams};

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(
        "objective evaluation produced a non-finite value ({value}) while perturbing free parameter '{name}'"
    )]
    NonFiniteObjective { name: String, value: f64 },

    #[error("analytic gradient entry for '{name}' is non-finite ({value})")]
    NonFiniteGradient { name: String, value: f64 },

    #[error("analytic gradient has {actual} entries but the model exposes {expected} free parameters")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("check options must be positive: step={step}, tolerance={tolerance}")]
    InvalidOptions { step: f64, tolerance: f64 },
}

/// Per-parameter comparison between the analytic and central-difference
/// gradients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientEntry {
    pub name: String,
    pub analytic: f64,
    pub numeric: f64,
    pub abs_err: f64,
    pub rel_err: f64,
    pub within_tolerance: bool,
}

/// Outcome of a gradient check. A tolerance violation is a reportable
/// result (`passed == false`), never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientReport {
    pub entries: Vec<GradientEntry>,
    pub step: f64,
    pub tolerance: f64,
    pub passed: bool,
}

impl GradientReport {
    pub fn max_rel_err(&self) -> f64 {
        self.entries.iter().map(|e| e.rel_err).fold(0.0, f64::max)
    }

    /// Entry with the largest relative error, if any parameters were
    /// checked.
    pub fn worst(&self) -> Option<&GradientEntry> {
        self.entries
            .iter()
            .max_by(|a, b| a.rel_err.total_cmp(&b.rel_err))
    }
}

impl fmt::Display for GradientReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<28} {:>14} {:>14} {:>10} {:>13}",
            "Name", "Analytic", "Numerical", "Ratio", "Difference"
        )?;
        for entry in &self.entries {
            let ratio = entry.analytic / entry.numeric;
            writeln!(
                f,
                "{:<28} {:>14.6e} {:>14.6e} {:>10.6} {:>13.3e}  {}",
                entry.name,
                entry.analytic,
                entry.numeric,
                ratio,
                entry.abs_err,
                if entry.within_tolerance { "ok" } else { "FAIL" }
            )?;
        }
        write!(
            f,
            "max relative error {:.3e} vs tolerance {:.3e} (step {:.3e}): {}",
            self.max_rel_err(),
            self.tolerance,
            self.step,
            if self.passed { "PASS" } else { "FAIL" }
        )
    }
}

/// Checks the target's analytic gradient against central finite
/// differences with default options.
pub fn check_gradient<M>(target: &mut M) -> Result<GradientReport, CheckError>
where
    M: ParameterizedModel + ?Sized,
{
    check_gradient_with(target, &CheckOptions::default())
}

/// Checks the target's analytic gradient against central finite
/// differences.
///
/// Perturbs each free parameter by `+/- step`, estimates the derivative
/// as `(f_plus - f_minus) / (2 step)`, and compares against the analytic
/// gradient computed at the unperturbed point. The target's parameter
/// vector is restored before returning on every path, including errors.
pub fn check_gradient_with<M>(
    target: &mut M,
    options: &CheckOptions,
) -> Result<GradientReport, CheckError>
where
    M: ParameterizedModel + ?Sized,
{
    if !(options.step > 0.0 && options.step.is_finite())
        || !(options.tolerance > 0.0 && options.tolerance.is_finite())
    {
        return Err(CheckError::InvalidOptions {
            step: options.step,
            tolerance: options.tolerance,
        });
    }

    let origin = target.free_parameters();
    let n = origin.len();
    if n == 0 {
        // Nothing to perturb; vacuous pass.
        return Ok(GradientReport {
            entries: Vec::new(),
            step: options.step,
            tolerance: options.tolerance,
            passed: true,
        });
    }

    let names = target.parameter_names();
    let name_of = |i: usize| {
        names
            .get(i)
            .cloned()
            .unwrap_or_else(|| format!("p[{i}]"))
    };

    // Analytic gradient at the unperturbed point, validated before any
    // perturbation so a structural mismatch leaves the target untouched.
    let analytic = target.analytic_gradient();
    if analytic.len() != n {
        return Err(CheckError::DimensionMismatch {
            expected: n,
            actual: analytic.len(),
        });
    }
    for (i, &g) in analytic.iter().enumerate() {
        if !g.is_finite() {
            return Err(CheckError::NonFiniteGradient {
                name: name_of(i),
                value: g,
            });
        }
    }

    let mut guard = RestoreGuard {
        target,
        origin: origin.clone(),
    };

    let mut entries = Vec::with_capacity(n);
    let mut probe = origin.clone();
    for i in 0..n {
        let base = origin[i];

        probe.0[i] = base + options.step;
        guard.target.set_free_parameters(&probe);
        let f_plus = guard.target.evaluate();
        if !f_plus.is_finite() {
            return Err(CheckError::NonFiniteObjective {
                name: name_of(i),
                value: f_plus,
            });
        }

        probe.0[i] = base - options.step;
        guard.target.set_free_parameters(&probe);
        let f_minus = guard.target.evaluate();
        if !f_minus.is_finite() {
            return Err(CheckError::NonFiniteObjective {
                name: name_of(i),
                value: f_minus,
            });
        }
        probe.0[i] = base;

        let numeric = (f_plus - f_minus) / (2.0 * options.step);
        let abs_err = (analytic[i] - numeric).abs();
        // Denominator floor keeps the ratio meaningful when both
        // gradients are near zero.
        let rel_err = abs_err / analytic[i].abs().max(numeric.abs()).max(options.step);
        let within_tolerance = rel_err <= options.tolerance;
        log::debug!(
            "gradient check '{}': analytic={:.6e} numeric={:.6e} rel_err={:.3e}",
            name_of(i),
            analytic[i],
            numeric,
            rel_err
        );
        entries.push(GradientEntry {
            name: name_of(i),
            analytic: analytic[i],
            numeric,
            abs_err,
            rel_err,
            within_tolerance,
        });
    }

    drop(guard);

    let passed = entries.iter().all(|e| e.within_tolerance);
    let report = GradientReport {
        entries,
        step: options.step,
        tolerance: options.tolerance,
        passed,
    };
    if !passed
        && let Some(worst) = report.worst()
    {
        log::warn!(
            "gradient check failed: worst parameter '{}' rel_err={:.3e} (tolerance {:.3e})",
            worst.name,
            worst.rel_err,
            report.tolerance
        );
    }
    Ok(report)
}

/// Restores the target's free-parameter vector on drop, so the check has
/// no permanent side effect even when an evaluation aborts the scan.
struct RestoreGuard<'a, M: ParameterizedModel + ?Sized> {
    target: &'a mut M,
    origin: FreeParams,
}

impl<M: ParameterizedModel + ?Sized> Drop for RestoreGuard<'_, M> {
    fn drop(&mut self) {
        self.target.set_free_parameters(&self.origin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FreeParams;
    use ndarray::{Array1, array};

    /// f(x) = a . x, whose central difference is exact up to rounding.
    struct Linear {
        coeffs: Array1<f64>,
        params: FreeParams,
    }

    impl ParameterizedModel for Linear {
        fn free_parameters(&self) -> FreeParams {
            self.params.clone()
        }

        fn set_free_parameters(&mut self, values: &FreeParams) {
            self.params = values.clone();
        }

        fn evaluate(&self) -> f64 {
            self.coeffs.dot(&self.params.0)
        }

        fn analytic_gradient(&self) -> Array1<f64> {
            self.coeffs.clone()
        }
    }

    #[test]
    fn linear_objective_passes_with_tight_tolerance() {
        let mut model = Linear {
            coeffs: array![2.0, -0.5, 7.0],
            params: FreeParams::new(array![1.0, 2.0, -3.0]),
        };
        let report = check_gradient_with(
            &mut model,
            &CheckOptions {
                step: 1e-6,
                tolerance: 1e-8,
            },
        )
        .expect("check");
        assert!(report.passed, "report:\n{report}");
        assert_eq!(report.entries.len(), 3);
    }

    #[test]
    fn empty_parameter_vector_is_a_vacuous_pass() {
        let mut model = Linear {
            coeffs: array![],
            params: FreeParams::new(array![]),
        };
        let report = check_gradient(&mut model).expect("check");
        assert!(report.passed);
        assert!(report.entries.is_empty());
        assert_eq!(report.max_rel_err(), 0.0);
    }

    #[test]
    fn non_positive_options_are_rejected() {
        let mut model = Linear {
            coeffs: array![1.0],
            params: FreeParams::new(array![0.0]),
        };
        let err = check_gradient_with(
            &mut model,
            &CheckOptions {
                step: 0.0,
                tolerance: 1e-3,
            },
        )
        .expect_err("zero step");
        assert!(matches!(err, CheckError::InvalidOptions { .. }));
    }

    #[test]
    fn report_display_includes_parameter_names() {
        let mut model = Linear {
            coeffs: array![2.0],
            params: FreeParams::new(array![1.0]),
        };
        let report = check_gradient(&mut model).expect("check");
        let rendered = report.to_string();
        assert!(rendered.contains("p[0]"), "rendered:\n{rendered}");
        assert!(rendered.contains("PASS"), "rendered:\n{rendered}");
    }
}
