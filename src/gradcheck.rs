//! Finite-difference checks for network Jacobians.

use crate::bindings::Bindings;
use crate::linalg::{Matrix, Vector};
use crate::model::Variable;
use crate::network::FeedForwardNetwork;
use crate::{Error, Result};

pub const DEFAULT_STEP: f64 = 1e-5;
pub const DEFAULT_TOLERANCE: f64 = 1e-4;

/// Central differences: column `j` is `(f(p + h e_j) - f(p - h e_j)) / 2h`.
pub fn finite_difference_jacobian(
    network: &FeedForwardNetwork,
    input: &Vector,
    variables: &[Variable],
    bindings: &Bindings,
    step: f64,
) -> Result<Matrix> {
    if !(step.is_finite() && step > 0.0) {
        return Err(Error::InvalidConfig(format!(
            "finite-difference step must be finite and > 0, got {step}"
        )));
    }

    let mut probe = bindings.clone();
    let mut jacobian = Matrix::zeros(network.output_len(), variables.len());
    for (j, &v) in variables.iter().enumerate() {
        let original = probe.get(v)?;

        probe.put(v, original + step)?;
        let plus = network.evaluate(input, &probe)?;
        probe.put(v, original - step)?;
        let minus = network.evaluate(input, &probe)?;
        probe.put(v, original)?;

        jacobian.set_column(j, &plus.sub(&minus).scale(0.5 / step));
    }
    Ok(jacobian)
}

/// Entries fail when both their absolute difference exceeds `abs_tol` and their difference
/// relative to `max(|analytic|, |numeric|, 1)` exceeds `rel_tol`.
pub fn compare(analytic: &Matrix, numeric: &Matrix, rel_tol: f64, abs_tol: f64) -> Result<()> {
    if analytic.shape() != numeric.shape() {
        return Err(Error::InvalidShape(format!(
            "analytic {:?} and numeric {:?} jacobians differ in shape",
            analytic.shape(),
            numeric.shape()
        )));
    }

    let (rows, cols) = analytic.shape();
    for row in 0..rows {
        for col in 0..cols {
            let a = analytic[(row, col)];
            let n = numeric[(row, col)];
            let diff = (a - n).abs();
            let scale = a.abs().max(n.abs()).max(1.0);
            if !diff.is_finite() || (diff > abs_tol && diff / scale > rel_tol) {
                return Err(Error::GradientMismatch {
                    row,
                    col,
                    analytic: a,
                    numeric: n,
                });
            }
        }
    }
    Ok(())
}

/// Backprop Jacobian against central differences, with the default step and tolerance.
pub fn check(
    network: &FeedForwardNetwork,
    input: &Vector,
    variables: &[Variable],
    bindings: &Bindings,
) -> Result<()> {
    let analytic = network.jacobian(input, variables, bindings)?;
    let numeric = finite_difference_jacobian(network, input, variables, bindings, DEFAULT_STEP)?;
    compare(&analytic, &numeric, DEFAULT_TOLERANCE, DEFAULT_TOLERANCE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_reports_the_first_offending_entry() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]);
        let mut n = a.clone();
        n[(1, 0)] = 3.5;
        n[(1, 1)] = 9.0;

        assert_eq!(
            compare(&a, &n, 1e-4, 1e-4),
            Err(Error::GradientMismatch {
                row: 1,
                col: 0,
                analytic: 3.0,
                numeric: 3.5
            })
        );
        assert!(compare(&a, &a, 1e-4, 1e-4).is_ok());
    }

    #[test]
    fn small_absolute_noise_is_tolerated() {
        let a = Matrix::from_rows(&[vec![1e-9]]);
        let n = Matrix::from_rows(&[vec![3e-9]]);
        assert!(compare(&a, &n, 1e-4, 1e-6).is_ok());
        assert!(compare(&a, &Matrix::zeros(1, 2), 1e-4, 1e-4).is_err());
    }
}
