//! Error functions.
//!
//! Two views of the same loss, `L = 0.5 * ||prediction - target||^2`:
//!
//! - [`squared_error`] builds it as a [`ScalarExpr`] so an optimizer can differentiate the
//!   whole composition symbolically;
//! - [`squared_error_value`] / [`squared_error_backward`] work on plain values, for use with the
//!   network Jacobian (`dL/dp = J^T (prediction - target)`).

use crate::expr::{ScalarExpr, VectorExpr};
use crate::linalg::Vector;
use crate::{Error, Result};

/// `0.5 * (prediction - target) · (prediction - target)` as an expression.
pub fn squared_error(prediction: VectorExpr, target: &Vector) -> Result<ScalarExpr> {
    if prediction.len() != target.len() {
        return Err(Error::InvalidShape(format!(
            "prediction len {} does not match target len {}",
            prediction.len(),
            target.len()
        )));
    }
    let residual = VectorExpr::difference(prediction, VectorExpr::constant(target.clone()))?;
    let sum_sq = ScalarExpr::dot(residual.clone(), residual)?;
    Ok(ScalarExpr::product(ScalarExpr::constant(0.5), sum_sq))
}

/// Returns `0.5 * sum((pred - target)^2)`.
#[inline]
pub fn squared_error_value(pred: &Vector, target: &Vector) -> f64 {
    assert_eq!(
        pred.len(),
        target.len(),
        "pred len {} does not match target len {}",
        pred.len(),
        target.len()
    );
    let diff = pred.sub(target);
    0.5 * diff.dot(&diff)
}

/// Loss + gradient w.r.t. `pred`, which is simply `pred - target`.
#[inline]
pub fn squared_error_backward(pred: &Vector, target: &Vector) -> (f64, Vector) {
    assert_eq!(
        pred.len(),
        target.len(),
        "pred len {} does not match target len {}",
        pred.len(),
        target.len()
    );
    let diff = pred.sub(target);
    (0.5 * diff.dot(&diff), diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParameterModel;

    #[test]
    fn squared_error_is_zero_when_equal() {
        let pred = Vector::from([1.0, -2.0, 0.5]);
        assert_eq!(squared_error_value(&pred, &pred.clone()), 0.0);
    }

    #[test]
    fn backward_matches_expected_gradient() {
        let pred = Vector::from([1.0, 3.0]);
        let target = Vector::from([2.0, 1.0]);
        let (loss, d_pred) = squared_error_backward(&pred, &target);

        // 0.5 * (1 + 4)
        assert!((loss - 2.5).abs() < 1e-12);
        assert_eq!(d_pred, Vector::from([-1.0, 2.0]));
    }

    #[test]
    fn expression_agrees_with_values_and_differentiates() {
        let mut model = ParameterModel::new();
        let p = model.allocate_vector(2).unwrap();
        let mut bindings = model.create_bindings();
        bindings.put_vector(&p, &Vector::from([1.0, 3.0])).unwrap();
        let target = Vector::from([2.0, 1.0]);

        let loss = squared_error(VectorExpr::parameter(p), &target).unwrap();
        assert!((loss.evaluate(&bindings).unwrap() - 2.5).abs() < 1e-12);

        let variables: Vec<_> = p.variables().collect();
        let grad = loss.derivative(&variables, &bindings).unwrap();
        assert!((grad[(0, 0)] + 1.0).abs() < 1e-12);
        assert!((grad[(0, 1)] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn mismatched_target_is_a_shape_error() {
        let pred = VectorExpr::zero(3);
        assert!(matches!(
            squared_error(pred, &Vector::zeros(2)),
            Err(Error::InvalidShape(_))
        ));
    }
}
