//! Symbolic expressions over scalars, vectors and matrices.
//!
//! An expression is an immutable DAG built bottom-up through checked constructors. Every
//! family offers the same four operations:
//!
//! - `evaluate(&Bindings)`: numeric value under a parameter assignment;
//! - `partial_derivative(Variable)`: a new expression of the same family;
//! - `derivative(&[Variable], &Bindings)`: the Jacobian, one column per variable;
//! - `is_zero()`: a structural test, never numeric.
//!
//! Constructors consult `is_zero()` and short-circuit: a sum with a zero operand is the other
//! operand, a product with a zero operand is a zero of the right shape. Without this, trees
//! grow exponentially under repeated differentiation.
//!
//! Derivative rules:
//!
//! | Node | Rule |
//! |------|------|
//! | sum | `d(f + g) = df + dg` |
//! | product, scale | `d(fg) = f'g + fg'` |
//! | dot | `d(l·r) = l'·r + l·r'` |
//! | matrix product, matrix-vector | `d(AB) = A'B + AB'` |
//! | elementwise `f(x)` | `D(f'(x)) · x'` |
//! | transpose, concat, window, diagonal | same reshape applied to the child's derivative |
//! | max-pool | `S(x) · x'` with `S` the 0/1 selection matrix |
//!
//! The elementwise rule relies on `x ∘ y = D(x) · y`, which keeps chain-rule terms as ordinary
//! matrix products.
//!
//! `derivative` stacks partials column by column. It is the correctness baseline; layered
//! networks use [`crate::network::FeedForwardNetwork::jacobian`] instead.

mod matrix;
mod scalar;
mod vector;

pub(crate) use matrix::selection_matrix;
pub use matrix::{MatrixExpr, MatrixNode};
pub use scalar::{ScalarExpr, ScalarNode};
pub use vector::{VectorExpr, VectorNode};

use crate::Result;
use crate::linalg::{Matrix, Vector};
use crate::model::Variable;

/// Build a `rows x variables.len()` Jacobian from one column per variable.
fn stack_columns(
    rows: usize,
    variables: &[Variable],
    mut column: impl FnMut(Variable) -> Result<Vector>,
) -> Result<Matrix> {
    let mut jacobian = Matrix::zeros(rows, variables.len());
    for (j, &variable) in variables.iter().enumerate() {
        let values = column(variable)?;
        debug_assert_eq!(values.len(), rows);
        jacobian.set_column(j, &values);
    }
    Ok(jacobian)
}
