use thiserror::Error;

use crate::model::Variable;

/// Errors raised while building or differentiating expressions and networks.
///
/// None of these are recovered from inside the crate; they surface to whoever built the
/// offending structure or made the offending call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("parameter index {index} is out of range for {size} allocated parameters")]
    IndexOutOfRange { index: usize, size: usize },

    #[error("{variable} is not owned by any of the {layers} layers searched")]
    VariableNotFound { variable: Variable, layers: usize },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("cache does not belong to a {expected} layer")]
    CacheMismatch { expected: &'static str },

    #[error(
        "jacobian entry ({row}, {col}) does not match: analytic={analytic} numeric={numeric}"
    )]
    GradientMismatch {
        row: usize,
        col: usize,
        analytic: f64,
        numeric: f64,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
