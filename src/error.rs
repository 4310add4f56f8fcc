use miette::Diagnostic;
use thiserror::Error;

/// Fatal evaluation errors. Every variant aborts the enclosing statement and
/// propagates outward; hosts recover the kind with
/// `err.downcast_ref::<RuntimeError>()`.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("unit mismatch: {0}")]
    #[diagnostic(help("both operands must share the same physical dimension"))]
    UnitMismatch(String),

    #[error("unknown unit '{0}'")]
    #[diagnostic(help("check the unit symbol against the SI table (prefix + base or derived unit)"))]
    UnknownUnit(String),

    #[error("undefined function '{0}'")]
    UndefinedFunction(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("index out of range: {0}")]
    IndexOutOfRange(String),

    #[error("ragged matrix: row {row} has {got} cells, expected {expected}")]
    RaggedMatrix {
        row: usize,
        got: usize,
        expected: usize,
    },

    #[error("invalid comparison: {0}")]
    #[diagnostic(help("comparison operators order real magnitudes only"))]
    InvalidComparison(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    #[error("{0}")]
    UserError(String),
}

impl RuntimeError {
    pub fn unit_mismatch(context: impl Into<String>) -> miette::Error {
        RuntimeError::UnitMismatch(context.into()).into()
    }

    pub fn type_mismatch(context: impl Into<String>) -> miette::Error {
        RuntimeError::TypeMismatch(context.into()).into()
    }
}
