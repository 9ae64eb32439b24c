use thiserror::Error;

use crate::model::ModelError;

/// Errors raised while typing a parsed query against the model.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryConversionError {
    #[error("Unknown identifier `{name}`: not a lambda parameter or entity type")]
    UnknownIdentifier { name: String },
    #[error("Type `{ty}` has no member `{member}`")]
    UnknownMember { ty: String, member: String },
    #[error("Unsupported operator `{name}` with {arity} arguments")]
    UnknownOperator { name: String, arity: usize },
    #[error("Operator `{operator}` expects a sequence source, found `{found}`")]
    NotASequence { operator: String, found: String },
    #[error("Argument {position} of `{operator}` must be a lambda with {expected} parameter(s)")]
    ExpectedLambda {
        operator: String,
        position: usize,
        expected: usize,
    },
    #[error("Cannot apply `{op}` to `{left}` and `{right}`")]
    TypeMismatch {
        op: String,
        left: String,
        right: String,
    },
    #[error("Lambda used outside of an operator argument")]
    UnexpectedLambda,
    #[error("Invalid literal `{literal}`")]
    InvalidLiteral { literal: String },
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}
