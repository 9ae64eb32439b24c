use std::fmt::Display;

use thiserror::Error;

use crate::model::ModelError;

/// Component that raised an expansion error.
#[derive(Debug, Clone, Copy, Error, PartialEq)]
pub enum Pass {
    Binding,
    JoinSynthesis,
    CollectionRewrite,
    IncludeBuilder,
    Reducer,
    Expander,
}

impl Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pass::Binding => write!(f, "Binding"),
            Pass::JoinSynthesis => write!(f, "JoinSynthesis"),
            Pass::CollectionRewrite => write!(f, "CollectionRewrite"),
            Pass::IncludeBuilder => write!(f, "IncludeBuilder"),
            Pass::Reducer => write!(f, "Reducer"),
            Pass::Expander => write!(f, "Expander"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum NavigationExpansionError {
    #[error("{pass}: member `{member}` on `{entity}` binds ambiguously: {details}")]
    ConflictingBinding {
        pass: Pass,
        entity: String,
        member: String,
        details: String,
    },

    #[error(
        "{pass}: cannot eagerly load collection navigation `{navigation}` through joins; project it instead"
    )]
    UnsupportedInclude { pass: Pass, navigation: String },

    #[error("{pass}: reduced tree has type `{actual}` but `{expected}` was expected")]
    ShapeMismatch {
        pass: Pass,
        expected: String,
        actual: String,
    },

    #[error("{pass}: operator `{operator}` is not supported here")]
    UnsupportedOperator { pass: Pass, operator: String },

    #[error("{pass}: invalid query: {message}")]
    InvalidQuery { pass: Pass, message: String },

    #[error("{pass}: {what} depth exceeds the configured limit of {limit}")]
    DepthExceeded {
        pass: Pass,
        what: &'static str,
        limit: usize,
    },

    #[error("{pass}: expansion-only node `{kind}` survived reduction")]
    UnreducedNode { pass: Pass, kind: &'static str },

    #[error("Model: {pass}: {source}.")]
    Model {
        pass: Pass,
        #[source]
        source: ModelError,
    },
}

impl NavigationExpansionError {
    /// Wrap a model lookup failure; hierarchy ambiguity becomes a conflicting
    /// binding.
    pub fn from_model(pass: Pass, source: ModelError) -> Self {
        match source {
            ModelError::ConflictingBackingFields {
                entity,
                member,
                first,
                second,
            } => NavigationExpansionError::ConflictingBinding {
                pass,
                entity,
                member,
                details: format!("`{}` vs `{}`", first, second),
            },
            source => NavigationExpansionError::Model { pass, source },
        }
    }

    pub fn invalid(pass: Pass, message: impl Into<String>) -> Self {
        NavigationExpansionError::InvalidQuery {
            pass,
            message: message.into(),
        }
    }
}

pub type ExpansionResult<T> = Result<T, NavigationExpansionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_maps_to_conflicting_binding() {
        let err = NavigationExpansionError::from_model(
            Pass::Binding,
            ModelError::ConflictingBackingFields {
                entity: "Contractor".to_string(),
                member: "Name".to_string(),
                first: "Contractor.Name (_contractorName)".to_string(),
                second: "Person.Name (<Name>k__BackingField)".to_string(),
            },
        );
        assert!(matches!(err, NavigationExpansionError::ConflictingBinding { .. }));
        assert!(err.to_string().starts_with("Binding: member `Name` on `Contractor`"));
    }

    #[test]
    fn test_other_model_errors_wrapped() {
        let err = NavigationExpansionError::from_model(
            Pass::JoinSynthesis,
            ModelError::UnknownEntity {
                entity: "Invoice".to_string(),
            },
        );
        assert!(matches!(err, NavigationExpansionError::Model { pass: Pass::JoinSynthesis, .. }));
    }
}
