use serde::Serialize;
use std::fmt;

use crate::model::{CollectionKind, PropertyDef, ScalarKind};

/// Static type of an expression node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ExprType {
    Scalar { kind: ScalarKind, nullable: bool },
    Entity(String),
    /// Pair produced by a join; fields `Outer` and `Inner`.
    Composite {
        outer: Box<ExprType>,
        inner: Box<ExprType>,
    },
    /// Anonymous object with named fields, in declaration order.
    Record(Vec<(String, ExprType)>),
    Sequence {
        element: Box<ExprType>,
        ordered: bool,
    },
    Collection {
        element: Box<ExprType>,
        kind: CollectionKind,
    },
    Lambda {
        parameters: Vec<ExprType>,
        result: Box<ExprType>,
    },
}

pub const OUTER: &str = "Outer";
pub const INNER: &str = "Inner";

impl ExprType {
    pub fn scalar(kind: ScalarKind) -> Self {
        ExprType::Scalar {
            kind,
            nullable: kind.is_reference(),
        }
    }

    pub fn bool() -> Self {
        ExprType::scalar(ScalarKind::Bool)
    }

    pub fn int32() -> Self {
        ExprType::scalar(ScalarKind::Int32)
    }

    pub fn entity(name: impl Into<String>) -> Self {
        ExprType::Entity(name.into())
    }

    pub fn of_property(property: &PropertyDef) -> Self {
        ExprType::Scalar {
            kind: property.kind,
            nullable: property.nullable || property.kind.is_reference(),
        }
    }

    pub fn composite(outer: ExprType, inner: ExprType) -> Self {
        ExprType::Composite {
            outer: Box::new(outer),
            inner: Box::new(inner),
        }
    }

    pub fn sequence(element: ExprType) -> Self {
        ExprType::Sequence {
            element: Box::new(element),
            ordered: false,
        }
    }

    pub fn ordered_sequence(element: ExprType) -> Self {
        ExprType::Sequence {
            element: Box::new(element),
            ordered: true,
        }
    }

    pub fn collection(element: ExprType, kind: CollectionKind) -> Self {
        ExprType::Collection {
            element: Box::new(element),
            kind,
        }
    }

    /// Whether a value of this type can be null without a nullable wrapper.
    pub fn is_nullable(&self) -> bool {
        match self {
            ExprType::Scalar { nullable, .. } => *nullable,
            _ => true,
        }
    }

    /// Nullable counterpart of a value type; reference types are returned as is.
    pub fn make_nullable(&self) -> ExprType {
        match self {
            ExprType::Scalar { kind, .. } => ExprType::Scalar {
                kind: *kind,
                nullable: true,
            },
            ExprType::Record(fields) => ExprType::Record(
                fields
                    .iter()
                    .map(|(n, t)| (n.clone(), t.make_nullable()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// True if the two differ only by scalar nullability.
    pub fn eq_ignoring_nullability(&self, other: &ExprType) -> bool {
        self.make_nullable() == other.make_nullable()
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, ExprType::Sequence { .. } | ExprType::Collection { .. })
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, ExprType::Collection { .. })
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self, ExprType::Sequence { ordered: true, .. })
    }

    /// Element type of a sequence or collection.
    pub fn element(&self) -> Option<&ExprType> {
        match self {
            ExprType::Sequence { element, .. } | ExprType::Collection { element, .. } => {
                Some(element)
            }
            _ => None,
        }
    }

    pub fn entity_name(&self) -> Option<&str> {
        match self {
            ExprType::Entity(name) => Some(name),
            _ => None,
        }
    }

    /// Field type on composites and records.
    pub fn field(&self, name: &str) -> Option<&ExprType> {
        match self {
            ExprType::Composite { outer, .. } if name == OUTER => Some(outer),
            ExprType::Composite { inner, .. } if name == INNER => Some(inner),
            ExprType::Record(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, t)| t),
            _ => None,
        }
    }

    /// Lambda result type.
    pub fn result(&self) -> Option<&ExprType> {
        match self {
            ExprType::Lambda { result, .. } => Some(result),
            _ => None,
        }
    }
}

impl fmt::Display for ExprType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprType::Scalar { kind, nullable } => {
                if *nullable && !kind.is_reference() {
                    write!(f, "{}?", kind)
                } else {
                    write!(f, "{}", kind)
                }
            }
            ExprType::Entity(name) => write!(f, "{}", name),
            ExprType::Composite { outer, inner } => write!(f, "Composite<{}, {}>", outer, inner),
            ExprType::Record(fields) => {
                write!(f, "{{ ")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, ty)?;
                }
                write!(f, " }}")
            }
            ExprType::Sequence { element, ordered } => {
                if *ordered {
                    write!(f, "IOrderedQueryable<{}>", element)
                } else {
                    write!(f, "IQueryable<{}>", element)
                }
            }
            ExprType::Collection { element, kind } => write!(f, "{}<{}>", kind, element),
            ExprType::Lambda { parameters, result } => {
                write!(f, "Func<")?;
                for p in parameters {
                    write!(f, "{}, ", p)?;
                }
                write!(f, "{}>", result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nullable_scalars() {
        let id = ExprType::int32();
        assert!(!id.is_nullable());
        assert!(id.make_nullable().is_nullable());
        assert!(id.eq_ignoring_nullability(&id.make_nullable()));
        assert_eq!(id.make_nullable().to_string(), "int?");
        assert!(ExprType::scalar(ScalarKind::String).is_nullable());
    }

    #[test]
    fn test_composite_fields() {
        let ty = ExprType::composite(ExprType::entity("Order"), ExprType::entity("Customer"));
        assert_eq!(ty.field(OUTER), Some(&ExprType::entity("Order")));
        assert_eq!(ty.field(INNER), Some(&ExprType::entity("Customer")));
        assert_eq!(ty.field("Other"), None);
    }

    #[test]
    fn test_sequence_display() {
        let seq = ExprType::ordered_sequence(ExprType::entity("Order"));
        assert_eq!(seq.to_string(), "IOrderedQueryable<Order>");
        assert_eq!(seq.element(), Some(&ExprType::entity("Order")));
    }
}
