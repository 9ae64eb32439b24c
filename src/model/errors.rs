//! # Model Error Types
//!
//! Errors raised while loading entity metadata from YAML and while resolving
//! member names against an entity hierarchy.
//!
//! ## Error Categories
//!
//! - **Lookup Errors**: unknown entity, property or navigation
//! - **Definition Errors**: keys and foreign keys that do not line up
//! - **Resolution Errors**: a member name that is ambiguous across the hierarchy
//! - **Configuration Errors**: file I/O and YAML parsing issues

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("No entity type named `{entity}`")]
    UnknownEntity { entity: String },
    #[error("Entity `{entity}` has no property `{property}`")]
    UnknownProperty { entity: String, property: String },
    #[error("Entity `{entity}` has no member `{member}`")]
    UnknownMember { entity: String, member: String },
    #[error("Entity `{entity}` declares no primary key")]
    MissingPrimaryKey { entity: String },
    #[error(
        "Foreign key {dependent}({fk}) has {fk_len} properties but principal key {principal}({pk}) has {pk_len}"
    )]
    KeyArityMismatch {
        dependent: String,
        fk: String,
        fk_len: usize,
        principal: String,
        pk: String,
        pk_len: usize,
    },
    #[error(
        "Member `{member}` on `{entity}` resolves to conflicting backing members `{first}` and `{second}`"
    )]
    ConflictingBackingFields {
        entity: String,
        member: String,
        first: String,
        second: String,
    },
    #[error("Entity `{entity}` has a cyclic base type chain")]
    CyclicHierarchy { entity: String },
    #[error("Duplicate definition of `{name}` in `{scope}`")]
    Duplicate { name: String, scope: String },
    #[error("Invalid identifier `{name}`: {reason}")]
    InvalidIdentifier { name: String, reason: String },
    #[error("Failed to read model file: {error}")]
    ConfigReadError { error: String },
    #[error("Failed to parse model: {error}")]
    ConfigParseError { error: String },
}

impl ModelError {
    /// True for the ambiguity error that the navigation layer reports as a
    /// conflicting binding.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ModelError::ConflictingBackingFields { .. })
    }
}
