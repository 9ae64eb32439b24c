//! Entity metadata consumed by navigation expansion.
//!
//! The model is built once (usually from YAML) and then only read: entity
//! types, their properties and keys, and the navigations that relationships
//! declare on both ends.

pub mod config;
pub mod entity_model;
pub mod errors;
pub mod member_resolver;

pub use config::ModelConfig;
pub use entity_model::{
    CollectionKind, EntityType, ForeignKey, Model, Navigation, NavigationDirection,
    NavigationRef, PropertyDef, ScalarKind,
};
pub use errors::ModelError;
pub use member_resolver::ResolvedMember;
