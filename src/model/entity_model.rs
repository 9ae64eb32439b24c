use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::errors::ModelError;

/// Scalar storage kinds understood by the expression typer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Int32,
    Int64,
    Float64,
    Decimal,
    Bool,
    String,
    Guid,
    DateTime,
}

impl ScalarKind {
    /// Reference-typed scalars accept null without a nullable wrapper.
    pub fn is_reference(&self) -> bool {
        matches!(self, ScalarKind::String)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarKind::Int32 | ScalarKind::Int64 | ScalarKind::Float64 | ScalarKind::Decimal
        )
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::Int32 => "int",
            ScalarKind::Int64 => "long",
            ScalarKind::Float64 => "double",
            ScalarKind::Decimal => "decimal",
            ScalarKind::Bool => "bool",
            ScalarKind::String => "string",
            ScalarKind::Guid => "Guid",
            ScalarKind::DateTime => "DateTime",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub kind: ScalarKind,
    pub nullable: bool,
    pub backing_field: Option<String>,
}

impl PropertyDef {
    /// Storage member behind the property. Auto-properties fall back to the
    /// compiler-generated field name.
    pub fn backing_member(&self) -> String {
        self.backing_field
            .clone()
            .unwrap_or_else(|| format!("<{}>k__BackingField", self.name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    List,
    Set,
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionKind::List => write!(f, "List"),
            CollectionKind::Set => write!(f, "HashSet"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationDirection {
    DependentToPrincipal,
    PrincipalToDependent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub dependent_entity: String,
    pub principal_entity: String,
    /// Properties on the dependent entity.
    pub properties: Vec<String>,
    /// Referenced properties on the principal entity.
    pub principal_key: Vec<String>,
    pub is_required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Navigation {
    pub name: String,
    pub declaring_entity: String,
    pub target_entity: String,
    pub direction: NavigationDirection,
    pub foreign_key: Arc<ForeignKey>,
    pub collection: Option<CollectionKind>,
    pub backing_field: Option<String>,
}

pub type NavigationRef = Arc<Navigation>;

impl Navigation {
    pub fn is_collection(&self) -> bool {
        self.collection.is_some()
    }

    pub fn is_dependent_to_principal(&self) -> bool {
        self.direction == NavigationDirection::DependentToPrincipal
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.declaring_entity, self.name)
    }

    /// Key properties read on the declaring side and on the target side of a
    /// join along this navigation.
    pub fn join_keys(&self) -> (&[String], &[String]) {
        if self.is_dependent_to_principal() {
            (&self.foreign_key.properties, &self.foreign_key.principal_key)
        } else {
            (&self.foreign_key.principal_key, &self.foreign_key.properties)
        }
    }

    pub fn backing_member(&self) -> String {
        self.backing_field
            .clone()
            .unwrap_or_else(|| format!("<{}>k__BackingField", self.name))
    }
}

/// Serializes a navigation by its qualified name; expression dumps do not
/// repeat the metadata.
pub fn serialize_navigation<S>(navigation: &NavigationRef, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&navigation.qualified_name())
}

pub fn serialize_optional_navigation<S>(
    navigation: &Option<NavigationRef>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match navigation {
        Some(nav) => serializer.serialize_some(&nav.qualified_name()),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    pub name: String,
    pub base_type: Option<String>,
    pub properties: Vec<PropertyDef>,
    pub navigations: Vec<NavigationRef>,
    pub primary_key: Vec<String>,
}

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        EntityType {
            name: name.into(),
            base_type: None,
            properties: vec![],
            navigations: vec![],
            primary_key: vec![],
        }
    }

    pub fn declared_property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn declared_navigation(&self, name: &str) -> Option<&NavigationRef> {
        self.navigations.iter().find(|n| n.name == name)
    }
}

/// Read-only entity metadata consumed by the expansion engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    entities: BTreeMap<String, EntityType>,
}

impl Model {
    pub fn new() -> Self {
        Model::default()
    }

    pub(crate) fn insert_entity(&mut self, entity: EntityType) {
        self.entities.insert(entity.name.clone(), entity);
    }

    pub(crate) fn entity_mut(&mut self, name: &str) -> Result<&mut EntityType, ModelError> {
        self.entities
            .get_mut(name)
            .ok_or_else(|| ModelError::UnknownEntity {
                entity: name.to_string(),
            })
    }

    pub fn contains_entity(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn entity(&self, name: &str) -> Result<&EntityType, ModelError> {
        self.entities.get(name).ok_or_else(|| ModelError::UnknownEntity {
            entity: name.to_string(),
        })
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(|k| k.as_str())
    }

    /// The entity followed by its base types, most derived first.
    pub fn hierarchy(&self, name: &str) -> Result<Vec<&EntityType>, ModelError> {
        let mut chain: Vec<&EntityType> = Vec::new();
        let mut current = Some(name.to_string());
        while let Some(entity_name) = current {
            let entity = self.entity(&entity_name)?;
            if chain.iter().any(|e| e.name == entity.name) {
                return Err(ModelError::CyclicHierarchy {
                    entity: name.to_string(),
                });
            }
            current = entity.base_type.clone();
            chain.push(entity);
        }
        Ok(chain)
    }

    /// Primary key properties, taken from the nearest type in the hierarchy
    /// that declares a key.
    pub fn primary_key(&self, entity: &str) -> Result<Vec<&PropertyDef>, ModelError> {
        let key_names = self
            .hierarchy(entity)?
            .into_iter()
            .find(|e| !e.primary_key.is_empty())
            .map(|e| e.primary_key.clone())
            .ok_or_else(|| ModelError::MissingPrimaryKey {
                entity: entity.to_string(),
            })?;
        self.properties(entity, &key_names)
    }

    pub fn find_property(&self, entity: &str, name: &str) -> Result<&PropertyDef, ModelError> {
        for declaring in self.hierarchy(entity)? {
            if let Some(property) = declaring.declared_property(name) {
                return Ok(property);
            }
        }
        Err(ModelError::UnknownProperty {
            entity: entity.to_string(),
            property: name.to_string(),
        })
    }

    pub fn properties(&self, entity: &str, names: &[String]) -> Result<Vec<&PropertyDef>, ModelError> {
        names.iter().map(|n| self.find_property(entity, n)).collect()
    }

    /// Every navigation declared anywhere in the model.
    pub fn navigations(&self) -> impl Iterator<Item = &NavigationRef> {
        self.entities.values().flat_map(|e| e.navigations.iter())
    }
}
