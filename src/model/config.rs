/// Entity model configuration.
///
/// Models are described in YAML:
///
/// ```yaml
/// entities:
///   - name: Customer
///     key: Id                  # or a list for composite keys
///     properties:
///       - { name: Id, type: int32 }
///       - { name: Name, type: string, nullable: true }
///   - name: Order
///     key: Id
///     properties:
///       - { name: Id, type: int32 }
///       - { name: CustomerId, type: int32 }
/// relationships:
///   - dependent: Order
///     principal: Customer
///     foreign_key: CustomerId
///     principal_key: Id        # defaults to the principal's primary key
///     required: true           # defaults to "no foreign key property is nullable"
///     dependent_to_principal: Customer
///     principal_to_dependent: Orders
///     collection: list         # list | set | none (one-to-one)
/// ```
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::entity_model::{
    CollectionKind, EntityType, ForeignKey, Model, Navigation, NavigationDirection, PropertyDef,
    ScalarKind,
};
use super::errors::ModelError;

lazy_static::lazy_static! {
    /// Entity, property and navigation names
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Key columns, single or composite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum KeySpec {
    Single(String),
    Composite(Vec<String>),
}

impl KeySpec {
    pub fn columns(&self) -> Vec<String> {
        match self {
            KeySpec::Single(col) => vec![col.clone()],
            KeySpec::Composite(cols) => cols.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub entities: Vec<EntityConfig>,
    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityConfig {
    pub name: String,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub key: Option<KeySpec>,
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropertyConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ScalarKind,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub backing_field: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CollectionShape {
    #[default]
    List,
    Set,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationshipConfig {
    pub dependent: String,
    pub principal: String,
    pub foreign_key: KeySpec,
    #[serde(default)]
    pub principal_key: Option<KeySpec>,
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub dependent_to_principal: Option<String>,
    #[serde(default)]
    pub dependent_to_principal_field: Option<String>,
    #[serde(default)]
    pub principal_to_dependent: Option<String>,
    #[serde(default)]
    pub principal_to_dependent_field: Option<String>,
    #[serde(default)]
    pub collection: CollectionShape,
}

fn check_identifier(name: &str) -> Result<(), ModelError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(ModelError::InvalidIdentifier {
            name: name.to_string(),
            reason: "expected a letter or underscore followed by letters, digits or underscores"
                .to_string(),
        })
    }
}

impl Model {
    pub fn from_yaml_str(content: &str) -> Result<Model, ModelError> {
        let config: ModelConfig =
            serde_yaml::from_str(content).map_err(|e| ModelError::ConfigParseError {
                error: e.to_string(),
            })?;
        Model::from_config(&config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Model, ModelError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ModelError::ConfigReadError {
                error: e.to_string(),
            })?;
        Model::from_yaml_str(&content)
    }

    pub fn from_config(config: &ModelConfig) -> Result<Model, ModelError> {
        let mut model = Model::new();

        for entity_config in &config.entities {
            check_identifier(&entity_config.name)?;
            if model.contains_entity(&entity_config.name) {
                return Err(ModelError::Duplicate {
                    name: entity_config.name.clone(),
                    scope: "entities".to_string(),
                });
            }

            let mut entity = EntityType::new(entity_config.name.clone());
            entity.base_type = entity_config.base.clone();
            entity.primary_key = entity_config
                .key
                .as_ref()
                .map(|k| k.columns())
                .unwrap_or_default();

            for property in &entity_config.properties {
                check_identifier(&property.name)?;
                if entity.declared_property(&property.name).is_some() {
                    return Err(ModelError::Duplicate {
                        name: property.name.clone(),
                        scope: entity.name.clone(),
                    });
                }
                entity.properties.push(PropertyDef {
                    name: property.name.clone(),
                    kind: property.kind,
                    nullable: property.nullable,
                    backing_field: property.backing_field.clone(),
                });
            }
            model.insert_entity(entity);
        }

        let names: Vec<String> = model.entity_names().map(str::to_string).collect();
        for name in &names {
            // Surfaces unknown base types and cycles.
            model.hierarchy(name)?;
            let keys = model.primary_key(name)?;
            log::trace!("entity {} keyed by {} properties", name, keys.len());
        }

        for relationship in &config.relationships {
            add_relationship(&mut model, relationship)?;
        }

        log::debug!(
            "Loaded model with {} entities and {} relationships",
            names.len(),
            config.relationships.len()
        );
        Ok(model)
    }
}

fn add_relationship(model: &mut Model, rel: &RelationshipConfig) -> Result<(), ModelError> {
    let fk_columns = rel.foreign_key.columns();
    let fk_properties = model.properties(&rel.dependent, &fk_columns)?;
    let required = rel
        .required
        .unwrap_or_else(|| fk_properties.iter().all(|p| !p.nullable));

    let principal_key = match &rel.principal_key {
        Some(key) => key.columns(),
        None => model
            .primary_key(&rel.principal)?
            .iter()
            .map(|p| p.name.clone())
            .collect(),
    };
    model.properties(&rel.principal, &principal_key)?;

    if fk_columns.len() != principal_key.len() {
        return Err(ModelError::KeyArityMismatch {
            dependent: rel.dependent.clone(),
            fk: fk_columns.join(", "),
            fk_len: fk_columns.len(),
            principal: rel.principal.clone(),
            pk: principal_key.join(", "),
            pk_len: principal_key.len(),
        });
    }

    let foreign_key = Arc::new(ForeignKey {
        dependent_entity: rel.dependent.clone(),
        principal_entity: rel.principal.clone(),
        properties: fk_columns,
        principal_key,
        is_required: required,
    });

    if let Some(name) = &rel.dependent_to_principal {
        attach_navigation(
            model,
            Navigation {
                name: name.clone(),
                declaring_entity: rel.dependent.clone(),
                target_entity: rel.principal.clone(),
                direction: NavigationDirection::DependentToPrincipal,
                foreign_key: foreign_key.clone(),
                collection: None,
                backing_field: rel.dependent_to_principal_field.clone(),
            },
        )?;
    }

    if let Some(name) = &rel.principal_to_dependent {
        let collection = match rel.collection {
            CollectionShape::List => Some(CollectionKind::List),
            CollectionShape::Set => Some(CollectionKind::Set),
            CollectionShape::None => None,
        };
        attach_navigation(
            model,
            Navigation {
                name: name.clone(),
                declaring_entity: rel.principal.clone(),
                target_entity: rel.dependent.clone(),
                direction: NavigationDirection::PrincipalToDependent,
                foreign_key,
                collection,
                backing_field: rel.principal_to_dependent_field.clone(),
            },
        )?;
    }

    Ok(())
}

fn attach_navigation(model: &mut Model, navigation: Navigation) -> Result<(), ModelError> {
    check_identifier(&navigation.name)?;
    let entity = model.entity_mut(&navigation.declaring_entity)?;
    if entity.declared_property(&navigation.name).is_some()
        || entity.declared_navigation(&navigation.name).is_some()
    {
        return Err(ModelError::Duplicate {
            name: navigation.name.clone(),
            scope: entity.name.clone(),
        });
    }
    entity.navigations.push(Arc::new(navigation));
    Ok(())
}
