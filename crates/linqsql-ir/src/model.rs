//! Metadata model - maps entity types onto tables and columns

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::types::DataType;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Entity type not found: {0}")]
    EntityNotFound(String),

    #[error("Property not found: {entity}.{property}")]
    PropertyNotFound { entity: String, property: String },

    #[error("Entity type {0} has no key")]
    MissingKey(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub ty: DataType,
}

impl Property {
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        Self {
            name: name.into(),
            column: None,
            ty,
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub properties: Vec<Property>,
    #[serde(default)]
    pub key: Vec<String>,
}

impl EntityType {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            schema: None,
            properties: Vec::new(),
            key: Vec::new(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_key(mut self, key: &[&str]) -> Self {
        self.key = key.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn find_property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn key_properties(&self) -> Result<Vec<&Property>, ModelError> {
        if self.key.is_empty() {
            return Err(ModelError::MissingKey(self.name.clone()));
        }
        self.key
            .iter()
            .map(|k| {
                self.find_property(k).ok_or_else(|| ModelError::PropertyNotFound {
                    entity: self.name.clone(),
                    property: k.clone(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    #[serde(default)]
    entities: BTreeMap<String, EntityType>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: EntityType) -> Self {
        self.register_entity(entity);
        self
    }

    pub fn register_entity(&mut self, entity: EntityType) {
        self.entities.insert(entity.name.clone(), entity);
    }

    pub fn find_entity(&self, name: &str) -> Option<&EntityType> {
        self.entities.get(name)
    }

    pub fn get_entity(&self, name: &str) -> Result<&EntityType, ModelError> {
        self.find_entity(name)
            .ok_or_else(|| ModelError::EntityNotFound(name.to_string()))
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityType> {
        self.entities.values()
    }
}
