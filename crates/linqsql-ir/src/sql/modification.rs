//! INSERT / UPDATE / DELETE commands for pending entity changes

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::sql::generator::{qualified_table, quote_identifier, SqlCommand};
use crate::{EntityType, Model, ModelError, Value};

#[derive(Debug, Error)]
pub enum ModificationError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Missing key value {property} for {entity}")]
    MissingKeyValue { entity: String, property: String },

    #[error("No values to write for {0}")]
    NoValues(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityState {
    Added,
    Modified,
    Deleted,
}

/// One pending change: the entity type, what happened to it, and its
/// property values (all of them for inserts, key plus changed for updates,
/// at least the key for deletes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEntry {
    pub entity: String,
    pub state: EntityState,
    pub values: BTreeMap<String, Value>,
}

impl EntityEntry {
    pub fn new(entity: impl Into<String>, state: EntityState) -> Self {
        Self {
            entity: entity.into(),
            state,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(property.into(), value.into());
        self
    }
}

pub fn modification_command(model: &Model, entry: &EntityEntry) -> Result<SqlCommand, ModificationError> {
    let entity = model.get_entity(&entry.entity)?;
    for property in entry.values.keys() {
        if entity.find_property(property).is_none() {
            return Err(ModelError::PropertyNotFound {
                entity: entity.name.clone(),
                property: property.clone(),
            }
            .into());
        }
    }
    let table = qualified_table(&entity.table, entity.schema.as_deref());

    match entry.state {
        EntityState::Added => {
            let (columns, parameters) = assignments(entity, entry, |_| true);
            if columns.is_empty() {
                return Err(ModificationError::NoValues(entity.name.clone()));
            }
            let placeholders = vec!["?"; columns.len()].join(", ");
            Ok(SqlCommand {
                sql: format!("INSERT INTO {} ({}) VALUES ({})", table, columns.join(", "), placeholders),
                parameters,
            })
        }
        EntityState::Modified => {
            let (columns, mut parameters) = assignments(entity, entry, |name| !entity.key.iter().any(|k| k == name));
            if columns.is_empty() {
                return Err(ModificationError::NoValues(entity.name.clone()));
            }
            let set = columns
                .iter()
                .map(|c| format!("{} = ?", c))
                .collect::<Vec<_>>()
                .join(", ");
            let (predicate, keys) = key_predicate(entity, entry)?;
            parameters.extend(keys);
            Ok(SqlCommand {
                sql: format!("UPDATE {} SET {} WHERE {}", table, set, predicate),
                parameters,
            })
        }
        EntityState::Deleted => {
            let (predicate, parameters) = key_predicate(entity, entry)?;
            Ok(SqlCommand {
                sql: format!("DELETE FROM {} WHERE {}", table, predicate),
                parameters,
            })
        }
    }
}

/// Quoted columns and values of the entry's properties, in model order.
fn assignments(
    entity: &EntityType,
    entry: &EntityEntry,
    include: impl Fn(&str) -> bool,
) -> (Vec<String>, Vec<Value>) {
    entity
        .properties
        .iter()
        .filter(|p| include(&p.name))
        .filter_map(|p| {
            entry
                .values
                .get(&p.name)
                .map(|value| (quote_identifier(p.column_name()), value.clone()))
        })
        .unzip()
}

fn key_predicate(entity: &EntityType, entry: &EntityEntry) -> Result<(String, Vec<Value>), ModificationError> {
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    for key in entity.key_properties()? {
        let value = entry
            .values
            .get(&key.name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| ModificationError::MissingKeyValue {
                entity: entity.name.clone(),
                property: key.name.clone(),
            })?;
        clauses.push(format!("{} = ?", quote_identifier(key.column_name())));
        values.push(value.clone());
    }
    Ok((clauses.join(" AND "), values))
}
