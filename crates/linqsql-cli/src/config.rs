//! Configuration for the linqsql command line
//!
//! Loads configuration from:
//! 1. linqsql.yaml - store location, plan cache, logging and the entity model
//! 2. .env file / process environment - overrides
//!
//! Environment variables always override linqsql.yaml values.

use linqsql_ir::{DataType, EntityType, Model, Property, QueryModel, ScalarType};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse query JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// DuckDB database file; in-memory when absent
    #[serde(default)]
    pub database: Option<String>,

    /// SQL script run once after opening (schema, seed data)
    #[serde(default)]
    pub init_sql: Option<String>,
}

/// Query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub plan_cache: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { plan_cache: true }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: console, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "console".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ScalarType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub column: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    pub name: String,
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub key: Vec<String>,
    pub properties: Vec<PropertyConfig>,
}

/// Entity metadata the translator binds members against
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

impl ModelConfig {
    pub fn build(&self) -> Model {
        let mut model = Model::new();
        for entity in &self.entities {
            let mut entity_type = EntityType::new(&entity.name, &entity.table);
            if let Some(schema) = &entity.schema {
                entity_type = entity_type.with_schema(schema);
            }
            for property in &entity.properties {
                let scalar = DataType::scalar(property.ty);
                let ty = if property.nullable {
                    DataType::nullable(scalar)
                } else {
                    scalar
                };
                let mut prop = Property::new(&property.name, ty);
                if let Some(column) = &property.column {
                    prop = prop.with_column(column);
                }
                entity_type = entity_type.with_property(prop);
            }
            let key: Vec<&str> = entity.key.iter().map(String::as_str).collect();
            model.register_entity(entity_type.with_key(&key));
        }
        model
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(database) = std::env::var("LINQSQL_DATABASE") {
            self.store.database = Some(database);
        }
        if let Ok(enabled) = std::env::var("LINQSQL_PLAN_CACHE") {
            if let Ok(enabled) = enabled.parse() {
                self.query.plan_cache = enabled;
            }
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            self.logging.directory = dir;
        }
    }

    /// Set logging environment variables for the logging module
    pub fn apply_logging_env(&self) {
        std::env::set_var("RUST_LOG", &self.logging.level);
        std::env::set_var("LOG_FORMAT", &self.logging.format);
        std::env::set_var("LOG_OUTPUT", &self.logging.output);
        std::env::set_var("LOG_DIR", &self.logging.directory);
    }
}

/// Reads a JSON-serialized query model.
pub fn read_query<P: AsRef<Path>>(path: P) -> Result<QueryModel, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
