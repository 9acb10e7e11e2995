//! Configuration for the ribbon CLI.

use std::path::Path;

use serde::Deserialize;

use ribbon_core::definition::SchemaDefinition;
use ribbon_core::{ApiConfig, SchemaRegistry};
use ribbon_graph::GraphConfig;

use crate::error::Result;

/// Top-level CLI configuration.
///
/// Loaded from the `[neo4j]` and `[api]` sections of `ribbon.toml` or
/// `RIBBON_NEO4J__*` / `RIBBON_API__*` environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub neo4j: GraphConfig,

    #[serde(default)]
    pub api: ApiConfig,
}

impl CliConfig {
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("RIBBON")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(cfg.try_deserialize()?)
    }
}

/// Read a schema definition file (TOML or JSON, by extension) and build the
/// registry it declares.
pub fn load_schema(path: &Path) -> Result<SchemaRegistry> {
    let definition: SchemaDefinition = config::Config::builder()
        .add_source(config::File::from(path))
        .build()?
        .try_deserialize()?;
    tracing::debug!(path = %path.display(), types = definition.types.len(), "Loaded schema definition");
    Ok(definition.into_registry()?)
}
