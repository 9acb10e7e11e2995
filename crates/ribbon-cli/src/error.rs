//! Error types for the ribbon CLI.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Schema error: {0}")]
    Schema(#[from] ribbon_core::SchemaError),

    #[error("Query parsing error: {0}")]
    Parse(#[from] ribbon_core::ParseError),

    #[error(transparent)]
    Api(#[from] ribbon_core::ApiError),

    #[error("Graph error: {0}")]
    Graph(#[from] ribbon_graph::GraphError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, CliError>;
