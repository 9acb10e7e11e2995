//! ribbon-cli: command-line access to the Ribbon graph API.
//!
//! Parses query DSL strings, normalises schema definition files, and runs
//! reads, queries and tree writes against a configured Neo4j instance.

pub mod commands;
pub mod config;
pub mod error;
