//! ribbon-core: schema model, permissions, query language and change tracking
//! for the Ribbon declarative graph API.
//!
//! This crate holds everything that does not talk to a concrete store:
//! - Node type descriptors and the schema registry
//! - Permission predicates and deferred change validation
//! - Query trees, the query-string parser and the Cypher filter translator
//! - The `GraphStore` / `GraphTx` seam implemented by store backends
//! - Common error types and configuration

pub mod change;
pub mod config;
pub mod constraint;
pub mod definition;
pub mod error;
pub mod parser;
pub mod permission;
pub mod query;
pub mod schema;
pub mod store;
pub mod types;

pub use change::{ChangeListener, ChangeLog, ChangeRecord};
pub use config::ApiConfig;
pub use error::{ApiError, ErrorStatus, ParseError, SchemaError, StoreError};
pub use permission::{Permission, PermissionCheck};
pub use query::{ConstraintExpr, IncludeMap, NodeQuery, QueryTree};
pub use schema::{Attribute, Cardinality, NodeModel, Relationship, SchemaRegistry};
pub use store::{EdgeSpec, GraphStore, GraphTx};
pub use types::{Actor, Direction, NodeId, PropertyMap};
