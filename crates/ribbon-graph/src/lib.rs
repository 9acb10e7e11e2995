//! Ribbon Graph: subgraph reads and tree writes over a transactional graph
//! store.
//!
//! Provides the Neo4j binding of the store seam, an in-memory store with the
//! same semantics, transaction scoping, and the recursive reader and writer
//! behind [`GraphApi`].

pub mod api;
pub mod client;
pub mod memory;
pub mod mutations;
pub mod queries;
pub mod reader;
pub mod transaction;
pub mod writer;

pub use api::{GraphApi, WriteOutcome, WriteRequest};
pub use client::{GraphClient, GraphConfig, GraphError, Neo4jTx};
pub use memory::MemoryStore;
pub use reader::SubgraphReader;
pub use transaction::TransactionScope;
pub use writer::{SubgraphWriter, WriteKind};
