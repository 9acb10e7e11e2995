//! The seam between the API engines and a transactional graph store.
//!
//! Engines only ever talk to a [`GraphTx`]; statements are awaited one at a
//! time, so a read issued after a write in the same transaction observes it.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::query::NodeQuery;
use crate::types::{Direction, NodeId, PropertyMap};

/// Label of the singleton node holding the global id counter.
pub const ID_COUNTER_LABEL: &str = "_GlobalUniqueId";

/// Edge pattern of a relationship: relation label, direction seen from the
/// owning node, and the label of the nodes on the other end.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgeSpec {
    pub label: String,
    pub direction: Direction,
    pub target: String,
}

/// A store that can open transactions.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn GraphTx>, StoreError>;
}

/// One open store transaction. Dropping it without committing discards all
/// staged statements.
#[async_trait]
pub trait GraphTx: Send {
    /// Labels of the node with `id`, or `None` if it does not exist.
    async fn node_labels(&mut self, id: NodeId) -> Result<Option<Vec<String>>, StoreError>;

    /// Whether a node with `id` carries `label`.
    async fn node_exists(&mut self, id: NodeId, label: &str) -> Result<bool, StoreError>;

    /// Atomically increment the global counter and return the new value.
    /// The counter node is created with value 1 on first use.
    async fn next_id(&mut self) -> Result<NodeId, StoreError>;

    /// Create a node with `label` and `properties` (which include `id`).
    async fn create_node(&mut self, label: &str, properties: &PropertyMap) -> Result<(), StoreError>;

    /// Raw property value; `Null` when unset.
    async fn get_property(&mut self, id: NodeId, name: &str) -> Result<Value, StoreError>;

    async fn set_property(&mut self, id: NodeId, name: &str, value: &Value) -> Result<(), StoreError>;

    /// Ids of nodes labelled `label` matching `query`.
    async fn find_nodes(&mut self, label: &str, query: &NodeQuery) -> Result<Vec<NodeId>, StoreError>;

    /// Ids of nodes connected to `id` through `edge`, matching `query`, in
    /// store order unless `query` orders them.
    async fn related_nodes(
        &mut self,
        id: NodeId,
        edge: &EdgeSpec,
        query: &NodeQuery,
    ) -> Result<Vec<NodeId>, StoreError>;

    /// Create the edge unless it already exists.
    async fn add_edge(&mut self, from: NodeId, to: NodeId, edge: &EdgeSpec) -> Result<(), StoreError>;

    async fn remove_edge(&mut self, from: NodeId, to: NodeId, edge: &EdgeSpec) -> Result<(), StoreError>;

    /// Delete the node together with all of its edges.
    async fn delete_node(&mut self, id: NodeId) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
