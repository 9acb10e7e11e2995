//! Neo4j connection management and the Neo4j binding of the store seam.

use async_trait::async_trait;
use neo4rs::{BoltList, BoltNull, BoltType, ConfigBuilder, Graph, Query, Row, Txn};
use serde::Deserialize;
use serde_json::Value;

use ribbon_core::constraint::quote_identifier;
use ribbon_core::query::NodeQuery;
use ribbon_core::store::{EdgeSpec, GraphStore, GraphTx};
use ribbon_core::{NodeId, PropertyMap, SchemaRegistry, StoreError};

/// Errors from Neo4j operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<GraphError> for StoreError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Serialization(msg) => StoreError::UnexpectedResult(msg),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Configuration for connecting to Neo4j (`[neo4j]` section).
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
}

fn default_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_user() -> String {
    "neo4j".to_string()
}

fn default_password() -> String {
    "ribbon-dev".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_fetch_size() -> usize {
    256
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            user: default_user(),
            password: default_password(),
            max_connections: default_max_connections(),
            fetch_size: default_fetch_size(),
        }
    }
}

/// Thread-safe Neo4j client with connection pooling.
///
/// Implements [`GraphStore`]; every API transaction is a Neo4j transaction.
/// Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j with the given configuration.
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph for direct operations.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }

    /// Execute a statement outside any API transaction.
    pub async fn run(&self, query: Query) -> Result<(), GraphError> {
        self.graph.run(query).await?;
        Ok(())
    }

    /// Create a uniqueness constraint on `id` for every registered type.
    pub async fn setup_constraints(&self, schema: &SchemaRegistry) -> Result<(), GraphError> {
        for node_type in schema.type_names() {
            let cypher = format!(
                "CREATE CONSTRAINT {} IF NOT EXISTS FOR (n:{}) REQUIRE n.id IS UNIQUE",
                quote_identifier(&constraint_name(node_type)),
                quote_identifier(node_type)
            );
            self.run(neo4rs::query(&cypher)).await?;
            tracing::info!(node_type, "Ensured id uniqueness constraint");
        }
        Ok(())
    }

    /// Drop the constraints created by [`GraphClient::setup_constraints`].
    pub async fn remove_constraints(&self, schema: &SchemaRegistry) -> Result<(), GraphError> {
        for node_type in schema.type_names() {
            let cypher = format!(
                "DROP CONSTRAINT {} IF EXISTS",
                quote_identifier(&constraint_name(node_type))
            );
            self.run(neo4rs::query(&cypher)).await?;
            tracing::info!(node_type, "Dropped id uniqueness constraint");
        }
        Ok(())
    }
}

pub(crate) fn constraint_name(node_type: &str) -> String {
    format!("ribbon_{node_type}_id_unique")
}

#[async_trait]
impl GraphStore for GraphClient {
    async fn begin(&self) -> Result<Box<dyn GraphTx>, StoreError> {
        let txn = self.graph.start_txn().await.map_err(GraphError::from)?;
        tracing::debug!("Began Neo4j transaction");
        Ok(Box::new(Neo4jTx { txn }))
    }
}

// ── Transactions ─────────────────────────────────────────────────

/// An open Neo4j transaction. Statements run in call order.
pub struct Neo4jTx {
    pub(crate) txn: Txn,
}

impl Neo4jTx {
    /// Run a statement and collect every row.
    pub(crate) async fn rows(&mut self, query: Query) -> Result<Vec<Row>, GraphError> {
        let mut stream = self.txn.execute(query).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next(self.txn.handle()).await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Run a statement and return its first row, if any.
    pub(crate) async fn first(&mut self, query: Query) -> Result<Option<Row>, GraphError> {
        Ok(self.rows(query).await?.into_iter().next())
    }

    /// Run a statement whose result is not consumed.
    pub(crate) async fn run(&mut self, query: Query) -> Result<(), GraphError> {
        self.txn.run(query).await?;
        Ok(())
    }
}

#[async_trait]
impl GraphTx for Neo4jTx {
    async fn node_labels(&mut self, id: NodeId) -> Result<Option<Vec<String>>, StoreError> {
        Ok(self.labels_of(id).await?)
    }

    async fn node_exists(&mut self, id: NodeId, label: &str) -> Result<bool, StoreError> {
        Ok(self.exists_with_label(id, label).await?)
    }

    async fn next_id(&mut self) -> Result<NodeId, StoreError> {
        Ok(self.increment_id_counter().await?)
    }

    async fn create_node(&mut self, label: &str, properties: &PropertyMap) -> Result<(), StoreError> {
        Ok(self.create_labelled_node(label, properties).await?)
    }

    async fn get_property(&mut self, id: NodeId, name: &str) -> Result<Value, StoreError> {
        Ok(self.property_of(id, name).await?)
    }

    async fn set_property(&mut self, id: NodeId, name: &str, value: &Value) -> Result<(), StoreError> {
        Ok(self.write_property(id, name, value).await?)
    }

    async fn find_nodes(&mut self, label: &str, query: &NodeQuery) -> Result<Vec<NodeId>, StoreError> {
        Ok(self.nodes_with_constraints(label, query).await?)
    }

    async fn related_nodes(
        &mut self,
        id: NodeId,
        edge: &EdgeSpec,
        query: &NodeQuery,
    ) -> Result<Vec<NodeId>, StoreError> {
        Ok(self.related_with_constraints(id, edge, query).await?)
    }

    async fn add_edge(&mut self, from: NodeId, to: NodeId, edge: &EdgeSpec) -> Result<(), StoreError> {
        Ok(self.merge_edge(from, to, edge).await?)
    }

    async fn remove_edge(&mut self, from: NodeId, to: NodeId, edge: &EdgeSpec) -> Result<(), StoreError> {
        Ok(self.delete_edge(from, to, edge).await?)
    }

    async fn delete_node(&mut self, id: NodeId) -> Result<(), StoreError> {
        Ok(self.detach_delete(id).await?)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.commit().await.map_err(GraphError::from)?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.rollback().await.map_err(GraphError::from)?;
        Ok(())
    }
}

// ── Parameter Conversion ─────────────────────────────────────────

/// Convert a JSON property value into a Bolt parameter.
pub(crate) fn to_bolt(value: &Value) -> Result<BoltType, GraphError> {
    match value {
        Value::Null => Ok(BoltType::Null(BoltNull)),
        Value::Bool(b) => Ok(BoltType::from(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(BoltType::from(i)),
            (None, Some(f)) => Ok(BoltType::from(f)),
            _ => Err(GraphError::Serialization(format!("Unrepresentable number {n}"))),
        },
        Value::String(s) => Ok(BoltType::from(s.clone())),
        Value::Array(items) => {
            let items = items.iter().map(to_bolt).collect::<Result<Vec<_>, _>>()?;
            Ok(BoltType::List(BoltList::from(items)))
        }
        Value::Object(_) => Err(GraphError::Serialization(
            "Maps cannot be stored as node properties".to_string(),
        )),
    }
}

/// Attach `(name, value)` parameters to a query.
pub(crate) fn bind(mut query: Query, params: &[(String, Value)]) -> Result<Query, GraphError> {
    for (name, value) in params {
        query = query.param(name, to_bolt(value)?);
    }
    Ok(query)
}
