//! The graph API facade: reads, queries and tree writes over one store.

use std::sync::Arc;

use serde_json::Value;

use ribbon_core::error::Result;
use ribbon_core::query::{IncludeMap, QueryTree};
use ribbon_core::store::{GraphStore, GraphTx};
use ribbon_core::{Actor, ApiConfig, ApiError, ChangeLog, NodeId, PropertyMap, SchemaRegistry};

use crate::reader::SubgraphReader;
use crate::transaction::TransactionScope;
use crate::writer::{SubgraphWriter, WriteKind};

/// One tree write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub kind: WriteKind,
    pub payload: Value,
    pub node_id: Option<NodeId>,
    pub node_type: Option<String>,
}

impl WriteRequest {
    pub fn create(node_type: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: WriteKind::Create,
            payload,
            node_id: None,
            node_type: Some(node_type.into()),
        }
    }

    pub fn update(node_id: NodeId, payload: Value) -> Self {
        Self {
            kind: WriteKind::Update,
            payload,
            node_id: Some(node_id),
            node_type: None,
        }
    }

    pub fn delete(node_id: NodeId) -> Self {
        Self {
            kind: WriteKind::Delete,
            payload: Value::Object(PropertyMap::new()),
            node_id: Some(node_id),
            node_type: None,
        }
    }
}

/// Result tree of a write plus the changes it made.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub result: Value,
    pub changes: ChangeLog,
}

/// Entry point for reading and writing subgraphs.
///
/// Clone is cheap; the schema and store are shared.
#[derive(Clone)]
pub struct GraphApi {
    store: Arc<dyn GraphStore>,
    schema: Arc<SchemaRegistry>,
    config: ApiConfig,
}

impl GraphApi {
    pub fn new(store: Arc<dyn GraphStore>, schema: Arc<SchemaRegistry>) -> Self {
        Self::with_config(store, schema, ApiConfig::default())
    }

    pub fn with_config(store: Arc<dyn GraphStore>, schema: Arc<SchemaRegistry>, config: ApiConfig) -> Self {
        Self {
            store,
            schema,
            config,
        }
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Open a transaction scope for composing several operations atomically
    /// through the `*_in` methods.
    pub async fn begin(&self) -> Result<TransactionScope> {
        TransactionScope::begin(self.store.as_ref()).await
    }

    /// Read the subgraph rooted at `node_id` in a transaction of its own.
    pub async fn fetch(
        &self,
        actor: Actor,
        include: &IncludeMap,
        node_id: NodeId,
        node_type: Option<&str>,
    ) -> Result<Value> {
        let mut scope = self.begin().await?;
        let outcome = self.fetch_in(scope.tx(), actor, include, node_id, node_type).await;
        scope.finish(outcome).await
    }

    /// Read the subgraph rooted at `node_id` inside a caller-owned transaction.
    pub async fn fetch_in(
        &self,
        tx: &mut dyn GraphTx,
        actor: Actor,
        include: &IncludeMap,
        node_id: NodeId,
        node_type: Option<&str>,
    ) -> Result<Value> {
        SubgraphReader::new(&self.schema, &self.config)
            .fetch(actor, include, node_id, node_type, tx)
            .await
    }

    /// List the nodes of `node_type` selected by `tree`.
    pub async fn query(&self, actor: Actor, node_type: &str, tree: &QueryTree) -> Result<Vec<Value>> {
        let mut scope = self.begin().await?;
        let outcome = SubgraphReader::new(&self.schema, &self.config)
            .query(actor, node_type, tree, scope.tx())
            .await;
        scope.finish(outcome).await
    }

    /// Apply a tree write in a transaction of its own.
    ///
    /// The staged changes are validated before commit; listeners run after
    /// the commit succeeded and never for a rolled back write.
    pub async fn apply(&self, actor: Actor, request: &WriteRequest) -> Result<WriteOutcome> {
        let mut scope = self.begin().await?;
        let outcome = self.apply_in(scope.tx(), actor, request).await;
        let outcome = scope.finish(outcome).await?;
        tracing::info!(kind = %request.kind, changes = outcome.changes.len(), "Applied update");

        self.dispatch(actor, &outcome.changes).await;
        Ok(outcome)
    }

    /// Stage and validate a tree write inside a caller-owned transaction.
    ///
    /// Listeners are not notified; call [`GraphApi::dispatch`] once the
    /// transaction has committed.
    pub async fn apply_in(&self, tx: &mut dyn GraphTx, actor: Actor, request: &WriteRequest) -> Result<WriteOutcome> {
        let payload = request
            .payload
            .as_object()
            .ok_or_else(|| ApiError::MalformedUpdate("Update payload must be an object.".to_string()))?;

        let mut writer = SubgraphWriter::new(&self.schema, actor);
        let result = writer
            .apply(
                request.kind,
                payload,
                request.node_id,
                request.node_type.as_deref(),
                tx,
            )
            .await?;
        let changes = writer.into_changes();
        changes.validate(actor, tx).await?;
        Ok(WriteOutcome { result, changes })
    }

    /// Notify listeners of committed changes.
    pub async fn dispatch(&self, actor: Actor, changes: &ChangeLog) {
        changes.dispatch(actor).await;
    }
}
