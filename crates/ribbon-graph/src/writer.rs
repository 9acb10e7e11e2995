//! Recursive application of an update tree.
//!
//! Every mutation is staged in the caller's transaction and appended to the
//! writer's [`ChangeLog`]. Permissions are not checked here: the log is
//! validated as a whole once the tree has been applied.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use ribbon_core::error::Result;
use ribbon_core::query::NodeQuery;
use ribbon_core::schema::{Field, CREATED_AT, CREATED_BY, ID, UPDATED_AT};
use ribbon_core::store::GraphTx;
use ribbon_core::types::is_storable;
use ribbon_core::{
    Actor, ApiError, Attribute, ChangeLog, ChangeRecord, NodeId, NodeModel, PropertyMap, Relationship,
    SchemaRegistry,
};

use crate::reader::{resolve_model, BoxFuture};

/// What a write does to its root node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update,
    Delete,
}

impl WriteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(ApiError::MalformedUpdate(format!(
                "Unknown update type '{other}'."
            ))),
        }
    }
}

/// Relationship actions, in the order they are applied.
const ACTIONS: [&str; 3] = ["delete", "detach", "attach"];

fn malformed(message: impl Into<String>) -> ApiError {
    ApiError::MalformedUpdate(message.into())
}

/// The `id` of a target reference, if it names one.
fn reference_id(reference: &PropertyMap) -> Result<Option<NodeId>> {
    match reference.get(ID) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(|id| Some(NodeId(id)))
            .ok_or_else(|| malformed(format!("Invalid node id {value}."))),
    }
}

fn required_id(reference: &PropertyMap, action: &str) -> Result<NodeId> {
    reference_id(reference)?.ok_or_else(|| malformed(format!("'{action}' requires a node id.")))
}

fn now() -> Value {
    Value::from(Utc::now().to_rfc3339())
}

/// Applies update trees for one actor, accumulating a change log.
pub struct SubgraphWriter<'a> {
    schema: &'a SchemaRegistry,
    actor: Actor,
    changes: ChangeLog,
}

impl<'a> SubgraphWriter<'a> {
    pub fn new(schema: &'a SchemaRegistry, actor: Actor) -> Self {
        Self {
            schema,
            actor,
            changes: ChangeLog::new(),
        }
    }

    pub fn changes(&self) -> &ChangeLog {
        &self.changes
    }

    pub fn into_changes(self) -> ChangeLog {
        self.changes
    }

    /// Apply `payload` to one node and, through its relationship keys, to the
    /// nodes below it. Returns the written values keyed like the payload,
    /// plus `id` unless the node was deleted.
    pub fn apply<'t>(
        &'t mut self,
        kind: WriteKind,
        payload: &'t PropertyMap,
        node_id: Option<NodeId>,
        node_type: Option<&'t str>,
        tx: &'t mut dyn GraphTx,
    ) -> BoxFuture<'t, Result<Value>> {
        Box::pin(async move {
            let (model, node_id) = match kind {
                WriteKind::Create => {
                    if node_id.is_some() {
                        return Err(malformed("An id must not be given for a new node."));
                    }
                    let node_type = node_type.ok_or(ApiError::MissingNodeType)?;
                    let model = Arc::clone(self.schema.model(node_type)?);
                    let id = self.create_node(&model, tx).await?;
                    (model, id)
                }
                WriteKind::Update | WriteKind::Delete => {
                    let id = node_id
                        .ok_or_else(|| malformed(format!("An id is required to {kind} a node.")))?;
                    (resolve_model(self.schema, tx, id, node_type).await?, id)
                }
            };
            tracing::debug!(%kind, node_type = model.name(), %node_id, "Applying update");

            let mut result = Map::new();
            for (key, value) in payload {
                if key == ID {
                    continue;
                }
                let written = match model.field(key) {
                    Some(Field::Attribute(attribute)) => {
                        self.write_attribute(attribute, node_id, value, tx).await?
                    }
                    Some(Field::Relationship(relationship)) => {
                        let actions = value
                            .as_object()
                            .ok_or_else(|| malformed("Malformed update dictionary."))?;
                        if relationship.is_to_one() {
                            self.update_to_one(&model, relationship, node_id, actions, tx)
                                .await?
                        } else {
                            self.update_to_many(&model, relationship, node_id, actions, tx)
                                .await?
                        }
                    }
                    None => return Err(ApiError::no_property(key)),
                };
                result.insert(key.clone(), written);
            }

            if kind == WriteKind::Delete {
                self.delete_node(&model, node_id, tx).await?;
            } else {
                result.insert(ID.to_string(), Value::from(node_id.0));
            }
            Ok(Value::Object(result))
        })
    }

    async fn create_node(&mut self, model: &Arc<NodeModel>, tx: &mut dyn GraphTx) -> Result<NodeId> {
        let id = tx.next_id().await?;
        let stamp = now();
        let mut properties = PropertyMap::new();
        properties.insert(ID.to_string(), Value::from(id.0));
        properties.insert(CREATED_AT.to_string(), stamp.clone());
        properties.insert(UPDATED_AT.to_string(), stamp);
        if let Some(user_id) = self.actor.user_id() {
            properties.insert(CREATED_BY.to_string(), Value::from(user_id));
        }
        tx.create_node(model.name(), &properties).await?;
        tracing::debug!(node_type = model.name(), node_id = %id, "Created node");

        self.changes.push(ChangeRecord::NodeCreated {
            model: Arc::clone(model),
            node_id: id,
        });
        Ok(id)
    }

    async fn delete_node(&mut self, model: &Arc<NodeModel>, node_id: NodeId, tx: &mut dyn GraphTx) -> Result<()> {
        let owner = tx.get_property(node_id, CREATED_BY).await?.as_i64();
        tx.delete_node(node_id).await?;
        tracing::debug!(node_type = model.name(), %node_id, "Deleted node");

        self.changes.push(ChangeRecord::NodeDeleted {
            model: Arc::clone(model),
            node_id,
            owner,
        });
        Ok(())
    }

    async fn write_attribute(
        &mut self,
        attribute: &Arc<Attribute>,
        node_id: NodeId,
        value: &Value,
        tx: &mut dyn GraphTx,
    ) -> Result<Value> {
        if !is_storable(value) {
            return Err(ApiError::InvalidValue(format!(
                "'{}' cannot hold {value}.",
                attribute.name()
            )));
        }
        let old_value = tx.get_property(node_id, attribute.name()).await?;
        self.changes.push(ChangeRecord::AttributeWritten {
            attribute: Arc::clone(attribute),
            node_id,
            old_value,
            new_value: value.clone(),
        });
        tx.set_property(node_id, attribute.name(), value).await?;
        if attribute.name() != UPDATED_AT {
            tx.set_property(node_id, UPDATED_AT, &now()).await?;
        }
        Ok(value.clone())
    }

    async fn remove_edge(
        &mut self,
        model: &NodeModel,
        relationship: &Arc<Relationship>,
        node_id: NodeId,
        other_id: NodeId,
        tx: &mut dyn GraphTx,
    ) -> Result<()> {
        tx.remove_edge(node_id, other_id, &relationship.edge_spec()).await?;
        let reverse = self.schema.reverse_relationship(model.name(), relationship.name());
        self.changes.push_edge(false, relationship, reverse, node_id, other_id);
        Ok(())
    }

    async fn add_edge(
        &mut self,
        model: &NodeModel,
        relationship: &Arc<Relationship>,
        node_id: NodeId,
        other_id: NodeId,
        tx: &mut dyn GraphTx,
    ) -> Result<()> {
        let reverse = self
            .schema
            .reverse_relationship(model.name(), relationship.name())
            .cloned();
        if let Some(reverse) = reverse.as_ref().filter(|r| r.is_to_one()) {
            let previous = self.attached(reverse, other_id, tx).await?;
            if let Some(previous) = previous.filter(|p| *p != node_id) {
                let other_model = Arc::clone(self.schema.model(relationship.target())?);
                self.remove_edge(&other_model, reverse, other_id, previous, tx).await?;
            }
        }

        tx.add_edge(node_id, other_id, &relationship.edge_spec()).await?;
        self.changes
            .push_edge(true, relationship, reverse.as_ref(), node_id, other_id);
        Ok(())
    }

    /// The node currently attached through a to-one relationship.
    async fn attached(
        &self,
        relationship: &Relationship,
        node_id: NodeId,
        tx: &mut dyn GraphTx,
    ) -> Result<Option<NodeId>> {
        let current = tx
            .related_nodes(node_id, &relationship.edge_spec(), &NodeQuery::all())
            .await?;
        Ok(current.first().copied())
    }

    async fn update_to_one(
        &mut self,
        model: &NodeModel,
        relationship: &Arc<Relationship>,
        node_id: NodeId,
        actions: &PropertyMap,
        tx: &mut dyn GraphTx,
    ) -> Result<Value> {
        let mut entries = actions.iter();
        let (action, reference) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(malformed(
                    "To-one relationships take exactly one of attach, detach or delete.",
                ))
            }
        };
        if !ACTIONS.contains(&action.as_str()) {
            return Err(malformed("Relationships only accept attach, detach or delete."));
        }
        let reference = reference
            .as_object()
            .ok_or_else(|| malformed("Malformed update dictionary."))?;
        let target = relationship.target();
        let current = self.attached(relationship, node_id, tx).await?;

        match action.as_str() {
            "delete" => {
                let id = required_id(reference, action)?;
                if current != Some(id) {
                    return Err(malformed(format!("Cannot delete node {id} which is not related.")));
                }
                self.apply(WriteKind::Delete, reference, Some(id), Some(target), tx)
                    .await
            }
            "detach" => {
                let id = required_id(reference, action)?;
                if current != Some(id) {
                    return Err(malformed(format!("Cannot detach node {id} which is not related.")));
                }
                self.remove_edge(model, relationship, node_id, id, tx).await?;
                self.apply(WriteKind::Update, reference, Some(id), Some(target), tx)
                    .await
            }
            _ => {
                let requested = reference_id(reference)?;
                if let Some(current) = current.filter(|c| Some(*c) != requested) {
                    self.remove_edge(model, relationship, node_id, current, tx).await?;
                }
                let id = match requested {
                    Some(id) => {
                        resolve_model(self.schema, tx, id, Some(target)).await?;
                        id
                    }
                    None => {
                        let target_model = Arc::clone(self.schema.model(target)?);
                        self.create_node(&target_model, tx).await?
                    }
                };
                self.add_edge(model, relationship, node_id, id, tx).await?;
                self.apply(WriteKind::Update, reference, Some(id), Some(target), tx)
                    .await
            }
        }
    }

    async fn update_to_many(
        &mut self,
        model: &NodeModel,
        relationship: &Arc<Relationship>,
        node_id: NodeId,
        actions: &PropertyMap,
        tx: &mut dyn GraphTx,
    ) -> Result<Value> {
        let mut lists = Vec::with_capacity(actions.len());
        for (action, references) in actions {
            if !ACTIONS.contains(&action.as_str()) {
                return Err(malformed("Relationships only accept attach, detach or delete."));
            }
            let references = references
                .as_array()
                .ok_or_else(|| malformed("Malformed update dictionary."))?
                .iter()
                .map(|r| r.as_object().ok_or_else(|| malformed("Malformed update dictionary.")))
                .collect::<Result<Vec<_>>>()?;
            lists.push((action.as_str(), references));
        }
        lists.sort_by_key(|(action, _)| ACTIONS.iter().position(|a| a == action));

        let target = relationship.target();
        let mut results = Vec::new();
        for (action, references) in lists {
            match action {
                "delete" => {
                    for reference in references {
                        let id = required_id(reference, action)?;
                        results.push(
                            self.apply(WriteKind::Delete, reference, Some(id), Some(target), tx)
                                .await?,
                        );
                    }
                }
                "detach" => {
                    let current = tx
                        .related_nodes(node_id, &relationship.edge_spec(), &NodeQuery::all())
                        .await?;
                    for reference in references {
                        let id = required_id(reference, action)?;
                        if !current.contains(&id) {
                            return Err(malformed(format!("Cannot detach node {id} which is not related.")));
                        }
                        self.remove_edge(model, relationship, node_id, id, tx).await?;
                        results.push(
                            self.apply(WriteKind::Update, reference, Some(id), Some(target), tx)
                                .await?,
                        );
                    }
                }
                _ => {
                    let target_model = Arc::clone(self.schema.model(target)?);
                    let mut ids = Vec::with_capacity(references.len());
                    for reference in &references {
                        let id = match reference_id(reference)? {
                            Some(id) => id,
                            None => self.create_node(&target_model, tx).await?,
                        };
                        ids.push(id);
                    }

                    let current = tx
                        .related_nodes(node_id, &relationship.edge_spec(), &NodeQuery::all())
                        .await?;
                    for (reference, id) in references.into_iter().zip(ids) {
                        if current.contains(&id) {
                            continue;
                        }
                        resolve_model(self.schema, tx, id, Some(target)).await?;
                        self.add_edge(model, relationship, node_id, id, tx).await?;
                        results.push(
                            self.apply(WriteKind::Update, reference, Some(id), Some(target), tx)
                                .await?,
                        );
                    }
                }
            }
        }
        Ok(Value::Array(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use ribbon_core::store::GraphStore;
    use ribbon_core::Permission;
    use serde_json::json;

    fn schema() -> SchemaRegistry {
        SchemaRegistry::builder()
            .model(
                NodeModel::builder("User")
                    .attribute(Attribute::new("name"))
                    .relationship(Relationship::to_many("posts", "Post").label("AUTHORED").direction(ribbon_core::Direction::Outgoing)),
            )
            .model(
                NodeModel::builder("Post")
                    .attribute(Attribute::new("body").readable(Permission::Public))
                    .relationship(
                        Relationship::to_one("author", "User")
                            .label("AUTHORED")
                            .direction(ribbon_core::Direction::Incoming),
                    ),
            )
            .build()
            .unwrap()
    }

    fn payload(value: Value) -> PropertyMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_write_kind_from_str() {
        assert_eq!("create".parse::<WriteKind>().unwrap(), WriteKind::Create);
        assert_eq!(WriteKind::Delete.to_string(), "delete");
        assert!(matches!(
            "upsert".parse::<WriteKind>(),
            Err(ApiError::MalformedUpdate(_))
        ));
    }

    #[tokio::test]
    async fn test_create_with_nested_attach() {
        let schema = schema();
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut writer = SubgraphWriter::new(&schema, Actor::User(5));
        let update = payload(json!({
            "name": "Ada",
            "posts": {"attach": [{"body": "hello"}, {"body": "again"}]}
        }));
        let result = writer
            .apply(WriteKind::Create, &update, None, Some("User"), tx.as_mut())
            .await
            .unwrap();
        assert_eq!(
            result,
            json!({"id": 1, "name": "Ada", "posts": [
                {"id": 2, "body": "hello"},
                {"id": 3, "body": "again"}
            ]})
        );

        assert_eq!(tx.get_property(NodeId(2), CREATED_BY).await.unwrap(), json!(5));
        let author = schema.model("Post").unwrap().relationship("author").unwrap().edge_spec();
        assert_eq!(
            tx.related_nodes(NodeId(3), &author, &NodeQuery::all()).await.unwrap(),
            vec![NodeId(1)]
        );

        let kinds: Vec<_> = writer
            .changes()
            .records()
            .iter()
            .map(|r| match r {
                ChangeRecord::NodeCreated { .. } => "create",
                ChangeRecord::NodeDeleted { .. } => "delete",
                ChangeRecord::AttributeWritten { .. } => "write",
                ChangeRecord::EdgeAdded { .. } => "add",
                ChangeRecord::EdgeRemoved { .. } => "remove",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["create", "write", "create", "create", "add", "add", "write", "add", "add", "write"]
        );
    }

    #[tokio::test]
    async fn test_attach_is_idempotent_for_to_many() {
        let schema = schema();
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut writer = SubgraphWriter::new(&schema, Actor::Trusted);
        let update = payload(json!({"posts": {"attach": [{"body": "x"}]}}));
        writer
            .apply(WriteKind::Create, &update, None, Some("User"), tx.as_mut())
            .await
            .unwrap();
        let before = writer.changes().len();

        let again = payload(json!({"posts": {"attach": [{"id": 2}]}}));
        let result = writer
            .apply(WriteKind::Update, &again, Some(NodeId(1)), None, tx.as_mut())
            .await
            .unwrap();
        assert_eq!(result, json!({"id": 1, "posts": []}));
        assert_eq!(writer.changes().len(), before);
    }

    #[tokio::test]
    async fn test_malformed_relationship_updates() {
        let schema = schema();
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut writer = SubgraphWriter::new(&schema, Actor::Trusted);
        writer
            .apply(WriteKind::Create, &PropertyMap::new(), None, Some("Post"), tx.as_mut())
            .await
            .unwrap();

        for bad in [
            json!({"author": []}),
            json!({"author": {"attach": [{"id": 1}]}}),
            json!({"author": {"attach": {}, "detach": {}}}),
            json!({"author": {"link": {}}}),
        ] {
            let err = writer
                .apply(WriteKind::Update, &payload(bad), Some(NodeId(1)), None, tx.as_mut())
                .await
                .unwrap_err();
            assert!(matches!(err, ApiError::MalformedUpdate(_)), "{err}");
        }

        let err = writer
            .apply(WriteKind::Update, &payload(json!({"title": "x"})), Some(NodeId(1)), None, tx.as_mut())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidProperty(_)));

        let err = writer
            .apply(WriteKind::Update, &payload(json!({"body": {"a": 1}})), Some(NodeId(1)), None, tx.as_mut())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidValue(_)));
    }

    #[tokio::test]
    async fn test_preconditions() {
        let schema = schema();
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut writer = SubgraphWriter::new(&schema, Actor::Trusted);
        let empty = PropertyMap::new();

        let err = writer
            .apply(WriteKind::Create, &empty, None, None, tx.as_mut())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MissingNodeType));

        let err = writer
            .apply(WriteKind::Create, &empty, Some(NodeId(1)), Some("User"), tx.as_mut())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MalformedUpdate(_)));

        let err = writer
            .apply(WriteKind::Update, &empty, None, None, tx.as_mut())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MalformedUpdate(_)));

        let err = writer
            .apply(WriteKind::Create, &empty, None, Some("Robot"), tx.as_mut())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NodeTypeNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_records_owner() {
        let schema = schema();
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut writer = SubgraphWriter::new(&schema, Actor::User(8));
        writer
            .apply(WriteKind::Create, &PropertyMap::new(), None, Some("User"), tx.as_mut())
            .await
            .unwrap();
        let result = writer
            .apply(WriteKind::Delete, &PropertyMap::new(), Some(NodeId(1)), None, tx.as_mut())
            .await
            .unwrap();
        assert_eq!(result, json!({}));
        assert_eq!(tx.node_labels(NodeId(1)).await.unwrap(), None);
        assert!(matches!(
            writer.changes().records().last(),
            Some(ChangeRecord::NodeDeleted { owner: Some(8), .. })
        ));
    }
}
