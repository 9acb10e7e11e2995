//! Recursive materialization of a subgraph along an include tree.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};

use ribbon_core::error::Result;
use ribbon_core::query::{IncludeMap, QueryTree};
use ribbon_core::schema::{Field, ID};
use ribbon_core::store::GraphTx;
use ribbon_core::{Actor, ApiConfig, ApiError, NodeId, NodeModel, Permission, Relationship, SchemaRegistry};

pub(crate) type BoxFuture<'t, T> = Pin<Box<dyn Future<Output = T> + Send + 't>>;

/// Resolve the model of an existing node.
///
/// Without a type the node's labels decide; with one, the node must carry
/// that label. Unregistered types fail before any labelled statement runs.
pub(crate) async fn resolve_model(
    schema: &SchemaRegistry,
    tx: &mut dyn GraphTx,
    node_id: NodeId,
    node_type: Option<&str>,
) -> Result<Arc<NodeModel>> {
    let model = match node_type {
        Some(node_type) => Arc::clone(schema.model(node_type)?),
        None => {
            let labels = tx
                .node_labels(node_id)
                .await?
                .ok_or(ApiError::NodeNotFound(node_id))?;
            let node_type = labels
                .iter()
                .find(|label| schema.contains(label))
                .or(labels.first())
                .ok_or(ApiError::NodeNotFound(node_id))?;
            Arc::clone(schema.model(node_type)?)
        }
    };

    if !tx.node_exists(node_id, model.name()).await? {
        return Err(ApiError::NodeNotFound(node_id));
    }
    Ok(model)
}

/// Reject filters and orderings over attributes the target type does not
/// have, or whose read permission depends on the node.
///
/// A filter reveals stored values through which nodes match, so users may
/// only filter and order on public attributes.
pub(crate) fn check_query_attributes(actor: Actor, model: &NodeModel, tree: &QueryTree) -> Result<()> {
    let filtered = tree.filter.iter().flat_map(|f| f.attributes());
    let ordered = tree.order_by.iter().map(|o| o.key.as_str());
    for name in filtered.chain(ordered) {
        if name == ID {
            continue;
        }
        let attribute = model.attribute(name).ok_or_else(|| ApiError::no_property(name))?;
        if !actor.is_trusted() && !matches!(attribute.read_permission(), Permission::Public) {
            return Err(ApiError::PermissionDenied(format!(
                "{name}: only public attributes can be filtered or ordered on."
            )));
        }
    }
    Ok(())
}

/// Reads trees of node data, checking read permissions on every field it
/// visits.
pub struct SubgraphReader<'a> {
    schema: &'a SchemaRegistry,
    config: &'a ApiConfig,
}

impl<'a> SubgraphReader<'a> {
    pub fn new(schema: &'a SchemaRegistry, config: &'a ApiConfig) -> Self {
        Self { schema, config }
    }

    /// The subgraph rooted at `node_id`: always its `id`, plus every field
    /// named in `include`.
    pub fn fetch<'t>(
        &'t self,
        actor: Actor,
        include: &'t IncludeMap,
        node_id: NodeId,
        node_type: Option<&'t str>,
        tx: &'t mut dyn GraphTx,
    ) -> BoxFuture<'t, Result<Value>> {
        Box::pin(async move {
            let model = resolve_model(self.schema, tx, node_id, node_type).await?;
            tracing::debug!(node_type = model.name(), %node_id, fields = include.len(), "Reading node");

            let mut result = Map::new();
            result.insert(ID.to_string(), Value::from(node_id.0));

            for (key, nested) in include {
                if key == ID {
                    continue;
                }
                let value = match model.field(key) {
                    Some(Field::Attribute(attribute)) => {
                        attribute
                            .read_permission()
                            .assert_allows(attribute.name(), actor, node_id, tx)
                            .await?;
                        tx.get_property(node_id, attribute.name()).await?
                    }
                    Some(Field::Relationship(relationship)) => {
                        relationship
                            .read_permission()
                            .assert_allows(relationship.name(), actor, node_id, tx)
                            .await?;
                        self.fetch_related(actor, relationship, nested.as_ref(), node_id, tx)
                            .await?
                    }
                    None => return Err(ApiError::no_property(key)),
                };
                result.insert(key.clone(), value);
            }

            Ok(Value::Object(result))
        })
    }

    async fn fetch_related(
        &self,
        actor: Actor,
        relationship: &Relationship,
        nested: Option<&QueryTree>,
        node_id: NodeId,
        tx: &mut dyn GraphTx,
    ) -> Result<Value> {
        let target = Arc::clone(self.schema.model(relationship.target())?);
        let default_tree = QueryTree::default();
        let tree = nested.unwrap_or(&default_tree);
        check_query_attributes(actor, &target, tree)?;

        let node_query = tree.node_query(self.config.default_limit, self.config.default_skip);
        let related = tx
            .related_nodes(node_id, &relationship.edge_spec(), &node_query)
            .await?;
        let include = tree.include.clone().unwrap_or_default();

        if relationship.is_to_one() {
            return match related.first() {
                Some(&related_id) => {
                    self.fetch(actor, &include, related_id, Some(target.name()), tx)
                        .await
                }
                None => Ok(Value::Null),
            };
        }

        let mut items = Vec::with_capacity(related.len());
        for related_id in related {
            items.push(
                self.fetch(actor, &include, related_id, Some(target.name()), tx)
                    .await?,
            );
        }
        Ok(Value::Array(items))
    }

    /// Every node of `node_type` selected by `tree`, each materialized with
    /// the tree's include list.
    pub async fn query(
        &self,
        actor: Actor,
        node_type: &str,
        tree: &QueryTree,
        tx: &mut dyn GraphTx,
    ) -> Result<Vec<Value>> {
        let model = Arc::clone(self.schema.model(node_type)?);
        check_query_attributes(actor, &model, tree)?;

        let node_query = tree.node_query(self.config.default_limit, self.config.default_skip);
        let ids = tx.find_nodes(model.name(), &node_query).await?;
        tracing::debug!(node_type, matches = ids.len(), "Queried nodes");

        let include = tree.include.clone().unwrap_or_default();
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push(
                self.fetch(actor, &include, id, Some(model.name()), tx)
                    .await?,
            );
        }
        Ok(results)
    }
}
