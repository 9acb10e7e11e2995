//! Change tracking for tree writes.
//!
//! A write appends one [`ChangeRecord`] per staged mutation. Before commit the
//! whole log is replayed through the permission rules; after commit it is
//! replayed again, in order, through the registered listeners.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::schema::{Attribute, NodeModel, Relationship};
use crate::store::GraphTx;
use crate::types::{Actor, NodeId};

/// Post-commit observer attached to an attribute or relationship.
///
/// Listeners only run for changes whose transaction committed.
#[async_trait]
pub trait ChangeListener: Send + Sync {
    async fn on_attribute_changed(
        &self,
        _actor: Actor,
        _node_id: NodeId,
        _old_value: &Value,
        _new_value: &Value,
    ) {
    }

    async fn on_edge_added(&self, _actor: Actor, _node_id: NodeId, _other_id: NodeId) {}

    async fn on_edge_removed(&self, _actor: Actor, _node_id: NodeId, _other_id: NodeId) {}
}

/// One staged mutation.
#[derive(Debug, Clone)]
pub enum ChangeRecord {
    NodeCreated {
        model: Arc<NodeModel>,
        node_id: NodeId,
    },
    NodeDeleted {
        model: Arc<NodeModel>,
        node_id: NodeId,
        /// `created_by` of the node before it was deleted.
        owner: Option<i64>,
    },
    AttributeWritten {
        attribute: Arc<Attribute>,
        node_id: NodeId,
        old_value: Value,
        new_value: Value,
    },
    EdgeAdded {
        relationship: Arc<Relationship>,
        node_id: NodeId,
        other_id: NodeId,
    },
    EdgeRemoved {
        relationship: Arc<Relationship>,
        node_id: NodeId,
        other_id: NodeId,
    },
}

/// Append-only, ordered log of the mutations staged by one write.
#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    records: Vec<ChangeRecord>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ChangeRecord) {
        self.records.push(record);
    }

    /// Record an edge change and, when the relationship has a mirror on the
    /// other type, the same change seen from the other end.
    pub fn push_edge(
        &mut self,
        added: bool,
        relationship: &Arc<Relationship>,
        reverse: Option<&Arc<Relationship>>,
        node_id: NodeId,
        other_id: NodeId,
    ) {
        let record = |relationship: &Arc<Relationship>, node_id, other_id| {
            let relationship = Arc::clone(relationship);
            if added {
                ChangeRecord::EdgeAdded {
                    relationship,
                    node_id,
                    other_id,
                }
            } else {
                ChangeRecord::EdgeRemoved {
                    relationship,
                    node_id,
                    other_id,
                }
            }
        };
        self.records.push(record(relationship, node_id, other_id));
        if let Some(reverse) = reverse {
            self.records.push(record(reverse, other_id, node_id));
        }
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Check every record against the schema's rules inside `tx`, i.e.
    /// against the final staged graph rather than intermediate states.
    /// The first failure aborts; skipped entirely for the trusted actor.
    pub async fn validate(&self, actor: Actor, tx: &mut dyn GraphTx) -> Result<()> {
        if actor.is_trusted() {
            return Ok(());
        }

        for record in &self.records {
            match record {
                ChangeRecord::NodeCreated { model, node_id } => {
                    model
                        .create_permission()
                        .assert_allows(model.name(), actor, *node_id, tx)
                        .await?;
                }
                ChangeRecord::NodeDeleted {
                    model,
                    node_id,
                    owner,
                } => {
                    model
                        .delete_permission()
                        .assert_allows_owned_by(model.name(), actor, *node_id, *owner, tx)
                        .await?;
                }
                ChangeRecord::AttributeWritten {
                    attribute,
                    node_id,
                    new_value,
                    ..
                } => {
                    attribute.validate(new_value)?;
                    attribute
                        .write_permission()
                        .assert_allows(attribute.name(), actor, *node_id, tx)
                        .await?;
                }
                ChangeRecord::EdgeAdded {
                    relationship,
                    node_id,
                    ..
                } => {
                    relationship
                        .add_permission()
                        .assert_allows(relationship.name(), actor, *node_id, tx)
                        .await?;
                }
                ChangeRecord::EdgeRemoved {
                    relationship,
                    node_id,
                    ..
                } => {
                    relationship
                        .remove_permission()
                        .assert_allows(relationship.name(), actor, *node_id, tx)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Notify listeners of every committed change, in recorded order.
    pub async fn dispatch(&self, actor: Actor) {
        for record in &self.records {
            match record {
                ChangeRecord::AttributeWritten {
                    attribute,
                    node_id,
                    old_value,
                    new_value,
                } => {
                    if let Some(listener) = attribute.change_listener() {
                        listener
                            .on_attribute_changed(actor, *node_id, old_value, new_value)
                            .await;
                    }
                }
                ChangeRecord::EdgeAdded {
                    relationship,
                    node_id,
                    other_id,
                } => {
                    if let Some(listener) = relationship.change_listener() {
                        listener.on_edge_added(actor, *node_id, *other_id).await;
                    }
                }
                ChangeRecord::EdgeRemoved {
                    relationship,
                    node_id,
                    other_id,
                } => {
                    if let Some(listener) = relationship.change_listener() {
                        listener.on_edge_removed(actor, *node_id, *other_id).await;
                    }
                }
                ChangeRecord::NodeCreated { .. } | ChangeRecord::NodeDeleted { .. } => {}
            }
        }
    }
}
