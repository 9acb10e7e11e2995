//! Permission predicates gating reads, writes and edge changes.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ApiError, Result};
use crate::schema::CREATED_BY;
use crate::store::GraphTx;
use crate::types::{Actor, NodeId};

/// A user-supplied predicate. Returning `Err(reason)` denies the operation.
#[async_trait]
pub trait PermissionCheck: Send + Sync {
    async fn check(
        &self,
        user_id: i64,
        node_id: NodeId,
        tx: &mut dyn GraphTx,
    ) -> std::result::Result<(), String>;
}

/// The closed set of predicate kinds a field or node type can carry.
#[derive(Clone, Default)]
pub enum Permission {
    /// Always allowed.
    Public,
    /// Always denied; used for system-managed fields.
    Internal,
    /// Allowed only for the user recorded in the node's `created_by`.
    #[default]
    Creator,
    Custom {
        name: String,
        check: Arc<dyn PermissionCheck>,
    },
}

/// Where `creator` finds the owner of a node.
enum Owner {
    Lookup,
    Known(Option<i64>),
}

impl Permission {
    pub fn custom(name: impl Into<String>, check: impl PermissionCheck + 'static) -> Self {
        Self::Custom {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// Parse a built-in kind by name.
    pub fn named(name: &str) -> Option<Self> {
        match name {
            "public" => Some(Self::Public),
            "internal" => Some(Self::Internal),
            "creator" => Some(Self::Creator),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Public => "public",
            Self::Internal => "internal",
            Self::Creator => "creator",
            Self::Custom { name, .. } => name,
        }
    }

    /// Fail with `PermissionDenied` unless `actor` may act on `node_id`.
    /// The trusted actor is never checked.
    pub async fn assert_allows(
        &self,
        subject: &str,
        actor: Actor,
        node_id: NodeId,
        tx: &mut dyn GraphTx,
    ) -> Result<()> {
        self.evaluate(subject, actor, node_id, Owner::Lookup, tx).await
    }

    /// Like [`Permission::assert_allows`] for a node that may no longer exist;
    /// `owner` is the `created_by` captured before it was deleted.
    pub async fn assert_allows_owned_by(
        &self,
        subject: &str,
        actor: Actor,
        node_id: NodeId,
        owner: Option<i64>,
        tx: &mut dyn GraphTx,
    ) -> Result<()> {
        self.evaluate(subject, actor, node_id, Owner::Known(owner), tx)
            .await
    }

    async fn evaluate(
        &self,
        subject: &str,
        actor: Actor,
        node_id: NodeId,
        owner: Owner,
        tx: &mut dyn GraphTx,
    ) -> Result<()> {
        let user_id = match actor {
            Actor::Trusted => return Ok(()),
            Actor::User(id) => id,
        };

        match self {
            Self::Public => Ok(()),
            Self::Internal => Err(ApiError::PermissionDenied(format!(
                "{subject}: internal to the system."
            ))),
            Self::Creator => {
                let creator = match owner {
                    Owner::Known(owner) => owner,
                    Owner::Lookup => tx.get_property(node_id, CREATED_BY).await?.as_i64(),
                };
                if creator == Some(user_id) {
                    Ok(())
                } else {
                    tracing::debug!(subject, user_id, %node_id, "creator check denied");
                    Err(ApiError::PermissionDenied(format!(
                        "{subject}: User {user_id} is not the creator."
                    )))
                }
            }
            Self::Custom { name, check } => check
                .check(user_id, node_id, tx)
                .await
                .map_err(|reason| ApiError::PermissionDenied(format!("{subject}: {name}: {reason}"))),
        }
    }
}

impl fmt::Debug for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
