//! Read statements against Neo4j.
//!
//! Statement text is built here from schema identifiers only; every value
//! travels as a bound parameter.

use neo4rs::{query, Query};
use serde_json::Value;

use ribbon_core::constraint::{order_clause, quote_identifier, translate};
use ribbon_core::query::NodeQuery;
use ribbon_core::store::EdgeSpec;
use ribbon_core::{Direction, NodeId};

use crate::client::{bind, GraphError, Neo4jTx};

/// Cypher text plus the parameters it references.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub cypher: String,
    pub params: Vec<(String, Value)>,
}

impl Statement {
    pub(crate) fn into_query(self) -> Result<Query, GraphError> {
        bind(query(&self.cypher), &self.params)
    }
}

/// `(left)-[rel]->(right)` shaped for `direction`, seen from `left`.
pub(crate) fn edge_pattern(left: &str, rel: &str, right: &str, direction: Direction) -> String {
    match direction {
        Direction::Outgoing => format!("({left})-[{rel}]->({right})"),
        Direction::Incoming => format!("({left})<-[{rel}]-({right})"),
        Direction::Either => format!("({left})-[{rel}]-({right})"),
    }
}

/// Append the filter, ordering and paging of `node_query` to a `MATCH`
/// that binds the candidate nodes to `ident`.
fn page_statement(mut cypher: String, mut params: Vec<(String, Value)>, ident: &str, node_query: &NodeQuery) -> Statement {
    if let Some(filter) = node_query.filter.as_ref().filter(|f| !f.is_empty()) {
        let filter = translate(filter, ident, "w");
        cypher.push_str(&format!(" WHERE {}", filter.expression));
        params.extend(filter.params);
    }
    cypher.push_str(&format!(" RETURN {ident}.id AS id"));
    if let Some(order) = &node_query.order_by {
        cypher.push(' ');
        cypher.push_str(&order_clause(order, ident));
    }
    // Bolt integers are signed.
    let bounded = |n: u64| Value::from(i64::try_from(n).unwrap_or(i64::MAX));
    cypher.push_str(" SKIP $skip");
    params.push(("skip".to_string(), bounded(node_query.skip)));
    if let Some(limit) = node_query.limit {
        cypher.push_str(" LIMIT $limit");
        params.push(("limit".to_string(), bounded(limit)));
    }
    Statement { cypher, params }
}

/// Ids of `label` nodes matching `node_query`.
pub fn find_nodes_statement(label: &str, node_query: &NodeQuery) -> Statement {
    let cypher = format!("MATCH (n:{})", quote_identifier(label));
    page_statement(cypher, Vec::new(), "n", node_query)
}

/// Ids of the nodes reached from `id` through `edge`, matching `node_query`.
pub fn related_nodes_statement(id: NodeId, edge: &EdgeSpec, node_query: &NodeQuery) -> Statement {
    let cypher = format!(
        "MATCH {}",
        edge_pattern(
            "u {id: $node_id}",
            &format!(":{}", quote_identifier(&edge.label)),
            &format!("v:{}", quote_identifier(&edge.target)),
            edge.direction,
        )
    );
    page_statement(cypher, vec![("node_id".to_string(), Value::from(id.0))], "v", node_query)
}

impl Neo4jTx {
    pub(crate) async fn labels_of(&mut self, id: NodeId) -> Result<Option<Vec<String>>, GraphError> {
        let q = query("MATCH (n) WHERE n.id = $id RETURN labels(n) AS labels LIMIT 1").param("id", id.0);
        match self.first(q).await? {
            Some(row) => {
                let labels: Vec<String> = row.get("labels").map_err(|e| {
                    GraphError::Serialization(format!("Failed to read labels: {e}"))
                })?;
                Ok(Some(labels))
            }
            None => Ok(None),
        }
    }

    pub(crate) async fn exists_with_label(&mut self, id: NodeId, label: &str) -> Result<bool, GraphError> {
        let cypher = format!(
            "MATCH (n:{}) WHERE n.id = $id RETURN count(n) AS matches",
            quote_identifier(label)
        );
        let q = query(&cypher).param("id", id.0);
        match self.first(q).await? {
            Some(row) => {
                let matches: i64 = row.get("matches").unwrap_or(0);
                Ok(matches > 0)
            }
            None => Ok(false),
        }
    }

    pub(crate) async fn property_of(&mut self, id: NodeId, name: &str) -> Result<Value, GraphError> {
        let q = query("MATCH (n) WHERE n.id = $id RETURN n[$name] AS value LIMIT 1")
            .param("id", id.0)
            .param("name", name.to_string());
        match self.first(q).await? {
            Some(row) => row.get::<Value>("value").map_err(|e| {
                GraphError::Serialization(format!("Failed to read property '{name}': {e}"))
            }),
            None => Ok(Value::Null),
        }
    }

    pub(crate) async fn nodes_with_constraints(
        &mut self,
        label: &str,
        node_query: &NodeQuery,
    ) -> Result<Vec<NodeId>, GraphError> {
        let statement = find_nodes_statement(label, node_query);
        tracing::debug!(cypher = %statement.cypher, "Finding nodes");
        let rows = self.rows(statement.into_query()?).await?;
        ids_from_rows(rows)
    }

    pub(crate) async fn related_with_constraints(
        &mut self,
        id: NodeId,
        edge: &EdgeSpec,
        node_query: &NodeQuery,
    ) -> Result<Vec<NodeId>, GraphError> {
        let statement = related_nodes_statement(id, edge, node_query);
        tracing::debug!(cypher = %statement.cypher, "Finding related nodes");
        let rows = self.rows(statement.into_query()?).await?;
        ids_from_rows(rows)
    }
}

fn ids_from_rows(rows: Vec<neo4rs::Row>) -> Result<Vec<NodeId>, GraphError> {
    rows.into_iter()
        .map(|row| {
            row.get::<i64>("id")
                .map(NodeId)
                .map_err(|e| GraphError::Serialization(format!("Failed to read node id: {e}")))
        })
        .collect()
}
