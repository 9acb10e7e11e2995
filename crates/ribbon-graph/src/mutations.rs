//! Write statements against Neo4j.
//!
//! Edge creation uses MERGE so attaching an already attached node is a no-op.

use neo4rs::query;
use serde_json::Value;

use ribbon_core::constraint::quote_identifier;
use ribbon_core::store::{EdgeSpec, ID_COUNTER_LABEL};
use ribbon_core::{NodeId, PropertyMap};

use crate::client::{bind, to_bolt, GraphError, Neo4jTx};
use crate::queries::{edge_pattern, Statement};

/// `CREATE` for a node carrying `label` and `properties`.
pub fn create_node_statement(label: &str, properties: &PropertyMap) -> Statement {
    let mut params = Vec::with_capacity(properties.len());
    let assignments = properties
        .iter()
        .enumerate()
        .map(|(i, (name, value))| {
            let param = format!("p_{i}");
            let assignment = format!("{}: ${param}", quote_identifier(name));
            params.push((param, value.clone()));
            assignment
        })
        .collect::<Vec<_>>()
        .join(", ");
    Statement {
        cypher: format!("CREATE (n:{} {{{assignments}}})", quote_identifier(label)),
        params,
    }
}

/// `MERGE` of the edge between `from` and `to` described by `edge`.
pub fn add_edge_statement(edge: &EdgeSpec) -> String {
    format!(
        "MATCH (a), (b) WHERE a.id = $aid AND b.id = $bid MERGE {}",
        edge_pattern("a", &format!(":{}", quote_identifier(&edge.label)), "b", edge.direction)
    )
}

/// `DELETE` of the edges between `from` and `to` described by `edge`.
pub fn remove_edge_statement(edge: &EdgeSpec) -> String {
    format!(
        "MATCH {} WHERE a.id = $aid AND b.id = $bid DELETE r",
        edge_pattern("a", &format!("r:{}", quote_identifier(&edge.label)), "b", edge.direction)
    )
}

impl Neo4jTx {
    pub(crate) async fn increment_id_counter(&mut self) -> Result<NodeId, GraphError> {
        let cypher = format!(
            "MERGE (c:{}) ON CREATE SET c.count = 1 ON MATCH SET c.count = c.count + 1 \
             RETURN c.count AS generated_id",
            quote_identifier(ID_COUNTER_LABEL)
        );
        let row = self
            .first(query(&cypher))
            .await?
            .ok_or_else(|| GraphError::Serialization("Id counter returned no row".to_string()))?;
        let id: i64 = row
            .get("generated_id")
            .map_err(|e| GraphError::Serialization(format!("Failed to read generated id: {e}")))?;
        Ok(NodeId(id))
    }

    pub(crate) async fn create_labelled_node(
        &mut self,
        label: &str,
        properties: &PropertyMap,
    ) -> Result<(), GraphError> {
        let statement = create_node_statement(label, properties);
        self.run(statement.into_query()?).await
    }

    pub(crate) async fn write_property(&mut self, id: NodeId, name: &str, value: &Value) -> Result<(), GraphError> {
        let cypher = format!("MATCH (n) WHERE n.id = $id SET n.{} = $value", quote_identifier(name));
        let q = query(&cypher).param("id", id.0).param("value", to_bolt(value)?);
        self.run(q).await
    }

    pub(crate) async fn merge_edge(&mut self, from: NodeId, to: NodeId, edge: &EdgeSpec) -> Result<(), GraphError> {
        let q = bind(
            query(&add_edge_statement(edge)),
            &[("aid".to_string(), Value::from(from.0)), ("bid".to_string(), Value::from(to.0))],
        )?;
        self.run(q).await
    }

    pub(crate) async fn delete_edge(&mut self, from: NodeId, to: NodeId, edge: &EdgeSpec) -> Result<(), GraphError> {
        let q = query(&remove_edge_statement(edge))
            .param("aid", from.0)
            .param("bid", to.0);
        self.run(q).await
    }

    pub(crate) async fn detach_delete(&mut self, id: NodeId) -> Result<(), GraphError> {
        let q = query("MATCH (n) WHERE n.id = $id DETACH DELETE n").param("id", id.0);
        self.run(q).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ribbon_core::Direction;
    use serde_json::json;

    #[test]
    fn test_create_node_statement_binds_every_property() {
        let mut properties = PropertyMap::new();
        properties.insert("id".into(), json!(3));
        properties.insert("name".into(), json!("Ada"));
        let statement = create_node_statement("User", &properties);
        assert_eq!(statement.cypher, "CREATE (n:`User` {`id`: $p_0, `name`: $p_1})");
        assert_eq!(statement.params[1], ("p_1".to_string(), json!("Ada")));
    }

    #[test]
    fn test_edge_statements_follow_direction() {
        let mut edge = EdgeSpec {
            label: "AUTHORED".into(),
            direction: Direction::Outgoing,
            target: "Post".into(),
        };
        assert_eq!(
            add_edge_statement(&edge),
            "MATCH (a), (b) WHERE a.id = $aid AND b.id = $bid MERGE (a)-[:`AUTHORED`]->(b)"
        );
        edge.direction = Direction::Incoming;
        assert_eq!(
            remove_edge_statement(&edge),
            "MATCH (a)<-[r:`AUTHORED`]-(b) WHERE a.id = $aid AND b.id = $bid DELETE r"
        );
        edge.direction = Direction::Either;
        assert!(add_edge_statement(&edge).ends_with("MERGE (a)-[:`AUTHORED`]-(b)"));
    }
}
