//! In-process graph store for tests and embedding.
//!
//! A transaction reads and writes a private snapshot of the graph and records
//! every mutation it makes. Commit replays those mutations onto the current
//! shared graph, so transactions that overlap keep each other's writes; the
//! id counter lives only in the shared graph. Filter semantics follow Cypher:
//! comparisons with a missing property are false, `!=` between different types
//! is true, and `matches` is a full-string regular expression match.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::sync::Mutex;

use ribbon_core::query::{Constraint, ConstraintExpr, NodeQuery, Operator, SortDirection};
use ribbon_core::store::{EdgeSpec, GraphStore, GraphTx};
use ribbon_core::{Direction, NodeId, PropertyMap, StoreError};

#[derive(Debug, Clone, Default)]
struct MemoryNode {
    labels: Vec<String>,
    properties: PropertyMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MemoryEdge {
    from: i64,
    to: i64,
    label: String,
}

impl MemoryEdge {
    fn matches(&self, from: i64, to: i64, spec: &EdgeSpec) -> bool {
        if self.label != spec.label {
            return false;
        }
        match spec.direction {
            Direction::Outgoing => self.from == from && self.to == to,
            Direction::Incoming => self.from == to && self.to == from,
            Direction::Either => {
                (self.from == from && self.to == to) || (self.from == to && self.to == from)
            }
        }
    }
}

/// One recorded mutation of a transaction.
#[derive(Debug, Clone)]
enum Mutation {
    CreateNode { label: String, properties: PropertyMap },
    SetProperty { id: NodeId, name: String, value: Value },
    AddEdge { from: NodeId, to: NodeId, edge: EdgeSpec },
    RemoveEdge { from: NodeId, to: NodeId, edge: EdgeSpec },
    DeleteNode(NodeId),
}

#[derive(Debug, Clone, Default)]
struct MemoryGraph {
    nodes: BTreeMap<i64, MemoryNode>,
    edges: Vec<MemoryEdge>,
    id_counter: i64,
}

impl MemoryGraph {
    fn has_label(&self, id: i64, label: &str) -> bool {
        self.nodes
            .get(&id)
            .is_some_and(|n| n.labels.iter().any(|l| l == label))
    }

    fn apply(&mut self, mutation: &Mutation) -> Result<(), StoreError> {
        match mutation {
            Mutation::CreateNode { label, properties } => {
                let id = properties
                    .get("id")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| StoreError::InvalidQuery("New node has no integer id".to_string()))?;
                if self.nodes.contains_key(&id) {
                    return Err(StoreError::InvalidQuery(format!("Node id {id} already exists")));
                }
                self.nodes.insert(
                    id,
                    MemoryNode {
                        labels: vec![label.clone()],
                        properties: properties.clone(),
                    },
                );
            }
            Mutation::SetProperty { id, name, value } => {
                let node = self
                    .nodes
                    .get_mut(&id.0)
                    .ok_or_else(|| StoreError::UnexpectedResult(format!("No node with id {id}")))?;
                if value.is_null() {
                    node.properties.remove(name);
                } else {
                    node.properties.insert(name.clone(), value.clone());
                }
            }
            Mutation::AddEdge { from, to, edge } => {
                if !self.nodes.contains_key(&from.0) || !self.nodes.contains_key(&to.0) {
                    return Ok(());
                }
                if !self.edges.iter().any(|e| e.matches(from.0, to.0, edge)) {
                    let (from, to) = match edge.direction {
                        Direction::Incoming => (to.0, from.0),
                        Direction::Outgoing | Direction::Either => (from.0, to.0),
                    };
                    self.edges.push(MemoryEdge {
                        from,
                        to,
                        label: edge.label.clone(),
                    });
                }
            }
            Mutation::RemoveEdge { from, to, edge } => {
                self.edges.retain(|e| !e.matches(from.0, to.0, edge));
            }
            Mutation::DeleteNode(id) => {
                self.nodes.remove(&id.0);
                self.edges.retain(|e| e.from != id.0 && e.to != id.0);
            }
        }
        Ok(())
    }
}

/// Shared in-memory graph. Clone is cheap (inner Arc).
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    graph: Arc<Mutex<MemoryGraph>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed nodes.
    pub async fn node_count(&self) -> usize {
        self.graph.lock().await.nodes.len()
    }

    /// Number of committed edges.
    pub async fn edge_count(&self) -> usize {
        self.graph.lock().await.edges.len()
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn GraphTx>, StoreError> {
        let working = self.graph.lock().await.clone();
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.graph),
            working,
            mutations: Vec::new(),
        }))
    }
}

/// A transaction over a private snapshot of a [`MemoryStore`].
pub struct MemoryTx {
    shared: Arc<Mutex<MemoryGraph>>,
    working: MemoryGraph,
    mutations: Vec<Mutation>,
}

impl MemoryTx {
    fn record(&mut self, mutation: Mutation) -> Result<(), StoreError> {
        self.working.apply(&mutation)?;
        self.mutations.push(mutation);
        Ok(())
    }

    /// Filter, order and page `candidates`, which are in store order.
    fn select(&self, candidates: Vec<i64>, query: &NodeQuery) -> Result<Vec<NodeId>, StoreError> {
        let mut matched = Vec::with_capacity(candidates.len());
        for id in candidates {
            let Some(node) = self.working.nodes.get(&id) else {
                continue;
            };
            let keep = match &query.filter {
                Some(filter) => evaluate(filter, &node.properties)?,
                None => true,
            };
            if keep {
                matched.push((id, node));
            }
        }

        if let Some(order) = &query.order_by {
            matched.sort_by(|(_, a), (_, b)| {
                let ordering = compare_for_sort(
                    a.properties.get(&order.key).unwrap_or(&Value::Null),
                    b.properties.get(&order.key).unwrap_or(&Value::Null),
                );
                match order.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|(id, _)| NodeId(id))
            .collect())
    }
}

#[async_trait]
impl GraphTx for MemoryTx {
    async fn node_labels(&mut self, id: NodeId) -> Result<Option<Vec<String>>, StoreError> {
        Ok(self.working.nodes.get(&id.0).map(|n| n.labels.clone()))
    }

    async fn node_exists(&mut self, id: NodeId, label: &str) -> Result<bool, StoreError> {
        Ok(self.working.has_label(id.0, label))
    }

    async fn next_id(&mut self) -> Result<NodeId, StoreError> {
        let mut shared = self.shared.lock().await;
        shared.id_counter += 1;
        Ok(NodeId(shared.id_counter))
    }

    async fn create_node(&mut self, label: &str, properties: &PropertyMap) -> Result<(), StoreError> {
        self.record(Mutation::CreateNode {
            label: label.to_string(),
            properties: properties.clone(),
        })
    }

    async fn get_property(&mut self, id: NodeId, name: &str) -> Result<Value, StoreError> {
        Ok(self
            .working
            .nodes
            .get(&id.0)
            .and_then(|n| n.properties.get(name).cloned())
            .unwrap_or(Value::Null))
    }

    async fn set_property(&mut self, id: NodeId, name: &str, value: &Value) -> Result<(), StoreError> {
        self.record(Mutation::SetProperty {
            id,
            name: name.to_string(),
            value: value.clone(),
        })
    }

    async fn find_nodes(&mut self, label: &str, query: &NodeQuery) -> Result<Vec<NodeId>, StoreError> {
        let candidates = self
            .working
            .nodes
            .iter()
            .filter(|(_, n)| n.labels.iter().any(|l| l == label))
            .map(|(id, _)| *id)
            .collect();
        self.select(candidates, query)
    }

    async fn related_nodes(
        &mut self,
        id: NodeId,
        edge: &EdgeSpec,
        query: &NodeQuery,
    ) -> Result<Vec<NodeId>, StoreError> {
        let mut candidates = Vec::new();
        for e in self.working.edges.iter().filter(|e| e.label == edge.label) {
            let other = match edge.direction {
                Direction::Outgoing if e.from == id.0 => Some(e.to),
                Direction::Incoming if e.to == id.0 => Some(e.from),
                Direction::Either if e.from == id.0 => Some(e.to),
                Direction::Either if e.to == id.0 => Some(e.from),
                _ => None,
            };
            if let Some(other) = other.filter(|o| self.working.has_label(*o, &edge.target)) {
                candidates.push(other);
            }
        }
        self.select(candidates, query)
    }

    async fn add_edge(&mut self, from: NodeId, to: NodeId, edge: &EdgeSpec) -> Result<(), StoreError> {
        self.record(Mutation::AddEdge {
            from,
            to,
            edge: edge.clone(),
        })
    }

    async fn remove_edge(&mut self, from: NodeId, to: NodeId, edge: &EdgeSpec) -> Result<(), StoreError> {
        self.record(Mutation::RemoveEdge {
            from,
            to,
            edge: edge.clone(),
        })
    }

    async fn delete_node(&mut self, id: NodeId) -> Result<(), StoreError> {
        self.record(Mutation::DeleteNode(id))
    }

    /// Replays the recorded mutations onto a copy of the shared graph and
    /// publishes it only when every mutation applies.
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut shared = self.shared.lock().await;
        let mut next = shared.clone();
        for mutation in &self.mutations {
            next.apply(mutation)
                .map_err(|e| StoreError::Backend(format!("Commit conflict: {e}")))?;
        }
        *shared = next;
        tracing::debug!(mutations = self.mutations.len(), "Committed memory transaction");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

// ── Filter Evaluation ────────────────────────────────────────────

fn evaluate(expr: &ConstraintExpr, properties: &PropertyMap) -> Result<bool, StoreError> {
    let conjunctions: Vec<_> = expr.0.iter().filter(|c| !c.is_empty()).collect();
    if conjunctions.is_empty() {
        return Ok(true);
    }
    for conjunction in conjunctions {
        let mut all = true;
        for constraint in conjunction {
            if !holds(constraint, properties)? {
                all = false;
                break;
            }
        }
        if all {
            return Ok(true);
        }
    }
    Ok(false)
}

fn holds(constraint: &Constraint, properties: &PropertyMap) -> Result<bool, StoreError> {
    let Some(stored) = properties.get(&constraint.attribute).filter(|v| !v.is_null()) else {
        return Ok(false);
    };

    if constraint.operator == Operator::Matches {
        let pattern = format!("^(?:{})$", constraint.value);
        let regex = Regex::new(&pattern)
            .map_err(|e| StoreError::InvalidQuery(format!("Invalid pattern '{}': {e}", constraint.value)))?;
        return Ok(stored.as_str().is_some_and(|s| regex.is_match(s)));
    }

    let expected = constraint.typed_value();
    let ordering = compare_values(stored, &expected);
    Ok(match constraint.operator {
        Operator::Eq => ordering == Some(Ordering::Equal),
        Operator::Ne => ordering != Some(Ordering::Equal),
        Operator::Lt => ordering == Some(Ordering::Less),
        Operator::Gt => ordering == Some(Ordering::Greater),
        Operator::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        Operator::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        Operator::Matches => false,
    })
}

/// Ordering between two comparable values; `None` when the types differ.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order used by `order_by`: missing values sort last ascending.
fn compare_for_sort(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Bool(_) => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Array(_) | Value::Object(_) => 3,
            Value::Null => 4,
        }
    }
    compare_values(a, b).unwrap_or_else(|| rank(a).cmp(&rank(b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ribbon_core::parser::{parse_constraint_list, parse_order_by};
    use serde_json::json;

    fn props(value: Value) -> PropertyMap {
        value.as_object().cloned().unwrap()
    }

    fn friends() -> EdgeSpec {
        EdgeSpec {
            label: "FRIENDS".into(),
            direction: Direction::Either,
            target: "User".into(),
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for (name, age) in [("Tyler", 30), ("Kyle", 19), ("Ada", 36)] {
            let id = tx.next_id().await.unwrap();
            tx.create_node("User", &props(json!({"id": id.0, "name": name, "age": age})))
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();
        store
    }

    #[test]
    fn test_filter_semantics() {
        let node = props(json!({"name": "Tyler", "age": 30, "email": "t@aol.com"}));
        let check = |expr: &str| evaluate(&parse_constraint_list(expr).unwrap(), &node).unwrap();
        assert!(check("age>=21,name=Tyler"));
        assert!(check("age<21|name=Tyler"));
        assert!(!check("age<21|name=Kyle"));
        assert!(check("email.matches(.*@aol.com)"));
        assert!(!check("email.matches(aol)"));
        assert!(!check("missing=1"));
        assert!(!check("missing!=1"));
        assert!(check("name!=30"));
        assert!(!check("name>30"));
    }

    #[test]
    fn test_invalid_regex_is_reported() {
        let node = props(json!({"name": "x"}));
        let expr = parse_constraint_list("name.matches(()").unwrap();
        assert!(matches!(evaluate(&expr, &node), Err(StoreError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_ids_are_sequential_and_committed() {
        let store = seeded().await;
        assert_eq!(store.node_count().await, 3);
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_id().await.unwrap(), NodeId(4));
    }

    #[tokio::test]
    async fn test_overlapping_transactions_keep_both_writes() {
        let store = seeded().await;
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();

        let a = first.next_id().await.unwrap();
        let b = second.next_id().await.unwrap();
        assert_ne!(a, b);

        first.create_node("User", &props(json!({"id": a.0}))).await.unwrap();
        second.create_node("User", &props(json!({"id": b.0}))).await.unwrap();
        second.set_property(NodeId(1), "age", &json!(31)).await.unwrap();
        second.commit().await.unwrap();
        first.commit().await.unwrap();

        assert_eq!(store.node_count().await, 5);
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.get_property(NodeId(1), "age").await.unwrap(), json!(31));
        assert!(tx.node_exists(a, "User").await.unwrap());
        assert!(tx.node_exists(b, "User").await.unwrap());
    }

    #[tokio::test]
    async fn test_conflicting_commit_applies_nothing() {
        let store = seeded().await;
        let mut writer = store.begin().await.unwrap();
        let mut deleter = store.begin().await.unwrap();

        writer.add_edge(NodeId(1), NodeId(3), &friends()).await.unwrap();
        writer.set_property(NodeId(2), "age", &json!(20)).await.unwrap();
        deleter.delete_node(NodeId(2)).await.unwrap();
        deleter.commit().await.unwrap();

        assert!(matches!(writer.commit().await, Err(StoreError::Backend(_))));
        assert_eq!(store.node_count().await, 2);
        assert_eq!(store.edge_count().await, 0);
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let store = seeded().await;
        let mut tx = store.begin().await.unwrap();
        tx.delete_node(NodeId(1)).await.unwrap();
        assert_eq!(tx.node_labels(NodeId(1)).await.unwrap(), None);
        tx.rollback().await.unwrap();
        assert_eq!(store.node_count().await, 3);
    }

    #[tokio::test]
    async fn test_find_nodes_orders_and_pages() {
        let store = seeded().await;
        let mut tx = store.begin().await.unwrap();
        let query = NodeQuery {
            order_by: Some(parse_order_by("age,desc").unwrap()),
            skip: 1,
            limit: Some(1),
            ..NodeQuery::all()
        };
        assert_eq!(tx.find_nodes("User", &query).await.unwrap(), vec![NodeId(1)]);
    }

    #[tokio::test]
    async fn test_edges_are_merged_and_match_either_direction() {
        let store = seeded().await;
        let mut tx = store.begin().await.unwrap();
        tx.add_edge(NodeId(1), NodeId(2), &friends()).await.unwrap();
        tx.add_edge(NodeId(2), NodeId(1), &friends()).await.unwrap();
        tx.add_edge(NodeId(1), NodeId(3), &friends()).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.edge_count().await, 2);

        let mut tx = store.begin().await.unwrap();
        let all = NodeQuery::all();
        assert_eq!(
            tx.related_nodes(NodeId(1), &friends(), &all).await.unwrap(),
            vec![NodeId(2), NodeId(3)]
        );
        assert_eq!(tx.related_nodes(NodeId(2), &friends(), &all).await.unwrap(), vec![NodeId(1)]);

        tx.remove_edge(NodeId(2), NodeId(1), &friends()).await.unwrap();
        assert_eq!(
            tx.related_nodes(NodeId(1), &friends(), &all).await.unwrap(),
            vec![NodeId(3)]
        );
    }

    #[tokio::test]
    async fn test_directed_edges() {
        let store = seeded().await;
        let authored = EdgeSpec {
            label: "AUTHORED".into(),
            direction: Direction::Outgoing,
            target: "User".into(),
        };
        let mut tx = store.begin().await.unwrap();
        tx.add_edge(NodeId(1), NodeId(2), &authored).await.unwrap();
        let all = NodeQuery::all();
        assert_eq!(tx.related_nodes(NodeId(1), &authored, &all).await.unwrap(), vec![NodeId(2)]);
        assert!(tx.related_nodes(NodeId(2), &authored, &all).await.unwrap().is_empty());

        let authored_by = EdgeSpec {
            direction: Direction::Incoming,
            ..authored
        };
        assert_eq!(
            tx.related_nodes(NodeId(2), &authored_by, &all).await.unwrap(),
            vec![NodeId(1)]
        );
    }
}
