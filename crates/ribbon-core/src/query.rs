//! Query trees: what to include, filter, order and page at each level of a
//! subgraph read.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: u64 = 100;
pub const DEFAULT_SKIP: u64 = 0;

/// Field name → nested query. `None` means "include with defaults".
pub type IncludeMap = BTreeMap<String, Option<QueryTree>>;

/// One level of a subgraph query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTree {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub filter: Option<ConstraintExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<IncludeMap>,
}

impl QueryTree {
    /// The filter/order/page part of this level, with defaults applied.
    pub fn node_query(&self, default_limit: u64, default_skip: u64) -> NodeQuery {
        NodeQuery {
            filter: self.filter.clone(),
            order_by: self.order_by.clone(),
            skip: self.skip.unwrap_or(default_skip),
            limit: Some(self.limit.unwrap_or(default_limit)),
        }
    }
}

/// Sort key and direction for a page of nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub key: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Comparison operator of a constraint triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "matches")]
    Matches,
}

impl Operator {
    /// Symbolic comparison operators in the DSL, `matches` excluded.
    pub const COMPARISONS: [Operator; 6] = [
        Operator::Ne,
        Operator::Le,
        Operator::Ge,
        Operator::Eq,
        Operator::Lt,
        Operator::Gt,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Matches => "matches",
        }
    }
}

/// A single `(attribute, operator, value)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub attribute: String,
    pub operator: Operator,
    pub value: String,
}

impl Constraint {
    pub fn new(attribute: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            value: value.into(),
        }
    }

    /// The value as the store should see it: integers stay integers,
    /// everything else is a string.
    pub fn typed_value(&self) -> serde_json::Value {
        match self.value.parse::<i64>() {
            Ok(n) => serde_json::Value::from(n),
            Err(_) => serde_json::Value::String(self.value.clone()),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator {
            Operator::Matches => write!(f, "{}.matches({})", self.attribute, self.value),
            op => write!(f, "{}{}{}", self.attribute, op.token(), self.value),
        }
    }
}

/// A disjunction of conjunctions of constraint triples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintExpr(pub Vec<Vec<Constraint>>);

impl ConstraintExpr {
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|conjunction| conjunction.is_empty())
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.0.iter().flatten().map(|c| c.attribute.as_str())
    }
}

impl fmt::Display for ConstraintExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, conjunction) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            for (j, constraint) in conjunction.iter().enumerate() {
                if j > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{constraint}")?;
            }
        }
        Ok(())
    }
}

/// Filter, order and page applied to a set of candidate nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeQuery {
    pub filter: Option<ConstraintExpr>,
    pub order_by: Option<OrderBy>,
    pub skip: u64,
    /// `None` returns every match.
    pub limit: Option<u64>,
}

impl NodeQuery {
    /// Every node, in store order.
    pub fn all() -> Self {
        Self::default()
    }
}

/// Render an include map back into the DSL.
///
/// Properties are emitted in a fixed order so the output is canonical.
pub fn format_include_list(include: &IncludeMap) -> String {
    include
        .iter()
        .map(|(field, nested)| match nested {
            Some(tree) => format!("{field}{tree}"),
            None => field.clone(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

impl fmt::Display for QueryTree {
    /// The property chain of a field, e.g. `.where(a=1).limit(2)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(filter) = &self.filter {
            write!(f, ".where({filter})")?;
        }
        if let Some(order) = &self.order_by {
            write!(f, ".order_by({},{})", order.key, order.direction.as_str())?;
        }
        if let Some(limit) = self.limit {
            write!(f, ".limit({limit})")?;
        }
        if let Some(skip) = self.skip {
            write!(f, ".skip({skip})")?;
        }
        if let Some(include) = &self.include {
            write!(f, ".include({})", format_include_list(include))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_value() {
        assert_eq!(Constraint::new("age", Operator::Ge, "21").typed_value(), json!(21));
        assert_eq!(
            Constraint::new("name", Operator::Eq, "Tyler").typed_value(),
            json!("Tyler")
        );
        assert_eq!(Constraint::new("v", Operator::Eq, "2.5").typed_value(), json!("2.5"));
    }

    #[test]
    fn test_node_query_defaults() {
        let q = QueryTree::default().node_query(DEFAULT_LIMIT, DEFAULT_SKIP);
        assert_eq!(q.limit, Some(100));
        assert_eq!(q.skip, 0);
        assert!(q.filter.is_none());
    }

    #[test]
    fn test_display_constraints() {
        let expr = ConstraintExpr(vec![
            vec![
                Constraint::new("age", Operator::Ge, "21"),
                Constraint::new("email", Operator::Matches, ".*@aol.com"),
            ],
            vec![Constraint::new("name", Operator::Ne, "Kyle")],
        ]);
        assert_eq!(expr.to_string(), "age>=21,email.matches(.*@aol.com)|name!=Kyle");
    }

    #[test]
    fn test_query_tree_serde_shape() {
        let tree = QueryTree {
            limit: Some(2),
            order_by: Some(OrderBy {
                key: "name".into(),
                direction: SortDirection::Desc,
            }),
            filter: Some(ConstraintExpr(vec![vec![Constraint::new(
                "name",
                Operator::Eq,
                "Tyler",
            )]])),
            ..Default::default()
        };
        let value = serde_json::to_value(&tree).unwrap();
        assert_eq!(
            value,
            json!({
                "limit": 2,
                "order_by": {"key": "name", "direction": "desc"},
                "where": [[{"attribute": "name", "operator": "=", "value": "Tyler"}]]
            })
        );
        let back: QueryTree = serde_json::from_value(value).unwrap();
        assert_eq!(back, tree);
    }
}
