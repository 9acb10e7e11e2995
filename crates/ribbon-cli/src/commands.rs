//! Command implementations behind the `ribbon` binary.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use ribbon_core::parser::parse_include_list;
use ribbon_core::{Actor, NodeId, QueryTree};
use ribbon_graph::{GraphApi, WriteKind, WriteRequest};

use crate::config::load_schema;
use crate::error::{CliError, Result};

/// DSL arguments of a query, keyed like the query-string parameters.
#[derive(Debug, Clone, Default)]
pub struct QueryArgs {
    pub include: Option<String>,
    pub filter: Option<String>,
    pub order_by: Option<String>,
    pub skip: Option<String>,
    pub limit: Option<String>,
}

impl QueryArgs {
    pub fn to_tree(&self) -> Result<QueryTree> {
        let params: HashMap<String, String> = [
            ("include", &self.include),
            ("where", &self.filter),
            ("order_by", &self.order_by),
            ("skip", &self.skip),
            ("limit", &self.limit),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.clone().map(|v| (key.to_string(), v)))
        .collect();
        Ok(QueryTree::from_params(&params)?)
    }
}

/// The actor named on the command line.
pub fn resolve_actor(actor: Option<i64>, trusted: bool) -> Result<Actor> {
    match (actor, trusted) {
        (Some(_), true) => Err(CliError::InvalidArgument(
            "--actor and --trusted are mutually exclusive".to_string(),
        )),
        (Some(id), false) => Ok(Actor::User(id)),
        (None, true) => Ok(Actor::Trusted),
        (None, false) => Err(CliError::InvalidArgument(
            "Specify --actor <ID> or --trusted".to_string(),
        )),
    }
}

/// The normalised form of a schema definition file.
pub fn describe_schema(path: &Path) -> Result<Value> {
    let schema = load_schema(path)?;
    Ok(serde_json::to_value(schema.describe())?)
}

pub async fn fetch(
    api: &GraphApi,
    actor: Actor,
    node_id: i64,
    node_type: Option<&str>,
    include: Option<&str>,
) -> Result<Value> {
    let include = match include {
        Some(dsl) => parse_include_list(dsl)?,
        None => Default::default(),
    };
    Ok(api.fetch(actor, &include, NodeId(node_id), node_type).await?)
}

pub async fn query(api: &GraphApi, actor: Actor, node_type: &str, args: &QueryArgs) -> Result<Value> {
    let tree = args.to_tree()?;
    Ok(Value::Array(api.query(actor, node_type, &tree).await?))
}

pub async fn apply(
    api: &GraphApi,
    actor: Actor,
    kind: &str,
    payload: &str,
    node_id: Option<i64>,
    node_type: Option<String>,
) -> Result<Value> {
    let request = WriteRequest {
        kind: kind.parse::<WriteKind>()?,
        payload: serde_json::from_str(payload)?,
        node_id: node_id.map(NodeId),
        node_type,
    };
    let outcome = api.apply(actor, &request).await?;
    Ok(outcome.result)
}
