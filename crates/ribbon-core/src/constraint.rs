//! Translation of constraint expressions into Cypher filter fragments.
//!
//! Values never appear in the generated text: each one is bound as a
//! parameter. Attribute names are schema identifiers and are back-quoted.

use serde_json::Value;

use crate::query::{ConstraintExpr, Operator, OrderBy, SortDirection};

/// A boolean Cypher expression plus the parameters it references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CypherFilter {
    pub expression: String,
    pub params: Vec<(String, Value)>,
}

/// Back-quote a label, relationship type or property name.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// The Cypher operator for a constraint operator.
pub fn cypher_operator(operator: Operator) -> &'static str {
    match operator {
        Operator::Eq => "=",
        Operator::Ne => "<>",
        Operator::Lt => "<",
        Operator::Gt => ">",
        Operator::Le => "<=",
        Operator::Ge => ">=",
        Operator::Matches => "=~",
    }
}

/// Translate `expr` against the node bound to `node_identifier`.
///
/// Parameters are named `{param_prefix}_{n}` so several filters can share a
/// statement.
pub fn translate(expr: &ConstraintExpr, node_identifier: &str, param_prefix: &str) -> CypherFilter {
    let mut params = Vec::new();
    let disjuncts: Vec<Vec<String>> = expr
        .0
        .iter()
        .filter(|conjunction| !conjunction.is_empty())
        .map(|conjunction| {
            conjunction
                .iter()
                .map(|constraint| {
                    let param = format!("{param_prefix}_{}", params.len());
                    let term = format!(
                        "{node_identifier}.{} {} ${param}",
                        quote_identifier(&constraint.attribute),
                        cypher_operator(constraint.operator)
                    );
                    params.push((param, constraint.typed_value()));
                    term
                })
                .collect()
        })
        .collect();

    let grouped = disjuncts.len() > 1;
    let expression = disjuncts
        .into_iter()
        .map(|terms| {
            let joined = terms.join(" AND ");
            if grouped && terms.len() > 1 {
                format!("({joined})")
            } else {
                joined
            }
        })
        .collect::<Vec<_>>()
        .join(" OR ");

    CypherFilter { expression, params }
}

/// `ORDER BY` clause for `order` against `node_identifier`.
pub fn order_clause(order: &OrderBy, node_identifier: &str) -> String {
    let direction = match order.direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    format!(
        "ORDER BY {node_identifier}.{} {direction}",
        quote_identifier(&order.key)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_constraint_list;
    use serde_json::json;

    #[test]
    fn test_single_conjunction() {
        let expr = parse_constraint_list("age>=21,name=Tyler").unwrap();
        let filter = translate(&expr, "n", "w");
        assert_eq!(filter.expression, "n.`age` >= $w_0 AND n.`name` = $w_1");
        assert_eq!(
            filter.params,
            vec![("w_0".to_string(), json!(21)), ("w_1".to_string(), json!("Tyler"))]
        );
    }

    #[test]
    fn test_disjunction_groups_conjunctions() {
        let expr = parse_constraint_list("age>=21,name=Tyler|name!=Kyle").unwrap();
        let filter = translate(&expr, "v", "f");
        assert_eq!(
            filter.expression,
            "(v.`age` >= $f_0 AND v.`name` = $f_1) OR v.`name` <> $f_2"
        );
        assert_eq!(filter.params.len(), 3);
    }

    #[test]
    fn test_matches_maps_to_regex_operator() {
        let expr = parse_constraint_list("email.matches(.*@aol.com)").unwrap();
        let filter = translate(&expr, "v", "w");
        assert_eq!(filter.expression, "v.`email` =~ $w_0");
        assert_eq!(filter.params[0].1, json!(".*@aol.com"));
    }

    #[test]
    fn test_values_never_reach_query_text() {
        let expr = parse_constraint_list("name=x' OR 1=1 //").unwrap();
        let filter = translate(&expr, "n", "w");
        assert!(!filter.expression.contains("OR 1"));
        assert_eq!(filter.params[0].1, json!("x' OR 1=1 //"));
    }

    #[test]
    fn test_quote_identifier_escapes_backticks() {
        assert_eq!(quote_identifier("name"), "`name`");
        assert_eq!(quote_identifier("a`b"), "`a``b`");
    }

    #[test]
    fn test_order_clause() {
        let order = OrderBy {
            key: "name".into(),
            direction: SortDirection::Desc,
        };
        assert_eq!(order_clause(&order, "v"), "ORDER BY v.`name` DESC");
    }
}
