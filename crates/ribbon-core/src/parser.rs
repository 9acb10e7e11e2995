//! Parser for the nested query-string mini-language.
//!
//! ```text
//! include-list := field ("," field)*
//! field        := name ("." property)*
//! property     := prop-name "(" value ")"
//! ```
//!
//! Recognised properties are `limit(int)`, `skip(int)`, `where(constraints)`,
//! `order_by(key[,asc|desc])` and `include(include-list)`, e.g.
//!
//! ```
//! # use ribbon_core::parser::parse_include_list;
//! let include = parse_include_list(
//!     "friends.where(name=Tyler,email.matches(.*@aol.com)|name=Kyle).limit(2).skip(3)\
//!      .include(updateEvents,friends.include(friends,updateEvents))",
//! )
//! .unwrap();
//! let friends = include["friends"].as_ref().unwrap();
//! assert_eq!(friends.limit, Some(2));
//! assert_eq!(friends.include.as_ref().unwrap().len(), 2);
//! ```

use std::collections::HashMap;

use crate::error::ParseError;
use crate::query::{
    Constraint, ConstraintExpr, IncludeMap, Operator, OrderBy, QueryTree, SortDirection,
    DEFAULT_LIMIT,
};

const OPEN: char = '(';
const CLOSE: char = ')';
const MATCHES_TOKEN: &str = ".matches(";

/// Split `input` on `delimiter`, ignoring delimiters nested inside
/// `open`/`close` pairs.
///
/// `"a(b,c),d"` split on `,` yields `["a(b,c)", "d"]`.
pub fn split_outside_pair(
    input: &str,
    delimiter: char,
    open: char,
    close: char,
) -> Result<Vec<&str>, ParseError> {
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut parts = Vec::new();

    for (i, c) in input.char_indices() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.checked_sub(1).ok_or(ParseError::UnmatchedClose(close))?;
        } else if c == delimiter && depth == 0 {
            parts.push(&input[start..i]);
            start = i + c.len_utf8();
        }
    }
    if depth > 0 {
        return Err(ParseError::UnmatchedOpen(open));
    }
    parts.push(&input[start..]);
    Ok(parts)
}

fn split_parens(input: &str, delimiter: char) -> Result<Vec<&str>, ParseError> {
    split_outside_pair(input, delimiter, OPEN, CLOSE)
}

/// Parse a comma-separated list of fields with optional property chains.
pub fn parse_include_list(input: &str) -> Result<IncludeMap, ParseError> {
    let mut fields = IncludeMap::new();
    for field in split_parens(input, ',')? {
        let mut chain = split_parens(field, '.')?.into_iter();
        let name = chain.next().unwrap_or_default();
        if name.is_empty() {
            return Err(ParseError::EmptyField(input.to_string()));
        }

        let properties: Vec<&str> = chain.collect();
        if properties.is_empty() {
            fields.insert(name.to_string(), None);
            continue;
        }

        let mut tree = QueryTree::default();
        let mut seen = Vec::with_capacity(properties.len());
        for property in properties {
            let (prop_name, value) = split_property(property)?;
            if seen.contains(&prop_name) {
                return Err(ParseError::DuplicateProperty(prop_name.to_string()));
            }
            seen.push(prop_name);
            apply_property(&mut tree, prop_name, value)?;
        }
        fields.insert(name.to_string(), Some(tree));
    }
    Ok(fields)
}

/// Split `name(value)` into its name and non-empty value.
fn split_property(property: &str) -> Result<(&str, &str), ParseError> {
    let malformed = || ParseError::MissingValue(property.to_string());
    let (name, rest) = property.split_once(OPEN).ok_or_else(malformed)?;
    let value = rest.strip_suffix(CLOSE).ok_or_else(malformed)?;
    if value.is_empty() {
        return Err(malformed());
    }
    Ok((name, value))
}

fn apply_property(tree: &mut QueryTree, name: &str, value: &str) -> Result<(), ParseError> {
    match name {
        "limit" => tree.limit = Some(parse_integer(name, value)?),
        "skip" => tree.skip = Some(parse_integer(name, value)?),
        "where" => tree.filter = Some(parse_constraint_list(value)?),
        "order_by" => tree.order_by = Some(parse_order_by(value)?),
        "include" => tree.include = Some(parse_include_list(value)?),
        other => return Err(ParseError::UnrecognizedProperty(other.to_string())),
    }
    Ok(())
}

/// A non-negative integer that fits the store's signed 64-bit integers.
fn parse_integer(property: &str, value: &str) -> Result<u64, ParseError> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| ParseError::NotAnInteger {
            property: property.to_string(),
            value: value.to_string(),
        })
}

/// Parse `key` or `key,asc|desc`.
pub fn parse_order_by(input: &str) -> Result<OrderBy, ParseError> {
    let params = split_parens(input, ',')?;
    let key = params.first().copied().unwrap_or_default();
    if key.is_empty() {
        return Err(ParseError::MissingOrderKey);
    }

    let direction = match params.get(1).copied() {
        None | Some("asc") => SortDirection::Asc,
        Some("desc") => SortDirection::Desc,
        Some(other) => return Err(ParseError::InvalidDirection(other.to_string())),
    };
    if params.len() > 2 {
        return Err(ParseError::Malformed(input.to_string()));
    }

    Ok(OrderBy {
        key: key.to_string(),
        direction,
    })
}

/// Parse `a=1,b>=2|c.matches(x)`: `|` separates disjuncts, `,` conjuncts.
pub fn parse_constraint_list(input: &str) -> Result<ConstraintExpr, ParseError> {
    let mut disjunction = Vec::new();
    for or_clause in split_parens(input, '|')? {
        let mut conjunction = Vec::new();
        for expression in split_parens(or_clause, ',')? {
            conjunction.push(parse_constraint(expression)?);
        }
        disjunction.push(conjunction);
    }
    Ok(ConstraintExpr(disjunction))
}

/// Parse one triple. Among the operator tokens present, the longest wins so
/// `age>=21` resolves to `>=` rather than the `=` it contains.
pub fn parse_constraint(expression: &str) -> Result<Constraint, ParseError> {
    if let Some((attribute, rest)) = expression.split_once(MATCHES_TOKEN) {
        let pattern = rest
            .strip_suffix(CLOSE)
            .ok_or_else(|| ParseError::Malformed(expression.to_string()))?;
        if attribute.is_empty() {
            return Err(ParseError::Malformed(expression.to_string()));
        }
        return Ok(Constraint::new(attribute, Operator::Matches, pattern));
    }

    let operator = Operator::COMPARISONS
        .iter()
        .filter_map(|op| expression.find(op.token()).map(|pos| (*op, pos)))
        .max_by(|(a, a_pos), (b, b_pos)| {
            a.token()
                .len()
                .cmp(&b.token().len())
                .then_with(|| b_pos.cmp(a_pos))
        })
        .map(|(op, _)| op)
        .ok_or_else(|| ParseError::MissingOperator(expression.to_string()))?;

    let (attribute, value) = expression
        .split_once(operator.token())
        .ok_or_else(|| ParseError::MissingOperator(expression.to_string()))?;
    if attribute.is_empty() {
        return Err(ParseError::Malformed(expression.to_string()));
    }
    Ok(Constraint::new(attribute, operator, value))
}

impl QueryTree {
    /// Build a top-level query from request parameters (`include`, `where`,
    /// `skip`, `order_by`, `limit`). `limit` defaults to 100.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, ParseError> {
        let present = |key: &str| params.get(key).map(String::as_str).filter(|v| !v.is_empty());

        let mut tree = QueryTree {
            limit: Some(DEFAULT_LIMIT),
            ..Default::default()
        };
        if let Some(include) = present("include") {
            tree.include = Some(parse_include_list(include)?);
        }
        if let Some(filter) = present("where") {
            tree.filter = Some(parse_constraint_list(filter)?);
        }
        if let Some(order_by) = present("order_by") {
            tree.order_by = Some(parse_order_by(order_by)?);
        }
        if let Some(skip) = present("skip") {
            tree.skip = Some(parse_integer("skip", skip)?);
        }
        if let Some(limit) = present("limit") {
            tree.limit = Some(parse_integer("limit", limit)?);
        }
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::format_include_list;

    #[test]
    fn test_split_respects_nesting() {
        assert_eq!(
            split_outside_pair("a(b,c),d", ',', '(', ')').unwrap(),
            vec!["a(b,c)", "d"]
        );
        assert_eq!(
            split_outside_pair("x.where(a.matches(b)).limit(1)", '.', '(', ')').unwrap(),
            vec!["x", "where(a.matches(b))", "limit(1)"]
        );
        assert_eq!(split_outside_pair("", ',', '(', ')').unwrap(), vec![""]);
    }

    #[test]
    fn test_split_unmatched() {
        assert_eq!(
            split_outside_pair("a(b,c", ',', '(', ')'),
            Err(ParseError::UnmatchedOpen('('))
        );
        assert_eq!(
            split_outside_pair("a)b(", ',', '(', ')'),
            Err(ParseError::UnmatchedClose(')'))
        );
    }

    #[test]
    fn test_constraint_list() {
        let expr = parse_constraint_list("age>=21,name=Tyler|name=Kyle").unwrap();
        assert_eq!(
            expr,
            ConstraintExpr(vec![
                vec![
                    Constraint::new("age", Operator::Ge, "21"),
                    Constraint::new("name", Operator::Eq, "Tyler"),
                ],
                vec![Constraint::new("name", Operator::Eq, "Kyle")],
            ])
        );
    }

    #[test]
    fn test_longest_operator_wins() {
        assert_eq!(parse_constraint("age>=21").unwrap().operator, Operator::Ge);
        assert_eq!(parse_constraint("age<=21").unwrap().operator, Operator::Le);
        let ne = parse_constraint("name!=Kyle").unwrap();
        assert_eq!((ne.attribute.as_str(), ne.operator, ne.value.as_str()), ("name", Operator::Ne, "Kyle"));
        assert_eq!(parse_constraint("age<3").unwrap().operator, Operator::Lt);
    }

    #[test]
    fn test_matches_constraint() {
        let c = parse_constraint("email.matches(.*@aol.com)").unwrap();
        assert_eq!(c, Constraint::new("email", Operator::Matches, ".*@aol.com"));
        // Attribute names that merely contain the word are plain comparisons.
        let c = parse_constraint("matchesPlayed>3").unwrap();
        assert_eq!(c, Constraint::new("matchesPlayed", Operator::Gt, "3"));
    }

    #[test]
    fn test_constraint_without_operator() {
        assert_eq!(
            parse_constraint("name"),
            Err(ParseError::MissingOperator("name".into()))
        );
        assert!(matches!(parse_constraint("=3"), Err(ParseError::Malformed(_))));
    }

    #[test]
    fn test_include_list_nested() {
        let include = parse_include_list(
            "friendRequests,friends.where(name=Tyler,email.matches(.*@aol.com)|name=Kyle)\
             .limit(2).skip(3).include(updateEvents,friends.include(friends,updateEvents)),updateEvents",
        )
        .unwrap();

        assert_eq!(include.len(), 3);
        assert_eq!(include["friendRequests"], None);
        assert_eq!(include["updateEvents"], None);

        let friends = include["friends"].as_ref().unwrap();
        assert_eq!(friends.limit, Some(2));
        assert_eq!(friends.skip, Some(3));
        let filter = friends.filter.as_ref().unwrap();
        assert_eq!(filter.0.len(), 2);
        assert_eq!(filter.0[0][1].operator, Operator::Matches);

        let nested = friends.include.as_ref().unwrap();
        let inner = nested["friends"].as_ref().unwrap();
        let inner_include = inner.include.as_ref().unwrap();
        assert!(inner_include.contains_key("friends"));
        assert!(inner_include.contains_key("updateEvents"));
    }

    #[test]
    fn test_property_errors() {
        assert_eq!(
            parse_include_list("friends.colour(red)"),
            Err(ParseError::UnrecognizedProperty("colour".into()))
        );
        assert_eq!(
            parse_include_list("friends.limit(ten)"),
            Err(ParseError::NotAnInteger {
                property: "limit".into(),
                value: "ten".into()
            })
        );
        assert!(matches!(
            parse_include_list("friends.limit(-1)"),
            Err(ParseError::NotAnInteger { .. })
        ));
        assert!(matches!(
            parse_include_list("friends.skip(9223372036854775808)"),
            Err(ParseError::NotAnInteger { .. })
        ));
        assert_eq!(
            parse_include_list("friends.skip(9223372036854775807)").unwrap()["friends"]
                .as_ref()
                .unwrap()
                .skip,
            Some(i64::MAX as u64)
        );
        assert_eq!(
            parse_include_list("friends.limit()"),
            Err(ParseError::MissingValue("limit()".into()))
        );
        assert_eq!(
            parse_include_list("friends.limit(1).limit(2)"),
            Err(ParseError::DuplicateProperty("limit".into()))
        );
        assert!(matches!(
            parse_include_list("a,,b"),
            Err(ParseError::EmptyField(_))
        ));
        assert_eq!(
            parse_include_list("friends.include(a,b"),
            Err(ParseError::UnmatchedOpen('('))
        );
    }

    #[test]
    fn test_order_by() {
        assert_eq!(
            parse_order_by("name").unwrap(),
            OrderBy {
                key: "name".into(),
                direction: SortDirection::Asc
            }
        );
        assert_eq!(parse_order_by("age,desc").unwrap().direction, SortDirection::Desc);
        assert_eq!(
            parse_order_by("age,sideways"),
            Err(ParseError::InvalidDirection("sideways".into()))
        );
        assert_eq!(parse_order_by(",asc"), Err(ParseError::MissingOrderKey));
        assert!(matches!(
            parse_order_by("a,asc,b"),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn test_from_params() {
        let params: HashMap<String, String> = [
            ("include", "friends.limit(2)"),
            ("where", "age>21"),
            ("order_by", "name,desc"),
            ("skip", "4"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let tree = QueryTree::from_params(&params).unwrap();
        assert_eq!(tree.limit, Some(100));
        assert_eq!(tree.skip, Some(4));
        assert_eq!(
            tree.order_by,
            Some(OrderBy {
                key: "name".into(),
                direction: SortDirection::Desc
            })
        );
        assert_eq!(tree.filter.unwrap().0[0][0].operator, Operator::Gt);
        assert!(tree.include.unwrap().contains_key("friends"));
    }

    #[test]
    fn test_from_params_rejects_bad_limit() {
        let mut params = HashMap::new();
        params.insert("limit".to_string(), "lots".to_string());
        assert!(matches!(
            QueryTree::from_params(&params),
            Err(ParseError::NotAnInteger { .. })
        ));
    }

    #[test]
    fn test_canonical_rendering_is_stable() {
        let inputs = [
            "friends.skip(3).limit(2).where(name=Tyler,email.matches(.*@aol.com)|name=Kyle)\
             .include(updateEvents,friends.include(friends,updateEvents))",
            "a,b.order_by(age),c.order_by(age,desc).limit(7)",
            "owner",
        ];
        for input in inputs {
            let parsed = parse_include_list(input).unwrap();
            let rendered = format_include_list(&parsed);
            let reparsed = parse_include_list(&rendered).unwrap();
            assert_eq!(parsed, reparsed, "{input}");
            assert_eq!(format_include_list(&reparsed), rendered);
        }
    }
}
