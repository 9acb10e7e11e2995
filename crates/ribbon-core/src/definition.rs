//! Serializable schema definitions.
//!
//! Lets a schema be declared in a TOML/JSON file instead of code. Only the
//! built-in permission kinds (`public`, `internal`, `creator`) can be named
//! here; custom predicates require the builder API.

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::permission::Permission;
use crate::schema::{
    Attribute, Cardinality, NodeModel, Relationship, SchemaRegistry, CREATED_AT, CREATED_BY,
    UPDATED_AT,
};
use crate::types::Direction;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub types: Vec<NodeTypeDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTypeDefinition {
    pub name: String,
    #[serde(default = "default_class_permission")]
    pub create: String,
    #[serde(default = "default_class_permission")]
    pub delete: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    #[serde(default = "default_field_permission")]
    pub read: String,
    #[serde(default = "default_field_permission")]
    pub write: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDefinition {
    pub name: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default = "default_field_permission")]
    pub read: String,
    #[serde(default = "default_field_permission")]
    pub add: String,
    #[serde(default = "default_field_permission")]
    pub remove: String,
}

fn default_class_permission() -> String {
    "public".to_string()
}

fn default_field_permission() -> String {
    "creator".to_string()
}

fn permission(name: &str) -> Result<Permission, SchemaError> {
    Permission::named(name).ok_or_else(|| SchemaError::UnknownPermission(name.to_string()))
}

impl SchemaDefinition {
    /// Build and validate a registry from this definition.
    pub fn into_registry(self) -> Result<SchemaRegistry, SchemaError> {
        let mut builder = SchemaRegistry::builder();
        for node_type in self.types {
            let mut model = NodeModel::builder(node_type.name)
                .allows_create(permission(&node_type.create)?)
                .allows_delete(permission(&node_type.delete)?);

            for attr in node_type.attributes {
                model = model.attribute(
                    Attribute::new(attr.name)
                        .readable(permission(&attr.read)?)
                        .writable(permission(&attr.write)?),
                );
            }

            for rel in node_type.relationships {
                let mut relationship = Relationship::new(rel.name, rel.target)
                    .direction(rel.direction)
                    .cardinality(rel.cardinality)
                    .readable(permission(&rel.read)?)
                    .addable(permission(&rel.add)?)
                    .removable(permission(&rel.remove)?);
                if let Some(label) = rel.label {
                    relationship = relationship.label(label);
                }
                model = model.relationship(relationship);
            }

            builder = builder.model(model);
        }
        builder.build()
    }
}

impl SchemaRegistry {
    /// Describe the registered schema. Custom predicates appear by name and
    /// system attributes are omitted.
    pub fn describe(&self) -> SchemaDefinition {
        let types = self
            .type_names()
            .into_iter()
            .filter_map(|name| self.model(name).ok())
            .map(|model| NodeTypeDefinition {
                name: model.name().to_string(),
                create: model.create_permission().name().to_string(),
                delete: model.delete_permission().name().to_string(),
                attributes: model
                    .attributes()
                    .values()
                    .filter(|a| ![CREATED_BY, CREATED_AT, UPDATED_AT].contains(&a.name()))
                    .map(|a| AttributeDefinition {
                        name: a.name().to_string(),
                        read: a.read_permission().name().to_string(),
                        write: a.write_permission().name().to_string(),
                    })
                    .collect(),
                relationships: model
                    .relationships()
                    .values()
                    .map(|r| RelationshipDefinition {
                        name: r.name().to_string(),
                        target: r.target().to_string(),
                        label: (r.rel_type() != r.name()).then(|| r.rel_type().to_string()),
                        direction: r.edge_direction(),
                        cardinality: r.edge_cardinality(),
                        read: r.read_permission().name().to_string(),
                        add: r.add_permission().name().to_string(),
                        remove: r.remove_permission().name().to_string(),
                    })
                    .collect(),
            })
            .collect();
        SchemaDefinition { types }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition() -> SchemaDefinition {
        serde_json::from_value(json!({
            "types": [
                {
                    "name": "User",
                    "attributes": [{"name": "name", "read": "public"}],
                    "relationships": [
                        {"name": "friends", "target": "User"},
                        {"name": "posts", "target": "Post", "label": "AUTHORED",
                         "direction": "outgoing", "read": "public"}
                    ]
                },
                {
                    "name": "Post",
                    "delete": "creator",
                    "attributes": [{"name": "body"}],
                    "relationships": [
                        {"name": "author", "target": "User", "label": "AUTHORED",
                         "direction": "incoming", "cardinality": "one"}
                    ]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_definition_builds_registry() {
        let schema = definition().into_registry().unwrap();
        let post = schema.model("Post").unwrap();
        assert_eq!(post.delete_permission().name(), "creator");
        assert_eq!(post.create_permission().name(), "public");
        assert!(post.relationship("author").unwrap().is_to_one());
        assert_eq!(
            schema.reverse_relationship("Post", "author").unwrap().name(),
            "posts"
        );
    }

    #[test]
    fn test_describe_round_trips_definition() {
        let schema = definition().into_registry().unwrap();
        let described = schema.describe();
        let rebuilt = described.clone().into_registry().unwrap();
        assert_eq!(rebuilt.describe(), described);

        let user = described.types.iter().find(|t| t.name == "User").unwrap();
        assert_eq!(user.attributes.len(), 1);
        assert_eq!(user.attributes[0].read, "public");
        assert_eq!(user.attributes[0].write, "creator");
    }

    #[test]
    fn test_unknown_permission_rejected() {
        let def: SchemaDefinition = serde_json::from_value(json!({
            "types": [{"name": "A", "create": "owner"}]
        }))
        .unwrap();
        assert_eq!(
            def.into_registry().unwrap_err(),
            SchemaError::UnknownPermission("owner".into())
        );
    }
}
