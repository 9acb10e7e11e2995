//! Declarative schema: node types, their attributes and relationships.
//!
//! Descriptors are built once through [`SchemaBuilder`] and are immutable
//! afterwards; the registry is shared read-only by every request.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::change::ChangeListener;
use crate::error::{ApiError, Result, SchemaError};
use crate::permission::Permission;
use crate::store::EdgeSpec;
use crate::types::{is_identifier, Direction};

pub const CREATED_BY: &str = "created_by";
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const ID: &str = "id";

const RESERVED: [&str; 4] = [ID, CREATED_BY, CREATED_AT, UPDATED_AT];

/// Validation hook run against a new attribute value before commit.
pub type ValueValidator = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

// ── Attributes ───────────────────────────────────────────────────

/// A scalar field of a node type.
#[derive(Clone)]
pub struct Attribute {
    name: String,
    read: Permission,
    write: Permission,
    validator: Option<ValueValidator>,
    listener: Option<Arc<dyn ChangeListener>>,
}

impl Attribute {
    /// A new attribute readable and writable by the node's creator.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            read: Permission::Creator,
            write: Permission::Creator,
            validator: None,
            listener: None,
        }
    }

    pub fn readable(mut self, permission: Permission) -> Self {
        self.read = permission;
        self
    }

    pub fn writable(mut self, permission: Permission) -> Self {
        self.write = permission;
        self
    }

    pub fn validator(
        mut self,
        validator: impl Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ChangeListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read_permission(&self) -> &Permission {
        &self.read
    }

    pub fn write_permission(&self) -> &Permission {
        &self.write
    }

    pub fn change_listener(&self) -> Option<&Arc<dyn ChangeListener>> {
        self.listener.as_ref()
    }

    /// Run the validation hook, failing with `InvalidValue`.
    pub fn validate(&self, value: &Value) -> Result<()> {
        match &self.validator {
            Some(validate) => validate(value)
                .map_err(|reason| ApiError::InvalidValue(format!("{}: {reason}", self.name))),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("read", &self.read)
            .field("write", &self.write)
            .finish_non_exhaustive()
    }
}

// ── Relationships ────────────────────────────────────────────────

/// Cardinality bound of a relationship.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    #[default]
    Many,
}

/// A typed edge kind from one node type to another.
#[derive(Clone)]
pub struct Relationship {
    name: String,
    target: String,
    label: Option<String>,
    direction: Direction,
    cardinality: Cardinality,
    read: Permission,
    add_edge: Permission,
    remove_edge: Permission,
    listener: Option<Arc<dyn ChangeListener>>,
}

impl Relationship {
    /// A to-many relationship named `name` pointing at `target` nodes.
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            label: None,
            direction: Direction::Either,
            cardinality: Cardinality::Many,
            read: Permission::Creator,
            add_edge: Permission::Creator,
            remove_edge: Permission::Creator,
            listener: None,
        }
    }

    pub fn to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target).cardinality(Cardinality::One)
    }

    pub fn to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target)
    }

    /// Relation label in the store; defaults to the field name.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn readable(mut self, permission: Permission) -> Self {
        self.read = permission;
        self
    }

    pub fn addable(mut self, permission: Permission) -> Self {
        self.add_edge = permission;
        self
    }

    pub fn removable(mut self, permission: Permission) -> Self {
        self.remove_edge = permission;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ChangeListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn rel_type(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    pub fn edge_direction(&self) -> Direction {
        self.direction
    }

    pub fn edge_cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn is_to_one(&self) -> bool {
        self.cardinality == Cardinality::One
    }

    pub fn read_permission(&self) -> &Permission {
        &self.read
    }

    pub fn add_permission(&self) -> &Permission {
        &self.add_edge
    }

    pub fn remove_permission(&self) -> &Permission {
        &self.remove_edge
    }

    pub fn change_listener(&self) -> Option<&Arc<dyn ChangeListener>> {
        self.listener.as_ref()
    }

    pub fn edge_spec(&self) -> EdgeSpec {
        EdgeSpec {
            label: self.rel_type().to_string(),
            direction: self.direction,
            target: self.target.clone(),
        }
    }

    /// Whether `other` on the target type describes the same edges from the
    /// other end.
    fn mirrors(&self, other: &Relationship) -> bool {
        other.rel_type() == self.rel_type()
            && (self.direction == Direction::Either || other.direction != self.direction)
    }
}

impl fmt::Debug for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relationship")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("rel_type", &self.rel_type())
            .field("direction", &self.direction)
            .field("cardinality", &self.cardinality)
            .finish_non_exhaustive()
    }
}

// ── Node Models ──────────────────────────────────────────────────

/// Descriptor of one registered node type.
#[derive(Debug)]
pub struct NodeModel {
    name: String,
    attributes: BTreeMap<String, Arc<Attribute>>,
    relationships: BTreeMap<String, Arc<Relationship>>,
    allows_create: Permission,
    allows_delete: Permission,
}

/// A field of a node type, resolved by name.
#[derive(Debug, Clone, Copy)]
pub enum Field<'a> {
    Attribute(&'a Arc<Attribute>),
    Relationship(&'a Arc<Relationship>),
}

impl NodeModel {
    pub fn builder(name: impl Into<String>) -> NodeModelBuilder {
        NodeModelBuilder {
            name: name.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
            allows_create: Permission::Public,
            allows_delete: Permission::Public,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &BTreeMap<String, Arc<Attribute>> {
        &self.attributes
    }

    pub fn relationships(&self) -> &BTreeMap<String, Arc<Relationship>> {
        &self.relationships
    }

    pub fn attribute(&self, name: &str) -> Option<&Arc<Attribute>> {
        self.attributes.get(name)
    }

    pub fn relationship(&self, name: &str) -> Option<&Arc<Relationship>> {
        self.relationships.get(name)
    }

    pub fn field(&self, name: &str) -> Option<Field<'_>> {
        if let Some(attribute) = self.attributes.get(name) {
            return Some(Field::Attribute(attribute));
        }
        self.relationships.get(name).map(Field::Relationship)
    }

    /// Class-level rule checked for every node of this type created.
    pub fn create_permission(&self) -> &Permission {
        &self.allows_create
    }

    /// Class-level rule checked for every node of this type deleted.
    pub fn delete_permission(&self) -> &Permission {
        &self.allows_delete
    }
}

/// Collects the fields of one node type before registration.
pub struct NodeModelBuilder {
    name: String,
    attributes: Vec<Attribute>,
    relationships: Vec<Relationship>,
    allows_create: Permission,
    allows_delete: Permission,
}

impl NodeModelBuilder {
    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn allows_create(mut self, permission: Permission) -> Self {
        self.allows_create = permission;
        self
    }

    pub fn allows_delete(mut self, permission: Permission) -> Self {
        self.allows_delete = permission;
        self
    }

    fn build(self) -> std::result::Result<NodeModel, SchemaError> {
        if !is_identifier(&self.name) {
            return Err(SchemaError::InvalidIdentifier(self.name));
        }

        let mut attributes = BTreeMap::new();
        for reserved in system_attributes() {
            attributes.insert(reserved.name.clone(), Arc::new(reserved));
        }

        let mut relationships = BTreeMap::new();
        let names = self
            .attributes
            .iter()
            .map(|a| a.name.as_str())
            .chain(self.relationships.iter().map(|r| r.name.as_str()));
        let mut seen = Vec::new();
        for name in names {
            if !is_identifier(name) {
                return Err(SchemaError::InvalidIdentifier(name.to_string()));
            }
            if RESERVED.contains(&name) {
                return Err(SchemaError::ReservedField {
                    node_type: self.name.clone(),
                    field: name.to_string(),
                });
            }
            if seen.contains(&name) {
                return Err(SchemaError::DuplicateField {
                    node_type: self.name.clone(),
                    field: name.to_string(),
                });
            }
            seen.push(name);
        }

        for relationship in &self.relationships {
            if !is_identifier(relationship.rel_type()) {
                return Err(SchemaError::InvalidIdentifier(
                    relationship.rel_type().to_string(),
                ));
            }
        }

        for attribute in self.attributes {
            attributes.insert(attribute.name.clone(), Arc::new(attribute));
        }
        for relationship in self.relationships {
            relationships.insert(relationship.name.clone(), Arc::new(relationship));
        }

        Ok(NodeModel {
            name: self.name,
            attributes,
            relationships,
            allows_create: self.allows_create,
            allows_delete: self.allows_delete,
        })
    }
}

/// Attributes every node type carries and the API maintains itself.
fn system_attributes() -> [Attribute; 3] {
    [
        Attribute::new(CREATED_BY)
            .readable(Permission::Internal)
            .writable(Permission::Internal),
        Attribute::new(CREATED_AT).writable(Permission::Internal),
        Attribute::new(UPDATED_AT).writable(Permission::Internal),
    ]
}

// ── Registry ─────────────────────────────────────────────────────

/// Type name → node model, plus the precomputed reverse-relationship map.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    models: HashMap<String, Arc<NodeModel>>,
    reverse: HashMap<(String, String), Arc<Relationship>>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder { models: Vec::new() }
    }

    /// Resolve a node type. Unregistered names fail with `NodeTypeNotFound`,
    /// so labels outside the schema never reach the store.
    pub fn model(&self, node_type: &str) -> Result<&Arc<NodeModel>> {
        self.models
            .get(node_type)
            .ok_or_else(|| ApiError::NodeTypeNotFound(node_type.to_string()))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.models.contains_key(node_type)
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The relationship on the target type that sees the same edges from
    /// the other end, if any.
    pub fn reverse_relationship(
        &self,
        node_type: &str,
        relationship: &str,
    ) -> Option<&Arc<Relationship>> {
        self.reverse
            .get(&(node_type.to_string(), relationship.to_string()))
    }
}

/// Registers node types and validates the whole schema at once.
pub struct SchemaBuilder {
    models: Vec<NodeModelBuilder>,
}

impl SchemaBuilder {
    pub fn model(mut self, model: NodeModelBuilder) -> Self {
        self.models.push(model);
        self
    }

    pub fn build(self) -> std::result::Result<SchemaRegistry, SchemaError> {
        let mut models = HashMap::new();
        for builder in self.models {
            let model = builder.build()?;
            if models.contains_key(&model.name) {
                return Err(SchemaError::DuplicateType(model.name));
            }
            models.insert(model.name.clone(), Arc::new(model));
        }

        let mut reverse = HashMap::new();
        for model in models.values() {
            for relationship in model.relationships.values() {
                let target = models.get(relationship.target()).ok_or_else(|| {
                    SchemaError::UnknownTarget {
                        node_type: model.name.clone(),
                        relationship: relationship.name.clone(),
                        target: relationship.target.clone(),
                    }
                })?;
                if let Some(mirror) = target
                    .relationships
                    .values()
                    .find(|candidate| relationship.mirrors(candidate))
                {
                    reverse.insert(
                        (model.name.clone(), relationship.name.clone()),
                        Arc::clone(mirror),
                    );
                }
            }
        }

        tracing::debug!(
            types = models.len(),
            reverse_links = reverse.len(),
            "Schema registry built"
        );
        Ok(SchemaRegistry { models, reverse })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn social_schema() -> SchemaRegistry {
        SchemaRegistry::builder()
            .model(
                NodeModel::builder("User")
                    .attribute(Attribute::new("name").readable(Permission::Public))
                    .relationship(Relationship::to_many("friends", "User"))
                    .relationship(
                        Relationship::to_many("posts", "Post")
                            .label("AUTHORED")
                            .direction(Direction::Outgoing),
                    ),
            )
            .model(
                NodeModel::builder("Post")
                    .attribute(Attribute::new("body"))
                    .relationship(
                        Relationship::to_one("author", "User")
                            .label("AUTHORED")
                            .direction(Direction::Incoming),
                    ),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_lookup_and_system_attributes() {
        let schema = social_schema();
        let user = schema.model("User").unwrap();
        assert!(user.attribute(CREATED_BY).is_some());
        assert!(user.attribute(CREATED_AT).is_some());
        assert!(user.attribute(UPDATED_AT).is_some());
        assert_eq!(user.attribute(CREATED_BY).unwrap().read_permission().name(), "internal");
        assert!(matches!(user.field("friends"), Some(Field::Relationship(_))));
        assert!(matches!(user.field("name"), Some(Field::Attribute(_))));
        assert!(user.field("nope").is_none());
        assert_eq!(schema.type_names(), vec!["Post", "User"]);
    }

    #[test]
    fn test_unregistered_type_fails() {
        let schema = social_schema();
        let err = schema.model("_GlobalUniqueId").unwrap_err();
        assert!(matches!(err, ApiError::NodeTypeNotFound(t) if t == "_GlobalUniqueId"));
    }

    #[test]
    fn test_reverse_relationships() {
        let schema = social_schema();
        let author = schema.reverse_relationship("User", "posts").unwrap();
        assert_eq!(author.name(), "author");
        assert_eq!(author.edge_direction(), Direction::Incoming);
        assert_eq!(author.edge_cardinality(), Cardinality::One);
        let posts = schema.reverse_relationship("Post", "author").unwrap();
        assert_eq!(posts.name(), "posts");
        // Undirected self relationship mirrors itself.
        let friends = schema.reverse_relationship("User", "friends").unwrap();
        assert_eq!(friends.name(), "friends");
    }

    #[test]
    fn test_same_direction_is_not_a_mirror() {
        let schema = SchemaRegistry::builder()
            .model(
                NodeModel::builder("A").relationship(
                    Relationship::to_many("bs", "B")
                        .label("LINK")
                        .direction(Direction::Outgoing),
                ),
            )
            .model(
                NodeModel::builder("B").relationship(
                    Relationship::to_many("more", "A")
                        .label("LINK")
                        .direction(Direction::Outgoing),
                ),
            )
            .build()
            .unwrap();
        assert!(schema.reverse_relationship("A", "bs").is_none());
    }

    #[test]
    fn test_registration_errors() {
        let dup = SchemaRegistry::builder()
            .model(NodeModel::builder("A"))
            .model(NodeModel::builder("A"))
            .build();
        assert_eq!(dup.unwrap_err(), SchemaError::DuplicateType("A".into()));

        let reserved = SchemaRegistry::builder()
            .model(NodeModel::builder("A").attribute(Attribute::new("created_by")))
            .build();
        assert!(matches!(reserved, Err(SchemaError::ReservedField { .. })));

        let dangling = SchemaRegistry::builder()
            .model(NodeModel::builder("A").relationship(Relationship::to_one("b", "B")))
            .build();
        assert!(matches!(dangling, Err(SchemaError::UnknownTarget { .. })));

        let bad_label = SchemaRegistry::builder()
            .model(NodeModel::builder("A) DETACH DELETE (n"))
            .build();
        assert!(matches!(bad_label, Err(SchemaError::InvalidIdentifier(_))));

        let dup_field = SchemaRegistry::builder()
            .model(
                NodeModel::builder("A")
                    .attribute(Attribute::new("x"))
                    .relationship(Relationship::to_many("x", "A")),
            )
            .build();
        assert!(matches!(dup_field, Err(SchemaError::DuplicateField { .. })));
    }

    #[test]
    fn test_validator_maps_to_invalid_value() {
        let attr = Attribute::new("age").validator(|v| {
            if v.as_i64().is_some_and(|n| n >= 0) {
                Ok(())
            } else {
                Err("must be a non-negative integer".into())
            }
        });
        assert!(attr.validate(&serde_json::json!(3)).is_ok());
        let err = attr.validate(&serde_json::json!("x")).unwrap_err();
        assert!(matches!(err, ApiError::InvalidValue(_)));
    }
}
