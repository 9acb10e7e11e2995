use thiserror::Error;

use crate::types::NodeId;

/// Top-level error type for graph API requests.
///
/// Every failure surfaces as exactly one of these; a failed write never
/// leaves partial state behind because the owning transaction is rolled back.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Node with id '{0}' does not exist.")]
    NodeNotFound(NodeId),

    #[error("Node type '{0}' does not exist.")]
    NodeTypeNotFound(String),

    #[error("No node type specified for new node.")]
    MissingNodeType,

    #[error("Malformed update: {0}")]
    MalformedUpdate(String),

    #[error("Invalid property: {0}")]
    InvalidProperty(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Query parsing error: {0}")]
    Parse(#[from] ParseError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Transport-level classification of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    NotFound,
    BadRequest,
    Forbidden,
    Internal,
}

impl ErrorStatus {
    pub fn http_code(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::Internal => 500,
        }
    }
}

impl ApiError {
    pub fn status(&self) -> ErrorStatus {
        match self {
            Self::NodeNotFound(_) | Self::NodeTypeNotFound(_) => ErrorStatus::NotFound,
            Self::MissingNodeType
            | Self::MalformedUpdate(_)
            | Self::InvalidProperty(_)
            | Self::InvalidValue(_)
            | Self::Parse(_) => ErrorStatus::BadRequest,
            Self::PermissionDenied(_) => ErrorStatus::Forbidden,
            Self::Store(_) => ErrorStatus::Internal,
        }
    }

    pub fn no_property(name: &str) -> Self {
        Self::InvalidProperty(format!("There is no '{name}' property."))
    }
}

/// Errors from the query-string mini-language.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unmatched '{0}'.")]
    UnmatchedClose(char),

    #[error("Unmatched '{0}'.")]
    UnmatchedOpen(char),

    #[error("Empty field name in '{0}'.")]
    EmptyField(String),

    #[error("Unrecognized property '{0}'.")]
    UnrecognizedProperty(String),

    #[error("Property '{0}' must have the form name(value).")]
    MissingValue(String),

    #[error("Non integer value '{value}' for the integer property '{property}'.")]
    NotAnInteger { property: String, value: String },

    #[error("You can't specify the property '{0}' twice.")]
    DuplicateProperty(String),

    #[error("Order by must specify a key for ordering.")]
    MissingOrderKey,

    #[error("The optional second argument to order by must be either 'asc' or 'desc', got '{0}'.")]
    InvalidDirection(String),

    #[error("There is no comparison operator in the expression '{0}'.")]
    MissingOperator(String),

    #[error("Malformed expression '{0}'.")]
    Malformed(String),
}

/// Errors raised by a [`crate::store::GraphStore`] backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unexpected result: {0}")]
    UnexpectedResult(String),
}

/// Errors detected while registering node types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("'{0}' is not a valid identifier")]
    InvalidIdentifier(String),

    #[error("Node type '{0}' is registered twice")]
    DuplicateType(String),

    #[error("Field '{field}' is declared twice on '{node_type}'")]
    DuplicateField { node_type: String, field: String },

    #[error("Field '{field}' on '{node_type}' shadows a reserved attribute")]
    ReservedField { node_type: String, field: String },

    #[error("Relationship '{node_type}.{relationship}' targets unregistered type '{target}'")]
    UnknownTarget {
        node_type: String,
        relationship: String,
        target: String,
    },

    #[error("Unknown permission kind '{0}'")]
    UnknownPermission(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::NodeNotFound(NodeId(3)).status().http_code(), 404);
        assert_eq!(ApiError::NodeTypeNotFound("X".into()).status(), ErrorStatus::NotFound);
        assert_eq!(ApiError::MissingNodeType.status(), ErrorStatus::BadRequest);
        assert_eq!(
            ApiError::Parse(ParseError::MissingOrderKey).status(),
            ErrorStatus::BadRequest
        );
        assert_eq!(
            ApiError::PermissionDenied("nope".into()).status().http_code(),
            403
        );
        assert_eq!(
            ApiError::Store(StoreError::Backend("down".into())).status(),
            ErrorStatus::Internal
        );
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            ApiError::NodeNotFound(NodeId(12)).to_string(),
            "Node with id '12' does not exist."
        );
        assert_eq!(ParseError::UnmatchedOpen('(').to_string(), "Unmatched '('.");
    }
}
