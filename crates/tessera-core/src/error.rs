//! # Error Types
//!
//! Error types for tessera-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tessera-core errors (this file)                                       │
//! │  ├── BindingError   - Malformed or uncoercible request payloads        │
//! │  ├── SchemaError    - Invalid schema declarations (startup only)       │
//! │  └── CoreError      - Per-request rejections (wraps BindingError)      │
//! │                                                                         │
//! │  tessera-db errors (separate crate)                                    │
//! │  └── DbError        - Database operation failures                      │
//! │                                                                         │
//! │  tessera-api errors (in app)                                           │
//! │  └── ApiError       - What HTTP clients see                            │
//! │                                                                         │
//! │  Flow: BindingError → CoreError → DbError → ApiError → Client          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Binding Error
// =============================================================================

/// A request payload that could not be turned into records.
#[derive(Debug, Error, PartialEq)]
pub enum BindingError {
    /// The request carried no content type, or one we do not parse.
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// The JSON body did not parse.
    #[error("Malformed JSON body: {0}")]
    MalformedJson(String),

    /// A JSON array element was not an object.
    #[error("JSON array element {index} is not an object")]
    NonObjectElement { index: usize },

    /// The JSON body was neither an object nor an array.
    #[error("Expected a JSON object or array, got {0}")]
    UnexpectedJsonType(String),

    /// A multipart or form body did not parse.
    #[error("Malformed form body: {0}")]
    MalformedForm(String),

    /// A value could not be coerced into its field's kind.
    ///
    /// ## When This Occurs
    /// - `"abc"` sent for an integer field
    /// - An array sent for a string field
    /// - A nested object field receiving a scalar
    #[error("Field '{field}' expects {expected}, got {found}")]
    Coercion {
        field: String,
        expected: String,
        found: String,
    },

    /// Exactly one record was expected (single update).
    #[error("Expected a single object, got {0} records")]
    ExpectedSingleRecord(usize),

    /// A batch update object carried no `id`.
    #[error("Object {index} is missing 'id'")]
    MissingId { index: usize },

    /// An identifier could not be parsed.
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// No ids were supplied to a batch delete.
    #[error("No ids supplied")]
    EmptyIds,

    /// No objects were supplied to a batch update.
    #[error("No objects supplied")]
    EmptyObjects,
}

impl BindingError {
    /// Creates a coercion error for the given field path.
    pub fn coercion(
        field: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        BindingError::Coercion {
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }
}

// =============================================================================
// Schema Error
// =============================================================================

/// Invalid schema declarations.
///
/// These are configuration errors: they are raised while resources are
/// registered at startup and are fatal there, never per-request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaError {
    /// The record type declared no identifier field.
    #[error("Resource {resource} has no identifier field")]
    MissingIdentifier { resource: String },

    /// Two fields share a name.
    #[error("Resource {resource} declares field '{field}' twice")]
    DuplicateField { resource: String, field: String },

    /// A field or table name is not a plain lowercase SQL identifier.
    #[error("Invalid name '{name}' in resource {resource}")]
    InvalidName { resource: String, name: String },

    /// A declared field collides with a column the engine manages.
    #[error("Field '{field}' of resource {resource} is reserved")]
    ReservedField { resource: String, field: String },

    /// A capability tag string contained an unknown tag.
    #[error("Unknown capability tag '{0}'")]
    UnknownTag(String),
}

// =============================================================================
// Core Error
// =============================================================================

/// Per-request rejections raised by the core.
#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    /// The payload could not be bound.
    #[error("Binding error: {0}")]
    Binding(#[from] BindingError),

    /// None of the supplied fields may be updated.
    ///
    /// ## When This Occurs
    /// - The payload only names read-only fields (e.g. `id`, `created_at`)
    /// - The payload only names fields unknown to the schema
    #[error("No updatable fields supplied for {resource}")]
    WhitelistViolation { resource: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = BindingError::coercion("price", "float", "\"abc\"");
        assert_eq!(err.to_string(), "Field 'price' expects float, got \"abc\"");

        let err = CoreError::WhitelistViolation {
            resource: "widget".to_string(),
        };
        assert_eq!(err.to_string(), "No updatable fields supplied for widget");
    }

    #[test]
    fn test_binding_converts_to_core_error() {
        let core_err: CoreError = BindingError::EmptyIds.into();
        assert!(matches!(core_err, CoreError::Binding(BindingError::EmptyIds)));
    }
}
