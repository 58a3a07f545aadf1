//! # Schema Descriptors
//!
//! Static descriptions of record types: which fields exist, what kind of
//! value each holds, and what a request may do with it.
//!
//! ## Describe Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  impl Resource for Widget ──► SchemaBuilder ──► build() ──► Descriptor  │
//! │        (declare fields)        (+ naming)       (validate)     │        │
//! │                                                                 ▼        │
//! │                          SchemaRegistry  TypeId ──► Arc<SchemaDescriptor>│
//! │                          (memoized, RwLock)                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Capabilities
//! Every field starts with no capabilities. A field may be read and created
//! regardless, but it is only filtered, updated or ordered when it carries
//! the matching flag:
//!
//! | Tag | Capability  | Grants                                   |
//! |-----|-------------|------------------------------------------|
//! | `q` | Queryable   | equality / `_contains` filters, search   |
//! | `u` | Updatable   | single and batch update                  |
//! | `o` | Orderable   | `order=field` / `order=-field`           |

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::types::MANAGED_COLUMNS;

// =============================================================================
// Field Kinds
// =============================================================================

/// The kind of value a field holds.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Bool,
    /// Nested record with its own field list, stored as JSON.
    Object(Vec<FieldDescriptor>),
    /// Sequence of one kind, stored as JSON.
    Sequence(Box<FieldKind>),
    /// String-keyed map of one kind, stored as JSON.
    Map(Box<FieldKind>),
}

impl FieldKind {
    /// True for kinds stored in a native SQLite column.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            FieldKind::String | FieldKind::Integer | FieldKind::Float | FieldKind::Bool
        )
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::String => write!(f, "string"),
            FieldKind::Integer => write!(f, "integer"),
            FieldKind::Float => write!(f, "float"),
            FieldKind::Bool => write!(f, "bool"),
            FieldKind::Object(_) => write!(f, "object"),
            FieldKind::Sequence(inner) => write!(f, "list of {}", inner),
            FieldKind::Map(inner) => write!(f, "map of {}", inner),
        }
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// A single per-field permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Queryable,
    Updatable,
    Orderable,
}

impl Capability {
    fn bit(self) -> u8 {
        match self {
            Capability::Queryable => 0b001,
            Capability::Updatable => 0b010,
            Capability::Orderable => 0b100,
        }
    }
}

/// Set of capabilities granted to a field. Empty by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);

    pub fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn with(self, capability: Capability) -> Self {
        Capabilities(self.0 | capability.bit())
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parses a compact tag string such as `"q,u,o"`.
    ///
    /// Tags are comma separated; whitespace and empty segments are ignored.
    ///
    /// ```rust
    /// use tessera_core::schema::{Capabilities, Capability};
    ///
    /// let caps = Capabilities::parse_tags("q, o").unwrap();
    /// assert!(caps.contains(Capability::Queryable));
    /// assert!(!caps.contains(Capability::Updatable));
    /// ```
    pub fn parse_tags(tags: &str) -> Result<Self, SchemaError> {
        tags.split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .try_fold(Capabilities::NONE, |caps, tag| {
                let capability = match tag {
                    "q" => Capability::Queryable,
                    "u" => Capability::Updatable,
                    "o" => Capability::Orderable,
                    other => return Err(SchemaError::UnknownTag(other.to_string())),
                };
                Ok(caps.with(capability))
            })
    }
}

// =============================================================================
// Field Descriptor
// =============================================================================

/// One declared field of a record type.
///
/// The external name doubles as the column name.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    name: String,
    kind: FieldKind,
    capabilities: Capabilities,
    sensitive: bool,
    unique: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            capabilities: Capabilities::NONE,
            sensitive: false,
            unique: false,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    pub fn object(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self::new(name, FieldKind::Object(fields))
    }

    pub fn sequence(name: impl Into<String>, element: FieldKind) -> Self {
        Self::new(name, FieldKind::Sequence(Box::new(element)))
    }

    pub fn map(name: impl Into<String>, value: FieldKind) -> Self {
        Self::new(name, FieldKind::Map(Box::new(value)))
    }

    pub fn queryable(self) -> Self {
        self.grant(Capability::Queryable)
    }

    pub fn updatable(self) -> Self {
        self.grant(Capability::Updatable)
    }

    pub fn orderable(self) -> Self {
        self.grant(Capability::Orderable)
    }

    /// Hides the field from search and from every response.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// No two active rows may share a value.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn grant(mut self, capability: Capability) -> Self {
        self.capabilities = self.capabilities.with(capability);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Eligible for free-text search: a queryable, non-sensitive string.
    pub fn is_searchable(&self) -> bool {
        self.kind == FieldKind::String && self.can(Capability::Queryable) && !self.sensitive
    }
}

// =============================================================================
// Naming
// =============================================================================

/// How type names become resource and table names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingStrategy {
    /// Prepended to every table name.
    pub table_prefix: String,

    /// Skip the plural `s` on table names.
    pub singular_tables: bool,
}

impl NamingStrategy {
    pub fn resource_name(&self, type_name: &str) -> String {
        snake_case(type_name)
    }

    pub fn table_name(&self, type_name: &str) -> String {
        let mut table = format!("{}{}", self.table_prefix, snake_case(type_name));
        if !self.singular_tables {
            table.push('s');
        }
        table
    }
}

/// Converts `CamelCase` to `snake_case`, keeping acronyms together
/// (`HTTPLog` → `http_log`).
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                None | Some('_') => false,
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) => p.is_uppercase() && next.is_some_and(char::is_lowercase),
            };
            if boundary {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

// =============================================================================
// Schema Builder
// =============================================================================

/// Collects a record type's declaration before validation.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    resource: String,
    table: String,
    identifier: Option<String>,
    fields: Vec<FieldDescriptor>,
    pending: Option<SchemaError>,
}

impl SchemaBuilder {
    pub fn new(type_name: &str, naming: &NamingStrategy) -> Self {
        Self {
            resource: naming.resource_name(type_name),
            table: naming.table_name(type_name),
            identifier: None,
            fields: Vec::new(),
            pending: None,
        }
    }

    /// Declares the identifier column (conventionally `id`).
    pub fn identifier(mut self, name: impl Into<String>) -> Self {
        self.identifier = Some(name.into());
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Declares a field with capabilities from a tag string like `"q,u"`.
    ///
    /// An unknown tag surfaces from [`SchemaBuilder::build`].
    pub fn tagged(mut self, field: FieldDescriptor, tags: &str) -> Self {
        match Capabilities::parse_tags(tags) {
            Ok(caps) => self.fields.push(field.with_capabilities(caps)),
            Err(e) => {
                self.pending.get_or_insert(e);
            }
        }
        self
    }

    /// Overrides the derived table name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn build(self) -> Result<SchemaDescriptor, SchemaError> {
        if let Some(err) = self.pending {
            return Err(err);
        }

        let resource = self.resource;
        let identifier = self
            .identifier
            .ok_or_else(|| SchemaError::MissingIdentifier {
                resource: resource.clone(),
            })?;

        for name in [&resource, &self.table, &identifier] {
            if !is_valid_name(name) {
                return Err(SchemaError::InvalidName {
                    resource: resource.clone(),
                    name: name.clone(),
                });
            }
        }
        if MANAGED_COLUMNS.contains(&identifier.as_str()) {
            return Err(SchemaError::ReservedField {
                resource,
                field: identifier,
            });
        }

        let mut seen = HashSet::new();
        seen.insert(identifier.as_str());
        for field in &self.fields {
            if MANAGED_COLUMNS.contains(&field.name()) {
                return Err(SchemaError::ReservedField {
                    resource,
                    field: field.name().to_string(),
                });
            }
            if !seen.insert(field.name()) {
                return Err(SchemaError::DuplicateField {
                    resource,
                    field: field.name().to_string(),
                });
            }
            validate_kind(&resource, field)?;
        }

        Ok(SchemaDescriptor {
            resource,
            table: self.table,
            identifier,
            fields: self.fields,
        })
    }
}

/// Field names must be valid at every nesting level.
fn validate_kind(resource: &str, field: &FieldDescriptor) -> Result<(), SchemaError> {
    if !is_valid_name(field.name()) {
        return Err(SchemaError::InvalidName {
            resource: resource.to_string(),
            name: field.name().to_string(),
        });
    }

    let mut kind = field.kind();
    loop {
        match kind {
            FieldKind::Sequence(inner) | FieldKind::Map(inner) => kind = inner,
            FieldKind::Object(nested) => {
                let mut seen = HashSet::new();
                for child in nested {
                    if !seen.insert(child.name()) {
                        return Err(SchemaError::DuplicateField {
                            resource: resource.to_string(),
                            field: format!("{}.{}", field.name(), child.name()),
                        });
                    }
                    validate_kind(resource, child)?;
                }
                return Ok(());
            }
            _ => return Ok(()),
        }
    }
}

// =============================================================================
// Schema Descriptor
// =============================================================================

/// Validated, immutable description of one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDescriptor {
    resource: String,
    table: String,
    identifier: String,
    fields: Vec<FieldDescriptor>,
}

impl SchemaDescriptor {
    /// Route segment, e.g. `widget`.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Storage name, e.g. `widgets`.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Identifier column, e.g. `id`.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Declared fields in declaration order (identifier excluded).
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// The field if it exists and carries `capability`.
    pub fn field_with(&self, name: &str, capability: Capability) -> Option<&FieldDescriptor> {
        self.field(name).filter(|f| f.can(capability))
    }

    /// The identifier is always orderable.
    pub fn is_orderable(&self, name: &str) -> bool {
        name == self.identifier || self.field_with(name, Capability::Orderable).is_some()
    }

    pub fn searchable_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_searchable())
    }

    /// Fields that appear in responses.
    pub fn visible_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| !f.is_sensitive())
    }
}

// =============================================================================
// Resource Trait
// =============================================================================

/// A record type served by the engine.
///
/// ```rust
/// use tessera_core::schema::{FieldDescriptor, Resource, SchemaBuilder};
///
/// struct Widget;
///
/// impl Resource for Widget {
///     const TYPE_NAME: &'static str = "Widget";
///
///     fn declare(schema: SchemaBuilder) -> SchemaBuilder {
///         schema
///             .identifier("id")
///             .tagged(FieldDescriptor::string("name"), "q,u,o")
///             .tagged(FieldDescriptor::float("price"), "u,o")
///     }
/// }
/// ```
pub trait Resource: 'static {
    /// Type name the resource and table names derive from.
    const TYPE_NAME: &'static str;

    fn declare(schema: SchemaBuilder) -> SchemaBuilder;
}

// =============================================================================
// Schema Registry
// =============================================================================

/// Process-wide memo of descriptors keyed by record type.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    naming: NamingStrategy,
    cache: RwLock<HashMap<TypeId, Arc<SchemaDescriptor>>>,
}

impl SchemaRegistry {
    pub fn new(naming: NamingStrategy) -> Self {
        Self {
            naming,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn naming(&self) -> &NamingStrategy {
        &self.naming
    }

    /// Returns the descriptor for `R`, building it on first use.
    ///
    /// The miss path re-checks under the write lock and builds while holding
    /// it, so each type is built at most once even under concurrent first
    /// calls.
    pub fn describe<R: Resource>(&self) -> Result<Arc<SchemaDescriptor>, SchemaError> {
        let key = TypeId::of::<R>();

        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(schema) = cache.get(&key) {
                return Ok(Arc::clone(schema));
            }
        }

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(schema) = cache.get(&key) {
            return Ok(Arc::clone(schema));
        }

        let built = Arc::new(R::declare(SchemaBuilder::new(R::TYPE_NAME, &self.naming)).build()?);
        cache.insert(key, Arc::clone(&built));
        Ok(built)
    }

    pub fn len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget;

    impl Resource for Widget {
        const TYPE_NAME: &'static str = "Widget";

        fn declare(schema: SchemaBuilder) -> SchemaBuilder {
            schema
                .identifier("id")
                .tagged(FieldDescriptor::string("name"), "q,u,o")
                .tagged(FieldDescriptor::float("price"), "u,o")
                .field(FieldDescriptor::string("secret").queryable().sensitive())
        }
    }

    struct Nameless;

    impl Resource for Nameless {
        const TYPE_NAME: &'static str = "Nameless";

        fn declare(schema: SchemaBuilder) -> SchemaBuilder {
            schema.field(FieldDescriptor::string("name"))
        }
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("Widget"), "widget");
        assert_eq!(snake_case("UserProfile"), "user_profile");
        assert_eq!(snake_case("HTTPLog"), "http_log");
        assert_eq!(snake_case("Item2Box"), "item2_box");
        assert_eq!(snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn test_naming_strategy() {
        let naming = NamingStrategy::default();
        assert_eq!(naming.table_name("UserProfile"), "user_profiles");

        let naming = NamingStrategy {
            table_prefix: "app_".to_string(),
            singular_tables: true,
        };
        assert_eq!(naming.table_name("Widget"), "app_widget");
        assert_eq!(naming.resource_name("Widget"), "widget");
    }

    #[test]
    fn test_parse_tags() {
        let caps = Capabilities::parse_tags("q,u,o").unwrap();
        assert!(caps.contains(Capability::Queryable));
        assert!(caps.contains(Capability::Updatable));
        assert!(caps.contains(Capability::Orderable));

        assert!(Capabilities::parse_tags("").unwrap().is_empty());
        assert_eq!(
            Capabilities::parse_tags("q,x"),
            Err(SchemaError::UnknownTag("x".to_string()))
        );
    }

    #[test]
    fn test_describe_widget() {
        let registry = SchemaRegistry::default();
        let schema = registry.describe::<Widget>().unwrap();

        assert_eq!(schema.resource(), "widget");
        assert_eq!(schema.table(), "widgets");
        assert_eq!(schema.identifier(), "id");
        assert_eq!(schema.fields().len(), 3);

        assert!(schema.field_with("name", Capability::Queryable).is_some());
        assert!(schema.field_with("price", Capability::Queryable).is_none());
        assert!(schema.is_orderable("price"));
        assert!(schema.is_orderable("id"));
        assert!(!schema.is_orderable("secret"));

        let searchable: Vec<_> = schema.searchable_fields().map(|f| f.name()).collect();
        assert_eq!(searchable, vec!["name"]);
        let visible: Vec<_> = schema.visible_fields().map(|f| f.name()).collect();
        assert_eq!(visible, vec!["name", "price"]);
    }

    #[test]
    fn test_describe_is_memoized() {
        let registry = SchemaRegistry::default();
        let first = registry.describe::<Widget>().unwrap();
        let second = registry.describe::<Widget>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    static SLOW_BUILDS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

    struct SlowWidget;

    impl Resource for SlowWidget {
        const TYPE_NAME: &'static str = "SlowWidget";

        fn declare(schema: SchemaBuilder) -> SchemaBuilder {
            SLOW_BUILDS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(50));
            schema.identifier("id").tagged(FieldDescriptor::string("name"), "q")
        }
    }

    #[test]
    fn test_concurrent_first_describe_builds_once() {
        let registry = Arc::new(SchemaRegistry::default());
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.describe::<SlowWidget>().unwrap()
                })
            })
            .collect();
        let schemas: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(SLOW_BUILDS.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(schemas.iter().all(|s| Arc::ptr_eq(s, &schemas[0])));
    }

    #[test]
    fn test_missing_identifier_is_rejected() {
        let registry = SchemaRegistry::default();
        let err = registry.describe::<Nameless>().unwrap_err();
        assert_eq!(
            err,
            SchemaError::MissingIdentifier {
                resource: "nameless".to_string()
            }
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalid_declarations() {
        let naming = NamingStrategy::default();
        let base = || SchemaBuilder::new("Thing", &naming).identifier("id");

        let err = base()
            .field(FieldDescriptor::string("a"))
            .field(FieldDescriptor::integer("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { .. }));

        let err = base()
            .field(FieldDescriptor::string("id"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { .. }));

        let err = base()
            .field(FieldDescriptor::string("deleted_at"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::ReservedField { .. }));

        let err = base()
            .field(FieldDescriptor::string("Bad Name"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidName { .. }));

        let err = base()
            .field(FieldDescriptor::object(
                "dims",
                vec![FieldDescriptor::float("w"), FieldDescriptor::float("w")],
            ))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { field, .. } if field == "dims.w"));

        let err = base()
            .tagged(FieldDescriptor::string("a"), "q,z")
            .build()
            .unwrap_err();
        assert_eq!(err, SchemaError::UnknownTag("z".to_string()));
    }

    #[test]
    fn test_builder_clone_keeps_pending_error() {
        let builder = SchemaBuilder::new("Widget", &NamingStrategy::default())
            .identifier("id")
            .tagged(FieldDescriptor::string("name"), "q,z");
        let copy = builder.clone();

        assert_eq!(copy.build().unwrap_err(), SchemaError::UnknownTag("z".to_string()));
        assert_eq!(builder.build().unwrap_err(), SchemaError::UnknownTag("z".to_string()));
    }

    #[test]
    fn test_field_kind_display() {
        let kind = FieldKind::Sequence(Box::new(FieldKind::Map(Box::new(FieldKind::Integer))));
        assert_eq!(kind.to_string(), "list of map of integer");
        assert!(FieldKind::Bool.is_scalar());
        assert!(!kind.is_scalar());
    }
}
