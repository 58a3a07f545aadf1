//! # Registered Resources
//!
//! The record types this server exposes. Each one is a static declaration;
//! routes, tables and counters are derived from it at startup.
//!
//! ## Capability Tags
//! ```text
//! q  Queryable   usable in <field>= and <field>_contains= filters
//! u  Updatable   accepted by PUT
//! o  Orderable   accepted by order=<field> / order=-<field>
//! ```

use std::sync::Arc;

use tessera_core::schema::{FieldDescriptor, FieldKind, Resource, SchemaBuilder};
use tessera_core::{SchemaDescriptor, SchemaError, SchemaRegistry};

/// Accounts. The password is writable but never listed, searched or
/// returned.
pub struct User;

impl Resource for User {
    const TYPE_NAME: &'static str = "User";

    fn declare(schema: SchemaBuilder) -> SchemaBuilder {
        schema
            .identifier("id")
            .tagged(FieldDescriptor::string("username").unique(), "q,u")
            .tagged(FieldDescriptor::string("email").unique(), "q,u")
            .tagged(FieldDescriptor::string("password").sensitive(), "u")
    }
}

/// Catalogue items.
pub struct Widget;

impl Resource for Widget {
    const TYPE_NAME: &'static str = "Widget";

    fn declare(schema: SchemaBuilder) -> SchemaBuilder {
        schema
            .identifier("id")
            .tagged(FieldDescriptor::string("name"), "q,u,o")
            .tagged(FieldDescriptor::float("price"), "u,o")
            .tagged(FieldDescriptor::integer("stock"), "q,u,o")
            // assigned once, never edited
            .tagged(FieldDescriptor::string("sku").unique(), "q")
            .tagged(FieldDescriptor::boolean("active"), "q,u")
            .tagged(FieldDescriptor::sequence("tags", FieldKind::String), "u")
            .tagged(
                FieldDescriptor::object(
                    "dimensions",
                    vec![FieldDescriptor::float("width"), FieldDescriptor::float("height")],
                ),
                "u",
            )
    }
}

/// Describes every served resource, in mount order.
pub fn describe_all(registry: &SchemaRegistry) -> Result<Vec<Arc<SchemaDescriptor>>, SchemaError> {
    Ok(vec![registry.describe::<User>()?, registry.describe::<Widget>()?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::schema::Capability;

    #[test]
    fn test_resources_describe() {
        let registry = SchemaRegistry::default();
        let schemas = describe_all(&registry).unwrap();

        let names: Vec<_> = schemas.iter().map(|s| (s.resource(), s.table())).collect();
        assert_eq!(names, vec![("user", "users"), ("widget", "widgets")]);
        assert_eq!(registry.len(), 2);

        let user = &schemas[0];
        assert!(user.field("password").unwrap().is_sensitive());
        assert!(user.field_with("password", Capability::Queryable).is_none());
        let searchable: Vec<_> = user.searchable_fields().map(|f| f.name()).collect();
        assert_eq!(searchable, vec!["username", "email"]);
    }
}
