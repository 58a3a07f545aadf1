//! # Update Validation
//!
//! Whitelisting of update payloads against a schema's `Updatable` fields.
//!
//! ## Rules
//! - Only fields declared `Updatable` survive; everything else is dropped
//!   silently (identifier, timestamps, read-only and unknown keys alike).
//! - Surviving values are coerced to their field kind.
//! - If nothing survives, the update is rejected as a whitelist violation.
//! - Batch objects must name their target with the identifier key.

use crate::binder::{coerce, parse_id};
use crate::error::{BindingError, CoreError, CoreResult};
use crate::schema::{Capability, SchemaDescriptor};
use crate::value::GenericRecord;

/// One row's worth of changes from a batch update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub id: i64,
    pub changes: GenericRecord,
}

/// Filters and coerces a single update payload.
pub fn bind_update(schema: &SchemaDescriptor, raw: GenericRecord) -> CoreResult<GenericRecord> {
    let mut changes = GenericRecord::new();

    for (key, value) in raw {
        let Some(field) = schema.field_with(&key, Capability::Updatable) else {
            continue;
        };
        let value = coerce(field.kind(), value, &key)?;
        changes.insert(key, value);
    }

    if changes.is_empty() {
        return Err(CoreError::WhitelistViolation {
            resource: schema.resource().to_string(),
        });
    }
    Ok(changes)
}

/// Binds every object of a batch update.
///
/// The first object that fails (missing id, bad id, nothing updatable)
/// rejects the whole batch.
pub fn bind_batch_update(
    schema: &SchemaDescriptor,
    objects: Vec<GenericRecord>,
) -> CoreResult<Vec<UpdateRequest>> {
    if objects.is_empty() {
        return Err(BindingError::EmptyObjects.into());
    }

    objects
        .into_iter()
        .enumerate()
        .map(|(index, mut raw)| -> CoreResult<UpdateRequest> {
            let id = raw
                .remove(schema.identifier())
                .ok_or(BindingError::MissingId { index })?;
            let id = parse_id(&id)?;
            let changes = bind_update(schema, raw)?;
            Ok(UpdateRequest { id, changes })
        })
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDescriptor, NamingStrategy, SchemaBuilder};
    use crate::value::Value;

    fn schema() -> SchemaDescriptor {
        SchemaBuilder::new("Widget", &NamingStrategy::default())
            .identifier("id")
            .tagged(FieldDescriptor::string("name"), "q,o")
            .tagged(FieldDescriptor::float("price"), "u,o")
            .build()
            .unwrap()
    }

    #[test]
    fn test_update_keeps_only_updatable_fields() {
        let raw = GenericRecord::new()
            .with("name", "renamed")
            .with("price", "12")
            .with("created_at", 5i64);

        let changes = bind_update(&schema(), raw).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.get("price"), Some(&Value::Float(12.0)));
    }

    #[test]
    fn test_update_without_updatable_fields_is_rejected() {
        let raw = GenericRecord::new().with("name", "x").with("id", 3i64);
        let err = bind_update(&schema(), raw).unwrap_err();
        assert_eq!(
            err,
            CoreError::WhitelistViolation {
                resource: "widget".to_string()
            }
        );
    }

    #[test]
    fn test_update_coercion_failure() {
        let raw = GenericRecord::new().with("price", "cheap");
        let err = bind_update(&schema(), raw).unwrap_err();
        assert!(matches!(err, CoreError::Binding(BindingError::Coercion { .. })));
    }

    #[test]
    fn test_batch_update_requires_ids() {
        let objects = vec![
            GenericRecord::new().with("id", 1i64).with("price", 2.0),
            GenericRecord::new().with("price", 3.0),
        ];
        let err = bind_batch_update(&schema(), objects).unwrap_err();
        assert_eq!(err, CoreError::Binding(BindingError::MissingId { index: 1 }));

        let objects = vec![GenericRecord::new().with("id", "4").with("price", 2.0)];
        let updates = bind_batch_update(&schema(), objects).unwrap();
        assert_eq!(updates[0].id, 4);
        assert_eq!(updates[0].changes.get("price"), Some(&Value::Float(2.0)));
    }
}
