//! # Request Binding
//!
//! Turns raw request bodies into [`GenericRecord`]s and coerces their values
//! into the kinds a [`SchemaDescriptor`] declares.
//!
//! ## Binding Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Content-Type + bytes                                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Payload::parse ──► Json(value) │ Form(record)                          │
//! │       │                                                                 │
//! │       ├── into_records()   create / single update                       │
//! │       ├── batch_objects()  PUT /<resource>   {"objs": [...]}            │
//! │       └── resolve_ids()    DELETE /<resource> {"ids": [...]}            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  bind_record(schema, raw)  ── coerce() per declared field               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Multipart bodies are split into parts by the HTTP layer, which feeds each
//! text value and file name into a [`FormRecord`] and then wraps it with
//! [`Payload::from_form`].

use crate::error::BindingError;
use crate::schema::{FieldKind, SchemaDescriptor};
use crate::value::{GenericRecord, Value};

// =============================================================================
// Content Type
// =============================================================================

/// Body encodings the binder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    Form,
    Multipart,
}

impl ContentType {
    /// Classifies a `Content-Type` header value, ignoring parameters.
    pub fn from_header(header: Option<&str>) -> Result<Self, BindingError> {
        let raw = header.unwrap_or_default();
        let mime = raw.split(';').next().unwrap_or_default().trim();

        if mime.eq_ignore_ascii_case("application/json") {
            Ok(ContentType::Json)
        } else if mime.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
            Ok(ContentType::Form)
        } else if mime.eq_ignore_ascii_case("multipart/form-data") {
            Ok(ContentType::Multipart)
        } else if mime.is_empty() {
            Err(BindingError::UnsupportedContentType("none".to_string()))
        } else {
            Err(BindingError::UnsupportedContentType(mime.to_string()))
        }
    }
}

// =============================================================================
// Form Records
// =============================================================================

/// Accumulates form fields into one record.
///
/// A key seen once holds a string; a repeated key becomes a list of strings.
#[derive(Debug, Default)]
pub struct FormRecord {
    record: GenericRecord,
}

impl FormRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a text value or an uploaded file's name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = Value::String(value.into());

        let merged = match self.record.remove(&name) {
            None => value,
            Some(Value::List(mut items)) => {
                items.push(value);
                Value::List(items)
            }
            Some(previous) => Value::List(vec![previous, value]),
        };
        self.record.insert(name, merged);
    }

    pub fn finish(self) -> GenericRecord {
        self.record
    }
}

/// Parses an `application/x-www-form-urlencoded` body.
pub fn parse_form(body: &[u8]) -> GenericRecord {
    let mut form = FormRecord::new();
    for (key, value) in url::form_urlencoded::parse(body) {
        form.push(key, value);
    }
    form.finish()
}

// =============================================================================
// Payload
// =============================================================================

/// A parsed but not yet schema-bound request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    Form(GenericRecord),
}

impl Payload {
    /// Parses a body according to its content type.
    ///
    /// Multipart bodies cannot be parsed from bytes here; see
    /// [`Payload::from_form`].
    pub fn parse(content_type: ContentType, body: &[u8]) -> Result<Self, BindingError> {
        match content_type {
            ContentType::Json => serde_json::from_slice(body)
                .map(Payload::Json)
                .map_err(|e| BindingError::MalformedJson(e.to_string())),
            ContentType::Form => Ok(Payload::Form(parse_form(body))),
            ContentType::Multipart => Err(BindingError::MalformedForm(
                "multipart bodies must be split into parts first".to_string(),
            )),
        }
    }

    pub fn from_form(record: GenericRecord) -> Self {
        Payload::Form(record)
    }

    /// Normalizes the payload into raw records.
    ///
    /// A JSON object yields one record, a JSON array one record per element.
    /// Form payloads always yield exactly one record.
    pub fn into_records(self) -> Result<Vec<GenericRecord>, BindingError> {
        match self {
            Payload::Json(serde_json::Value::Object(map)) => {
                Ok(vec![object_record(map)])
            }
            Payload::Json(serde_json::Value::Array(items)) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| match item {
                    serde_json::Value::Object(map) => Ok(object_record(map)),
                    _ => Err(BindingError::NonObjectElement { index }),
                })
                .collect(),
            Payload::Json(other) => Err(BindingError::UnexpectedJsonType(
                json_type_name(&other).to_string(),
            )),
            Payload::Form(record) => Ok(vec![record]),
        }
    }

    /// Exactly one record, as single update requires.
    pub fn into_single_record(self) -> Result<GenericRecord, BindingError> {
        let mut records = self.into_records()?;
        if records.len() != 1 {
            return Err(BindingError::ExpectedSingleRecord(records.len()));
        }
        Ok(records.remove(0))
    }

    /// The objects of a batch update: `{"objs": [...]}` or form `objs=[...]`.
    pub fn batch_objects(self) -> Result<Vec<GenericRecord>, BindingError> {
        let objs = match self {
            Payload::Json(serde_json::Value::Object(mut map)) => map.remove("objs"),
            Payload::Json(_) => None,
            Payload::Form(record) => match record.get("objs") {
                Some(Value::String(raw)) => Some(
                    serde_json::from_str(raw)
                        .map_err(|e| BindingError::MalformedJson(e.to_string()))?,
                ),
                _ => None,
            },
        };

        let items = match objs {
            Some(serde_json::Value::Array(items)) => items,
            Some(other) => {
                return Err(BindingError::UnexpectedJsonType(
                    json_type_name(&other).to_string(),
                ))
            }
            None => Vec::new(),
        };
        if items.is_empty() {
            return Err(BindingError::EmptyObjects);
        }

        Payload::Json(serde_json::Value::Array(items)).into_records()
    }

    /// The `ids` key of the body, if present.
    fn ids(&self) -> Result<Option<Vec<i64>>, BindingError> {
        match self {
            Payload::Json(serde_json::Value::Object(map)) => match map.get("ids") {
                Some(serde_json::Value::Array(items)) => items
                    .iter()
                    .map(|item| parse_id(&Value::from(item.clone())))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Some),
                Some(serde_json::Value::Null) | None => Ok(None),
                Some(other) => Err(BindingError::InvalidId(other.to_string())),
            },
            Payload::Json(_) => Ok(None),
            Payload::Form(record) => match record.get("ids") {
                Some(Value::String(raw)) if !raw.trim().is_empty() => {
                    let items: Vec<serde_json::Value> = serde_json::from_str(raw)
                        .map_err(|_| BindingError::InvalidId(raw.clone()))?;
                    items
                        .into_iter()
                        .map(|item| parse_id(&Value::from(item)))
                        .collect::<Result<Vec<_>, _>>()
                        .map(Some)
                }
                _ => Ok(None),
            },
        }
    }
}

fn object_record(map: serde_json::Map<String, serde_json::Value>) -> GenericRecord {
    map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// =============================================================================
// Identifiers
// =============================================================================

/// Parses one identifier from a path segment or query list element.
pub fn parse_id_str(raw: &str) -> Result<i64, BindingError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| BindingError::InvalidId(raw.to_string()))
}

/// Parses one identifier from a body value (`7`, `7.0` or `"7"`).
pub fn parse_id(value: &Value) -> Result<i64, BindingError> {
    match value {
        Value::String(s) => parse_id_str(s),
        other => other
            .as_i64()
            .ok_or_else(|| BindingError::InvalidId(other.to_string())),
    }
}

/// Collects the ids of a batch delete.
///
/// Sources are tried in order and the first non-empty one wins:
///
/// 1. JSON body `{"ids": [1, 2, 3]}`
/// 2. query string `ids=1,2,3`
/// 3. form body `ids=[1,2,3]`
pub fn resolve_ids(
    payload: Option<&Payload>,
    query_ids: Option<&str>,
) -> Result<Vec<i64>, BindingError> {
    if let Some(json @ Payload::Json(_)) = payload {
        if let Some(ids) = json.ids()?.filter(|ids| !ids.is_empty()) {
            return Ok(ids);
        }
    }

    if let Some(raw) = query_ids.filter(|raw| !raw.trim().is_empty()) {
        let ids = raw
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(parse_id_str)
            .collect::<Result<Vec<_>, _>>()?;
        if !ids.is_empty() {
            return Ok(ids);
        }
    }

    if let Some(form @ Payload::Form(_)) = payload {
        if let Some(ids) = form.ids()?.filter(|ids| !ids.is_empty()) {
            return Ok(ids);
        }
    }

    Err(BindingError::EmptyIds)
}

// =============================================================================
// Coercion
// =============================================================================

/// Coerces `value` into `kind`, naming `path` on failure.
///
/// ## Rules
/// ```text
/// string   ◄── any scalar (numbers and bools are formatted)
/// integer  ◄── integer, integral float, numeric string
/// float    ◄── integer, float, numeric string
/// bool     ◄── bool, integer (non-zero = true), true/false/t/f/1/0
/// object   ◄── object (declared fields only), JSON object string
/// sequence ◄── list (element-wise), JSON array string, lone scalar
/// map      ◄── object (value-wise), JSON object string
/// null passes through unchanged
/// ```
pub fn coerce(kind: &FieldKind, value: Value, path: &str) -> Result<Value, BindingError> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    let mismatch = |value: &Value| BindingError::coercion(path, kind.to_string(), value.to_string());

    match kind {
        FieldKind::String => match value {
            Value::String(_) => Ok(value),
            Value::Integer(i) => Ok(Value::String(i.to_string())),
            Value::Float(x) => Ok(Value::String(x.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(mismatch(&other)),
        },

        FieldKind::Integer => match &value {
            Value::Integer(_) => Ok(value),
            Value::Float(_) => value.as_i64().map(Value::Integer).ok_or_else(|| mismatch(&value)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| Value::Float(s.parse::<f64>().ok()?).as_i64())
                    .map(Value::Integer)
                    .ok_or_else(|| mismatch(&value))
            }
            _ => Err(mismatch(&value)),
        },

        FieldKind::Float => match &value {
            Value::Float(_) => Ok(value),
            Value::Integer(i) => Ok(Value::Float(*i as f64)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|x| x.is_finite())
                .map(Value::Float)
                .ok_or_else(|| mismatch(&value)),
            _ => Err(mismatch(&value)),
        },

        FieldKind::Bool => match &value {
            Value::Bool(_) => Ok(value),
            Value::Integer(i) => Ok(Value::Bool(*i != 0)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Value::Bool(true)),
                "false" | "f" | "0" => Ok(Value::Bool(false)),
                _ => Err(mismatch(&value)),
            },
            _ => Err(mismatch(&value)),
        },

        FieldKind::Object(fields) => match embedded_json(value) {
            Value::Object(mut raw) => {
                let mut bound = GenericRecord::new();
                for field in fields {
                    if let Some(inner) = raw.remove(field.name()) {
                        let inner_path = format!("{}.{}", path, field.name());
                        bound.insert(field.name(), coerce(field.kind(), inner, &inner_path)?);
                    }
                }
                Ok(Value::Object(bound))
            }
            other => Err(mismatch(&other)),
        },

        FieldKind::Sequence(element) => match embedded_json(value) {
            Value::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| coerce(element, item, &format!("{}[{}]", path, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Value::Object(_) if !matches!(**element, FieldKind::Object(_) | FieldKind::Map(_)) => {
                Err(mismatch(&Value::Object(GenericRecord::new())))
            }
            single => Ok(Value::List(vec![coerce(element, single, &format!("{}[0]", path))?])),
        },

        FieldKind::Map(element) => match embedded_json(value) {
            Value::Object(raw) => raw
                .into_iter()
                .map(|(key, item)| {
                    let inner_path = format!("{}.{}", path, key);
                    coerce(element, item, &inner_path).map(|v| (key, v))
                })
                .collect::<Result<GenericRecord, _>>()
                .map(Value::Object),
            other => Err(mismatch(&other)),
        },
    }
}

/// Form posts carry composite values as JSON text.
fn embedded_json(value: Value) -> Value {
    match value {
        Value::String(s) if s.trim_start().starts_with(['[', '{']) => {
            match serde_json::from_str::<serde_json::Value>(&s) {
                Ok(json @ (serde_json::Value::Array(_) | serde_json::Value::Object(_))) => {
                    Value::from(json)
                }
                _ => Value::String(s),
            }
        }
        other => other,
    }
}

/// Binds a raw create payload against `schema`.
///
/// Only declared fields are kept; unknown keys, the identifier and the
/// managed timestamp columns are dropped. Explicit nulls are dropped too so
/// the column default applies.
pub fn bind_record(schema: &SchemaDescriptor, mut raw: GenericRecord) -> Result<GenericRecord, BindingError> {
    let mut bound = GenericRecord::new();
    for field in schema.fields() {
        let Some(value) = raw.remove(field.name()) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        bound.insert(field.name(), coerce(field.kind(), value, field.name())?);
    }
    Ok(bound)
}

// =============================================================================
// Unit Tests
// =============================================================================
