//! # List Query Planning
//!
//! Turns untyped query-string parameters into a [`ListQuery`] that only
//! references fields the schema allows. Execution lives in tessera-db.
//!
//! ## Parameters
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  page=2              1-based page, invalid or < 1 ──► 1                │
//! │  page_size=50        default 10, invalid or < 1 ──► 10, max 10000      │
//! │  search=foo          LIKE %foo% OR'ed over searchable string fields    │
//! │  order=-price        field, '-' prefix = descending, default -id       │
//! │  name=foo            equality on a Queryable field                     │
//! │  name_contains=fo    substring on a Queryable field                    │
//! │  anything else       ignored                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Repeated keys keep their first value.

use std::collections::HashSet;

use serde::Serialize;

use crate::binder::coerce;
use crate::schema::{Capability, SchemaDescriptor};
use crate::value::Value;

/// Page size when none (or garbage) is supplied.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Upper bound on page size.
pub const MAX_PAGE_SIZE: u32 = 10_000;

const CONTAINS_SUFFIX: &str = "_contains";

// =============================================================================
// Plan Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// `column = value`
    Eq,
    /// `column LIKE %value%`
    Contains,
}

/// A single predicate on a Queryable field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub field: String,
    pub direction: Direction,
}

/// Free-text search over the listed columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Search {
    pub term: String,
    pub fields: Vec<String>,
}

/// A validated list request.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub page: u32,
    pub page_size: u32,
    pub search: Option<Search>,
    pub filters: Vec<Filter>,
    /// `None` when the requested order was not allowed.
    pub order: Option<Order>,
}

impl ListQuery {
    /// Plans a list request from decoded key/value pairs.
    pub fn plan<I, K, V>(schema: &SchemaDescriptor, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut page = None;
        let mut page_size = None;
        let mut search = None;
        let mut order = None;
        let mut filters = Vec::new();

        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            if !seen.insert(key.to_string()) {
                continue;
            }

            match key {
                "page" => page = Some(value.to_string()),
                "page_size" => page_size = Some(value.to_string()),
                "search" => search = Some(value.to_string()),
                "order" => order = Some(value.to_string()),
                _ => {
                    if let Some(filter) = plan_filter(schema, key, value) {
                        filters.push(filter);
                    }
                }
            }
        }

        let default_order = format!("-{}", schema.identifier());

        ListQuery {
            page: parse_positive(page.as_deref()).unwrap_or(1),
            page_size: parse_positive(page_size.as_deref())
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .min(MAX_PAGE_SIZE),
            search: plan_search(schema, search.as_deref()),
            filters,
            order: plan_order(schema, order.as_deref().unwrap_or(&default_order)),
        }
    }

    /// Plans a list request from a raw (still encoded) query string.
    pub fn from_query_string(schema: &SchemaDescriptor, query: &str) -> Self {
        Self::plan(schema, url::form_urlencoded::parse(query.as_bytes()))
    }

    /// True when the total cannot come from the counter cache.
    pub fn is_filtered(&self) -> bool {
        self.search.is_some() || !self.filters.is_empty()
    }

    /// Row offset of the requested page.
    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }
}

fn parse_positive(raw: Option<&str>) -> Option<u32> {
    raw?.trim().parse::<u32>().ok().filter(|n| *n >= 1)
}

fn plan_filter(schema: &SchemaDescriptor, key: &str, value: &str) -> Option<Filter> {
    if let Some(field) = schema.field_with(key, Capability::Queryable) {
        // Fall back to the raw text when it does not coerce.
        let value = coerce(field.kind(), Value::from(value), key)
            .ok()
            .filter(|v| !matches!(v, Value::List(_) | Value::Object(_)))
            .unwrap_or_else(|| Value::from(value));
        return Some(Filter {
            field: key.to_string(),
            op: FilterOp::Eq,
            value,
        });
    }

    let base = key.strip_suffix(CONTAINS_SUFFIX)?;
    schema.field_with(base, Capability::Queryable)?;
    Some(Filter {
        field: base.to_string(),
        op: FilterOp::Contains,
        value: Value::from(value),
    })
}

fn plan_search(schema: &SchemaDescriptor, term: Option<&str>) -> Option<Search> {
    let term = term.filter(|t| !t.is_empty())?;
    let fields: Vec<String> = schema
        .searchable_fields()
        .map(|f| f.name().to_string())
        .collect();
    if fields.is_empty() {
        return None;
    }
    Some(Search {
        term: term.to_string(),
        fields,
    })
}

fn plan_order(schema: &SchemaDescriptor, raw: &str) -> Option<Order> {
    let raw = raw.trim();
    let (field, direction) = match raw.strip_prefix('-') {
        Some(field) => (field, Direction::Desc),
        None => (raw, Direction::Asc),
    };
    if field.is_empty() || !schema.is_orderable(field) {
        return None;
    }
    Some(Order {
        field: field.to_string(),
        direction,
    })
}

/// Builds a `LIKE` pattern matching `term` anywhere, escaping `%`, `_` and
/// `\` so they match literally. Use with `ESCAPE '\'`.
pub fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

// =============================================================================
// Page
// =============================================================================

/// One page of a list response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub data: Vec<T>,
}

// =============================================================================
// Unit Tests
// =============================================================================
