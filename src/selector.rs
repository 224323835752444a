//! Selection compiler.
//!
//! Selectors are strings such as `*`, `name` or `posts.title`. A list of them
//! is validated against the [`Schema`], merged into a [`Selection`] tree and
//! compiled into the single `select` clause the wrapped client consumes.

use crate::error::{Result, TablesError};
use crate::query::Query;
use crate::schema::{is_meta_key, Schema};
use std::collections::BTreeMap;

/// Selects every column at one level.
pub const SELECT_ALL: &str = "*";

/// Longest selector accepted, counted in dotted segments (`a.b.c`).
pub const MAX_SELECTOR_DEPTH: usize = 3;

/// Union of selectors for one table, merged recursively on relationship columns.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Selection {
    /// `*` was selected at this level.
    pub all: bool,
    /// Selected keys; `Some` holds the nested selection of a relationship column.
    pub fields: BTreeMap<String, Option<Selection>>,
}

impl Selection {
    /// Parse and validate `selectors` against `table_id` of `schema`.
    pub fn parse<S: AsRef<str>>(schema: &Schema, table_id: &str, selectors: &[S]) -> Result<Self> {
        schema.require_table(table_id)?;
        let mut selection = Self::default();
        for selector in selectors {
            let selector = selector.as_ref();
            let segments: Vec<&str> = selector.split('.').collect();
            if segments.len() > MAX_SELECTOR_DEPTH {
                return Err(invalid(
                    selector,
                    format!("nesting deeper than {MAX_SELECTOR_DEPTH} segments"),
                ));
            }
            selection.insert(schema, table_id, selector, &segments)?;
        }
        Ok(selection)
    }

    fn insert(
        &mut self,
        schema: &Schema,
        table_id: &str,
        selector: &str,
        segments: &[&str],
    ) -> Result<()> {
        let (head, rest) = match segments.split_first() {
            Some(split) => split,
            None => return Err(invalid(selector, "empty selector")),
        };

        if *head == SELECT_ALL || is_meta_key(head) {
            if !rest.is_empty() {
                return Err(invalid(selector, format!("`{head}` cannot be nested into")));
            }
            if *head == SELECT_ALL {
                self.all = true;
            } else {
                self.fields.entry(head.to_string()).or_insert(None);
            }
            return Ok(());
        }

        let column = schema.column(table_id, head).ok_or_else(|| {
            invalid(selector, format!("`{head}` is not a column of `{table_id}`"))
        })?;

        if rest.is_empty() {
            self.fields.entry(column.key.clone()).or_insert(None);
            return Ok(());
        }

        let relationship = column.relationship().ok_or_else(|| {
            invalid(selector, format!("`{head}` is not a relationship column"))
        })?;
        let nested = self
            .fields
            .entry(column.key.clone())
            .or_insert(None)
            .get_or_insert_with(Selection::default);
        nested.insert(schema, &relationship.related_table, selector, rest)
    }

    /// Union with `other`; nested selections on the same column are merged, not replaced.
    pub fn merge(&mut self, other: Selection) {
        self.all |= other.all;
        for (key, nested) in other.fields {
            let slot = self.fields.entry(key).or_insert(None);
            let Some(nested) = nested else { continue };
            if let Some(existing) = slot.as_mut() {
                existing.merge(nested);
            } else {
                *slot = Some(nested);
            }
        }
    }

    pub fn includes(&self, key: &str) -> bool {
        self.all || self.fields.contains_key(key)
    }

    /// Nested selection for a relationship column, if one was given.
    pub fn nested(&self, key: &str) -> Option<&Selection> {
        self.fields.get(key).and_then(Option::as_ref)
    }

    /// `$sequence` is only returned when asked for.
    pub fn includes_sequence(&self) -> bool {
        self.includes("$sequence")
    }
}

fn invalid(selector: &str, reason: impl Into<String>) -> TablesError {
    TablesError::InvalidSelector {
        selector: selector.to_string(),
        reason: reason.into(),
    }
}

/// The `select` clause for `selectors`, or `None` when there are none.
pub fn compile_select<S: AsRef<str>>(selectors: &[S]) -> Option<Query> {
    if selectors.is_empty() {
        return None;
    }
    Some(Query::select(selectors.iter().map(|s| s.as_ref().to_string())))
}

/// Caller queries with the compiled select clause in front.
pub fn with_select<S: AsRef<str>>(selectors: &[S], queries: Vec<Query>) -> Vec<Query> {
    match compile_select(selectors) {
        Some(select) => std::iter::once(select).chain(queries).collect(),
        None => queries,
    }
}
