//! Reference populator.
//!
//! Replaces a column holding a row id (or a list of row ids) with the rows
//! those ids point at. The source rows can be any serializable shape and the
//! caller picks the populated output shape.

use crate::client::TablesClient;
use crate::error::{Result, TablesError};
use crate::query::Query;
use crate::row::Document;
use crate::typed::{GetRow, ListRows, TypedTables};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Lower bound of the limit sent with a batched id lookup.
pub const POPULATE_BATCH_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct PopulateRequest<S> {
    pub source: S,
    /// Column of the source holding the reference(s).
    pub column: String,
    /// Database and table the references point into.
    pub database_id: String,
    pub table_id: String,
    pub select: Vec<String>,
    /// Stands in for references with no matching row.
    pub default_value: Value,
}

pub type PopulateRow<S> = PopulateRequest<S>;
pub type PopulateRows<S> = PopulateRequest<Vec<S>>;

impl<S> PopulateRequest<S> {
    pub fn new(
        source: S,
        column: impl Into<String>,
        database_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            source,
            column: column.into(),
            database_id: database_id.into(),
            table_id: table_id.into(),
            select: Vec::new(),
            default_value: Value::Null,
        }
    }

    pub fn select<I, T>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.select = selectors.into_iter().map(Into::into).collect();
        self
    }

    pub fn default_value(mut self, default_value: impl Into<Value>) -> Self {
        self.default_value = default_value.into();
        self
    }
}

impl<C: TablesClient> TypedTables<C> {
    /// Populate `column` of one row.
    ///
    /// A list of ids is resolved with a single `list_rows` call and keeps its
    /// order and length; a single id is resolved with
    /// [`TypedTables::get_row_optional`]. Falsy values are left untouched.
    pub async fn populate_row<S, P>(&self, request: PopulateRow<S>) -> Result<P>
    where
        S: Serialize,
        P: DeserializeOwned,
    {
        let mut value = serde_json::to_value(&request.source)?;
        let object = as_object(&request.column, &mut value)?;
        let current = object.get(&request.column).cloned().unwrap_or(Value::Null);

        if !is_falsy(&current) {
            match &current {
                Value::Array(items) if items.is_empty() => {}
                Value::Array(items) => {
                    let ids = reference_ids(&request.column, items)?;
                    let found = self.fetch_by_ids(&request, &ids).await?;
                    let populated = ids
                        .iter()
                        .map(|id| {
                            found
                                .get(*id)
                                .cloned()
                                .unwrap_or_else(|| request.default_value.clone())
                        })
                        .collect();
                    object.insert(request.column.clone(), Value::Array(populated));
                }
                Value::String(id) => {
                    debug!(
                        "[POPULATE] get table={} row={} column={}",
                        request.table_id, id, request.column
                    );
                    let lookup = GetRow::new(&request.database_id, &request.table_id, id)
                        .select(request.select.iter().cloned());
                    let populated = match self.get_row_optional::<Document>(lookup).await? {
                        Some(row) => row.into_value()?,
                        None => request.default_value.clone(),
                    };
                    object.insert(request.column.clone(), populated);
                }
                other => {
                    return Err(TablesError::InvalidReference {
                        column: request.column.clone(),
                        reason: format!("expected a row id or a list of row ids, got {other}"),
                    })
                }
            }
        }

        Ok(serde_json::from_value(value)?)
    }

    /// Populate `column` across many rows with one batched lookup for the
    /// union of every referenced id.
    pub async fn populate_rows<S, P>(&self, request: PopulateRows<S>) -> Result<Vec<P>>
    where
        S: Serialize,
        P: DeserializeOwned,
    {
        if request.source.is_empty() {
            return Ok(Vec::new());
        }

        let mut values = request
            .source
            .iter()
            .map(serde_json::to_value)
            .collect::<serde_json::Result<Vec<_>>>()?;

        let mut seen = HashSet::new();
        let mut ids: Vec<String> = Vec::new();
        for value in &mut values {
            let object = as_object(&request.column, value)?;
            let references = match object.get(&request.column) {
                Some(current) if !is_falsy(current) => current,
                _ => continue,
            };
            let referenced = match references {
                Value::Array(items) => reference_ids(&request.column, items)?,
                Value::String(id) => vec![id.as_str()],
                other => {
                    return Err(TablesError::InvalidReference {
                        column: request.column.clone(),
                        reason: format!("expected a row id or a list of row ids, got {other}"),
                    })
                }
            };
            for id in referenced {
                if seen.insert(id.to_string()) {
                    ids.push(id.to_string());
                }
            }
        }

        let found = if ids.is_empty() {
            HashMap::new()
        } else {
            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            self.fetch_by_ids(&request, &ids).await?
        };

        let resolve = |id: &str| {
            found
                .get(id)
                .cloned()
                .unwrap_or_else(|| request.default_value.clone())
        };
        for value in &mut values {
            let object = as_object(&request.column, value)?;
            let populated = match object.get(&request.column) {
                Some(Value::Array(items)) => Value::Array(
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(&resolve)
                        .collect(),
                ),
                Some(Value::String(id)) if !id.is_empty() => resolve(id.as_str()),
                _ => continue,
            };
            object.insert(request.column.clone(), populated);
        }

        values
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(TablesError::from))
            .collect()
    }

    /// One `list_rows` call for `ids`, keyed by row id.
    async fn fetch_by_ids<S>(
        &self,
        request: &PopulateRequest<S>,
        ids: &[&str],
    ) -> Result<HashMap<String, Value>> {
        let limit = POPULATE_BATCH_LIMIT.max(ids.len());
        debug!(
            "[POPULATE] list table={} ids={} limit={} column={}",
            request.table_id,
            ids.len(),
            limit,
            request.column
        );
        let lookup = ListRows::new(&request.database_id, &request.table_id)
            .select(request.select.iter().cloned())
            .query(Query::equal("$id", ids.iter().copied()))
            .query(Query::limit(limit));
        let list = self.list_rows::<Document>(lookup).await?;

        let mut found = HashMap::with_capacity(list.rows.len());
        for row in list.rows {
            let id = row.id.clone();
            found.insert(id, row.into_value()?);
        }
        Ok(found)
    }
}

fn as_object<'a>(column: &str, value: &'a mut Value) -> Result<&'a mut Map<String, Value>> {
    value
        .as_object_mut()
        .ok_or_else(|| TablesError::InvalidReference {
            column: column.to_string(),
            reason: "source row must serialize to an object".to_string(),
        })
}

fn reference_ids<'a>(column: &str, items: &'a [Value]) -> Result<Vec<&'a str>> {
    items
        .iter()
        .map(|item| {
            item.as_str().ok_or_else(|| TablesError::InvalidReference {
                column: column.to_string(),
                reason: format!("expected a row id, got {item}"),
            })
        })
        .collect()
}

/// Values that count as "no reference".
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}
