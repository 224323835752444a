//! Runtime projection of stored rows through a [`Selection`].
//!
//! Stored rows hold their scalar columns only; relationship columns are
//! resolved through a [`RowResolver`] while projecting.

use crate::error::Result;
use crate::row::{Document, Row};
use crate::schema::{ColumnDefinition, Schema};
use crate::selector::Selection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How relationship columns are rendered when no selection is given.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationLoad {
    /// Metadata-only rows.
    #[default]
    Stub,
    /// Related rows with their scalar columns.
    Expand,
}

/// Source of related rows.
pub trait RowResolver {
    /// Rows `row_id` of `table_id` is linked to through `column`, in link order.
    fn related_rows(
        &self,
        table_id: &str,
        column: &ColumnDefinition,
        row_id: &str,
    ) -> Result<Vec<Row>>;
}

pub struct Projector<'a, R> {
    schema: &'a Schema,
    resolver: &'a R,
    relation_load: RelationLoad,
}

impl<'a, R: RowResolver> Projector<'a, R> {
    pub fn new(schema: &'a Schema, resolver: &'a R, relation_load: RelationLoad) -> Self {
        Self {
            schema,
            resolver,
            relation_load,
        }
    }

    /// Project `row` of `table_id`. `None` selects the default shape.
    ///
    /// `$sequence` is kept by the default shape and by `*`; any other
    /// selection drops it unless `$sequence` is named.
    pub fn project(&self, table_id: &str, row: &Row, selection: Option<&Selection>) -> Result<Row> {
        let table = self.schema.require_table(table_id)?;
        let mut projected = row.stub();

        let selection = match selection {
            Some(selection) => selection,
            None => {
                for column in &table.columns {
                    let value = match column.relationship() {
                        Some(_) => {
                            let related = self.resolver.related_rows(table_id, column, &row.id)?;
                            let rendered = related
                                .iter()
                                .map(|related| match self.relation_load {
                                    RelationLoad::Stub => related.stub().into_value(),
                                    RelationLoad::Expand => related.clone().into_value(),
                                })
                                .collect::<Result<Vec<_>>>()?;
                            shape(column, rendered)
                        }
                        None => scalar(column, &row.data),
                    };
                    projected.data.insert(column.key.clone(), value);
                }
                return Ok(projected);
            }
        };

        if !selection.includes_sequence() {
            projected.sequence = None;
        }
        for column in &table.columns {
            let value = match (column.relationship(), selection.nested(&column.key)) {
                (Some(relationship), Some(nested)) => {
                    let related = self.resolver.related_rows(table_id, column, &row.id)?;
                    let rendered = related
                        .iter()
                        .map(|related| {
                            self.project(&relationship.related_table, related, Some(nested))?
                                .into_value()
                        })
                        .collect::<Result<Vec<_>>>()?;
                    shape(column, rendered)
                }
                _ if !selection.includes(&column.key) => continue,
                (Some(_), None) => {
                    let related = self.resolver.related_rows(table_id, column, &row.id)?;
                    let ids = related
                        .into_iter()
                        .map(|related| Value::String(related.id))
                        .collect();
                    shape(column, ids)
                }
                (None, _) => scalar(column, &row.data),
            };
            projected.data.insert(column.key.clone(), value);
        }
        Ok(projected)
    }
}

fn scalar(column: &ColumnDefinition, data: &Document) -> Value {
    data.get(&column.key)
        .cloned()
        .or_else(|| column.default.clone())
        .unwrap_or(Value::Null)
}

/// A list for to-many columns, a single value (or null) otherwise.
fn shape(column: &ColumnDefinition, values: Vec<Value>) -> Value {
    if column.is_many() {
        Value::Array(values)
    } else {
        values.into_iter().next().unwrap_or(Value::Null)
    }
}
