//! SQLite-backed [`TablesClient`].
//!
//! # Intention
//!
//! - Provide a local, self-contained implementation of the wrapped client so
//!   the typed accessor can run without a remote server.
//! - Keep the wrapped client's observable behavior: status codes, `unique()`
//!   ids, metadata fields, selection-driven projection of relationships.
//!
//! # Architectural Boundaries
//!
//! - Only storage code belongs here; payload and selector rules are shared
//!   with the accessor.
//! - Every call runs in its own transaction on a single connection.

mod plan;
mod store;

use crate::client::TablesClient;
use crate::error::{Result, TablesError};
use crate::payload;
use crate::projection::{Projector, RelationLoad, RowResolver};
use crate::query::Query;
use crate::row::{
    Ack, ColumnList, Document, IndexList, Row, RowList, TableInfo, TableList, TableSpec, ID_UNIQUE,
};
use crate::schema::{
    is_meta_key, ColumnDefinition, DataType, IndexDefinition, IndexType, RelationMutate,
    RelationSide, Schema, TableDefinition,
};
use crate::selector::Selection;
use async_trait::async_trait;
use futures::lock::Mutex;
use log::{debug, info, warn};
use plan::Plan;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default page size of list endpoints without a limit query.
pub const DEFAULT_LIST_LIMIT: usize = 25;

/// SQLite client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqliteConfig {
    /// Path to the SQLite database file, or `:memory:`
    pub db_path: String,
    /// Relationship rendering when a read has no selection
    #[serde(default)]
    pub relation_load: RelationLoad,
    /// Page size when a list call carries no limit
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

impl SqliteConfig {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            relation_load: RelationLoad::default(),
            default_limit: DEFAULT_LIST_LIMIT,
        }
    }

    /// A private in-memory database.
    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    pub fn with_relation_load(mut self, relation_load: RelationLoad) -> Self {
        self.relation_load = relation_load;
        self
    }

    pub fn with_default_limit(mut self, default_limit: usize) -> Self {
        self.default_limit = default_limit;
        self
    }
}

pub struct SqliteTables {
    config: SqliteConfig,
    connection: Mutex<Connection>,
}

impl SqliteTables {
    /// Open (or create) the database described by `config`.
    pub fn open(config: SqliteConfig) -> Result<Self> {
        info!("[SQLITE_TABLES] opening database at path: {}", config.db_path);
        let connection = Connection::open(&config.db_path)?;
        store::initialize_schema(&connection)?;
        Ok(Self {
            config,
            connection: Mutex::new(connection),
        })
    }

    /// Run `operation` in one transaction against `database_id`.
    async fn run<T>(
        &self,
        database_id: &str,
        operation: &str,
        f: impl FnOnce(&Store<'_>) -> Result<T>,
    ) -> Result<T> {
        debug!("[SQLITE_TABLES] {operation} database={database_id}");
        let mut conn = self.connection.lock().await;
        let outcome = (|| -> Result<T> {
            let tx = conn.transaction()?;
            let value = {
                let store = Store::open(&tx, database_id, &self.config)?;
                f(&store)?
            };
            tx.commit()?;
            Ok(value)
        })();
        outcome.map_err(|err| reject(operation, err))
    }
}

/// Translate local failures into the status-coded errors the wrapped client raises.
fn reject(operation: &str, err: TablesError) -> TablesError {
    let message = err.to_string();
    let err = match err {
        TablesError::Api { .. } => err,
        TablesError::InvalidPayload { .. } | TablesError::InvalidReference { .. } => {
            TablesError::bad_request("row_invalid_structure", message)
        }
        TablesError::InvalidSelector { .. } | TablesError::InvalidQuery(_) => {
            TablesError::bad_request("general_query_invalid", message)
        }
        TablesError::UnknownTable(_) => TablesError::not_found("table_not_found", message),
        TablesError::UnknownColumn { .. } => TablesError::not_found("column_not_found", message),
        TablesError::NotNumeric { .. } => TablesError::bad_request("column_type_invalid", message),
        TablesError::SchemaFile { .. }
        | TablesError::Serialization(_)
        | TablesError::Storage(_) => TablesError::api(500, "general_server_error", message),
    };
    warn!("[SQLITE_TABLES] {operation} failed: {err}");
    err
}

fn row_not_found(row_id: &str) -> TablesError {
    TablesError::not_found(
        "row_not_found",
        format!("Row with the requested ID `{row_id}` could not be found."),
    )
}

fn table_not_found(table_id: &str) -> TablesError {
    TablesError::not_found(
        "table_not_found",
        format!("Table with the requested ID `{table_id}` could not be found."),
    )
}

fn column_not_found(table_id: &str, key: &str) -> TablesError {
    TablesError::not_found(
        "column_not_found",
        format!("Column `{key}` of table `{table_id}` could not be found."),
    )
}

fn take_string(data: &mut Document, key: &str) -> Option<String> {
    data.remove(key).and_then(|value| value.as_str().map(str::to_string))
}

fn take_permissions(data: &mut Document) -> Option<Vec<String>> {
    data.remove("$permissions").and_then(|value| serde_json::from_value(value).ok())
}

/// Split a payload into stored scalars (defaults filled in) and relationship
/// writes. With `unlink_missing` an omitted relationship clears its links.
fn split_columns(
    table: &TableDefinition,
    mut data: Document,
    unlink_missing: bool,
) -> (Document, Vec<(ColumnDefinition, Value)>) {
    let mut scalars = Document::new();
    let mut relations = Vec::new();
    for column in &table.columns {
        let value = data.remove(&column.key);
        match (column.relationship(), value) {
            (Some(_), Some(value)) => relations.push((column.clone(), value)),
            (Some(_), None) if unlink_missing => relations.push((column.clone(), Value::Null)),
            (Some(_), None) => {}
            (None, value) => {
                let value = value
                    .or_else(|| column.default.clone())
                    .unwrap_or(Value::Null);
                scalars.insert(column.key.clone(), value);
            }
        }
    }
    (scalars, relations)
}

fn to_values<T: Serialize>(items: Vec<T>) -> Result<Vec<(Value, T)>> {
    items
        .into_iter()
        .map(|item| Ok((serde_json::to_value(&item)?, item)))
        .collect()
}

/// One transaction's view of a database.
struct Store<'c> {
    conn: &'c Connection,
    database_id: &'c str,
    config: &'c SqliteConfig,
    schema: Schema,
}

impl RowResolver for Store<'_> {
    fn related_rows(
        &self,
        table_id: &str,
        column: &ColumnDefinition,
        row_id: &str,
    ) -> Result<Vec<Row>> {
        let Some(relationship) = column.relationship() else {
            return Ok(Vec::new());
        };
        let mut rows = Vec::new();
        for id in store::linked_ids(self.conn, self.database_id, table_id, column, row_id)? {
            if let Some(row) = self.find_row(&relationship.related_table, &id)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

impl<'c> Store<'c> {
    fn open(conn: &'c Connection, database_id: &'c str, config: &'c SqliteConfig) -> Result<Self> {
        let schema = store::load_schema(conn, database_id)?;
        Ok(Self {
            conn,
            database_id,
            config,
            schema,
        })
    }

    fn table(&self, table_id: &str) -> Result<&TableDefinition> {
        self.schema.table(table_id).ok_or_else(|| table_not_found(table_id))
    }

    fn find_row(&self, table_id: &str, row_id: &str) -> Result<Option<Row>> {
        store::load_row(self.conn, self.database_id, table_id, row_id)
    }

    fn require_row(&self, table_id: &str, row_id: &str) -> Result<Row> {
        self.find_row(table_id, row_id)?.ok_or_else(|| row_not_found(row_id))
    }

    /// Filter, order and page `items` through their JSON form.
    fn page<T: Serialize>(&self, plan: &Plan, items: Vec<T>) -> Result<(u64, Vec<T>)> {
        let (total, page) = plan.apply(
            to_values(items)?,
            self.config.default_limit,
            |entry| &entry.0,
        )?;
        Ok((total, page.into_iter().map(|(_, item)| item).collect()))
    }

    fn selection(&self, table_id: &str, plan: &Plan) -> Result<Option<Selection>> {
        if !plan.has_selection() {
            return Ok(None);
        }
        Selection::parse(&self.schema, table_id, &plan.selectors).map(Some)
    }

    fn project(&self, table_id: &str, row: &Row, selection: Option<&Selection>) -> Result<Row> {
        Projector::new(&self.schema, self, self.config.relation_load)
            .project(table_id, row, selection)
    }

    // -- rows ---------------------------------------------------------------

    fn list_rows(&self, table_id: &str, queries: &[Query]) -> Result<RowList> {
        self.table(table_id)?;
        let plan = Plan::from_queries(queries)?;
        let selection = self.selection(table_id, &plan)?;
        let rows = self.candidate_rows(table_id, &plan)?;
        let (total, page) = self.page(&plan, rows)?;
        let rows = page
            .iter()
            .map(|row| self.project(table_id, row, selection.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(RowList { total, rows })
    }

    fn get_row(&self, table_id: &str, row_id: &str, queries: &[Query]) -> Result<Row> {
        self.table(table_id)?;
        let plan = Plan::from_queries(queries)?;
        plan.select_only()?;
        let selection = self.selection(table_id, &plan)?;
        let row = self.require_row(table_id, row_id)?;
        self.project(table_id, &row, selection.as_ref())
    }

    /// Rows the plan may keep: an `$id` filter is answered by SQLite.
    fn candidate_rows(&self, table_id: &str, plan: &Plan) -> Result<Vec<Row>> {
        match plan.id_filter() {
            Some(ids) => store::load_rows_by_id(self.conn, self.database_id, table_id, &ids),
            None => store::load_rows(self.conn, self.database_id, table_id),
        }
    }

    /// Stored rows matching the filters of `queries`, for bulk writes.
    fn matching_rows(&self, table_id: &str, queries: &[Query]) -> Result<Vec<Row>> {
        self.table(table_id)?;
        let plan = Plan::from_queries(queries)?;
        let rows = self.candidate_rows(table_id, &plan)?;
        let (_, page) = plan.apply(to_values(rows)?, usize::MAX, |entry| &entry.0)?;
        Ok(page.into_iter().map(|(_, row)| row).collect())
    }

    fn create_row(
        &self,
        table_id: &str,
        row_id: &str,
        data: Document,
        permissions: Option<Vec<String>>,
    ) -> Result<Row> {
        self.table(table_id)?;
        payload::check_create(&self.schema, table_id, &data)?;
        self.insert(table_id, row_id, data, permissions)
    }

    fn insert(
        &self,
        table_id: &str,
        row_id: &str,
        mut data: Document,
        permissions: Option<Vec<String>>,
    ) -> Result<Row> {
        let table = self.table(table_id)?;
        let id = store::resolve_id("row", row_id)?;
        if self.find_row(table_id, &id)?.is_some() {
            return Err(TablesError::conflict(
                "row_already_exists",
                format!("Row with the requested ID `{id}` already exists."),
            ));
        }

        let now = store::now();
        let created_at = take_string(&mut data, "$createdAt").unwrap_or_else(|| now.clone());
        let updated_at = take_string(&mut data, "$updatedAt").unwrap_or(now);
        let nested_permissions = take_permissions(&mut data);
        data.remove("$id");

        let (scalars, relations) = split_columns(table, data, false);

        let mut row = Row {
            id,
            sequence: None,
            table_id: table_id.to_string(),
            database_id: self.database_id.to_string(),
            created_at,
            updated_at,
            permissions: permissions.or(nested_permissions).unwrap_or_default(),
            data: scalars,
        };
        self.check_unique(table, &row)?;
        row.sequence = Some(store::insert_row(self.conn, &row)?);
        self.write_relations(table_id, &row.id, relations)?;
        debug!("[SQLITE_TABLES] created row {} in {}", row.id, table_id);
        Ok(row)
    }

    fn update_row(
        &self,
        table_id: &str,
        row_id: &str,
        data: Document,
        permissions: Option<Vec<String>>,
    ) -> Result<Row> {
        self.table(table_id)?;
        payload::check_update(&self.schema, table_id, &data)?;
        self.apply_update(table_id, row_id, data, permissions)
    }

    fn apply_update(
        &self,
        table_id: &str,
        row_id: &str,
        mut data: Document,
        permissions: Option<Vec<String>>,
    ) -> Result<Row> {
        let table = self.table(table_id)?;
        let mut row = self.require_row(table_id, row_id)?;

        if let Some(created_at) = take_string(&mut data, "$createdAt") {
            row.created_at = created_at;
        }
        row.updated_at = take_string(&mut data, "$updatedAt").unwrap_or_else(store::now);
        let nested_permissions = take_permissions(&mut data);
        if let Some(permissions) = permissions.or(nested_permissions) {
            row.permissions = permissions;
        }

        let mut relations = Vec::new();
        for (key, value) in data {
            match table.column(&key) {
                Some(column) if column.relationship().is_some() => {
                    relations.push((column.clone(), value))
                }
                Some(_) => {
                    row.data.insert(key, value);
                }
                None => {}
            }
        }

        self.check_unique(table, &row)?;
        store::save_row(self.conn, &row)?;
        self.write_relations(table_id, &row.id, relations)?;
        Ok(row)
    }

    /// Insert the row, or replace every column of the existing one.
    fn upsert_row(
        &self,
        table_id: &str,
        row_id: &str,
        data: Option<Document>,
        permissions: Option<Vec<String>>,
    ) -> Result<Row> {
        self.table(table_id)?;
        let exists = self.find_row(table_id, row_id)?.is_some();
        match (exists, data) {
            (true, Some(data)) => {
                payload::check_create(&self.schema, table_id, &data)?;
                self.replace(table_id, row_id, data, permissions)
            }
            (true, None) => self.apply_update(table_id, row_id, Document::new(), permissions),
            (false, data) => {
                self.create_row(table_id, row_id, data.unwrap_or_default(), permissions)
            }
        }
    }

    /// Rebuild an existing row from a creation payload. Omitted columns fall
    /// back to their default or null and omitted relationships are unlinked.
    fn replace(
        &self,
        table_id: &str,
        row_id: &str,
        mut data: Document,
        permissions: Option<Vec<String>>,
    ) -> Result<Row> {
        let table = self.table(table_id)?;
        let existing = self.require_row(table_id, row_id)?;

        let created_at = take_string(&mut data, "$createdAt").unwrap_or(existing.created_at);
        let updated_at = take_string(&mut data, "$updatedAt").unwrap_or_else(store::now);
        let nested_permissions = take_permissions(&mut data);
        data.remove("$id");
        let (scalars, relations) = split_columns(table, data, true);

        let row = Row {
            id: existing.id,
            sequence: existing.sequence,
            table_id: table_id.to_string(),
            database_id: self.database_id.to_string(),
            created_at,
            updated_at,
            permissions: permissions
                .or(nested_permissions)
                .unwrap_or(existing.permissions),
            data: scalars,
        };
        self.check_unique(table, &row)?;
        store::save_row(self.conn, &row)?;
        self.write_relations(table_id, &row.id, relations)?;
        debug!("[SQLITE_TABLES] replaced row {} in {}", row.id, table_id);
        Ok(row)
    }

    fn create_rows(&self, table_id: &str, rows: Vec<Document>) -> Result<Vec<Row>> {
        self.table(table_id)?;
        payload::check_bulk(&self.schema, table_id, &rows, false)?;
        rows.into_iter()
            .map(|mut data| {
                let row_id = take_string(&mut data, "$id").unwrap_or_else(|| ID_UNIQUE.to_string());
                self.insert(table_id, &row_id, data, None)
            })
            .collect()
    }

    fn upsert_rows(&self, table_id: &str, rows: Vec<Document>) -> Result<Vec<Row>> {
        self.table(table_id)?;
        payload::check_bulk(&self.schema, table_id, &rows, true)?;
        rows.into_iter()
            .map(|mut data| {
                let row_id = take_string(&mut data, "$id").unwrap_or_default();
                if self.find_row(table_id, &row_id)?.is_some() {
                    self.replace(table_id, &row_id, data, None)
                } else {
                    self.insert(table_id, &row_id, data, None)
                }
            })
            .collect()
    }

    fn update_rows(&self, table_id: &str, data: Document, queries: &[Query]) -> Result<Vec<Row>> {
        payload::check_update(&self.schema, table_id, &data)?;
        self.matching_rows(table_id, queries)?
            .into_iter()
            .map(|row| self.apply_update(table_id, &row.id, data.clone(), None))
            .collect()
    }

    /// Write the links of relationship columns, creating or updating nested rows.
    fn write_relations(
        &self,
        table_id: &str,
        row_id: &str,
        relations: Vec<(ColumnDefinition, Value)>,
    ) -> Result<()> {
        for (column, value) in relations {
            let Some(relationship) = column.relationship() else {
                continue;
            };
            let items = match value {
                Value::Null => Vec::new(),
                Value::Array(items) => items,
                other => vec![other],
            };
            let mut ids = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(id) => {
                        if self.find_row(&relationship.related_table, &id)?.is_none() {
                            return Err(row_not_found(&id));
                        }
                        ids.push(id);
                    }
                    Value::Object(mut nested) => {
                        let related = relationship.related_table.as_str();
                        let nested_id = take_string(&mut nested, "$id")
                            .unwrap_or_else(|| ID_UNIQUE.to_string());
                        let exists = nested_id != ID_UNIQUE
                            && self.find_row(related, &nested_id)?.is_some();
                        let nested_row = if exists {
                            self.apply_update(related, &nested_id, nested, None)?
                        } else {
                            self.insert(related, &nested_id, nested, None)?
                        };
                        ids.push(nested_row.id);
                    }
                    other => {
                        return Err(TablesError::InvalidReference {
                            column: column.key.clone(),
                            reason: format!("expected a row id or a nested row, got {other}"),
                        })
                    }
                }
            }
            store::set_links(self.conn, self.database_id, table_id, &column, row_id, &ids)?;
        }
        Ok(())
    }

    /// Reject a row colliding with another row on a unique index.
    fn check_unique(&self, table: &TableDefinition, row: &Row) -> Result<()> {
        let unique = table
            .indexes
            .iter()
            .filter(|index| index.index_type == IndexType::Unique);
        for index in unique {
            let key = index
                .columns
                .iter()
                .map(|column| (column.as_str(), row.data.get(column).unwrap_or(&Value::Null)))
                .collect::<Vec<_>>();
            if key.iter().all(|(_, value)| value.is_null()) {
                continue;
            }
            if store::has_duplicate(self.conn, self.database_id, &table.id, &row.id, &key)? {
                return Err(TablesError::conflict(
                    "row_already_exists",
                    format!(
                        "A row with the same `{}` values already exists.",
                        index.columns.join(", ")
                    ),
                ));
            }
        }
        Ok(())
    }

    fn delete_row(&self, table_id: &str, row_id: &str) -> Result<()> {
        let table = self.table(table_id)?;
        self.require_row(table_id, row_id)?;

        for column in table.relationship_columns() {
            let Some(relationship) = column.relationship() else {
                continue;
            };
            let linked = store::linked_ids(self.conn, self.database_id, table_id, column, row_id)?;
            if linked.is_empty() {
                continue;
            }
            let from_parent = relationship.side == RelationSide::Parent;
            if from_parent && relationship.on_delete == RelationMutate::Restrict {
                return Err(TablesError::bad_request(
                    "row_delete_restricted",
                    format!("Row `{row_id}` is still referenced through `{}`.", column.key),
                ));
            }
            store::set_links(self.conn, self.database_id, table_id, column, row_id, &[])?;
            if from_parent && relationship.on_delete == RelationMutate::Cascade {
                for id in linked {
                    if self.find_row(&relationship.related_table, &id)?.is_some() {
                        self.delete_row(&relationship.related_table, &id)?;
                    }
                }
            }
        }

        store::remove_row(self.conn, self.database_id, table_id, row_id)?;
        debug!("[SQLITE_TABLES] deleted row {row_id} from {table_id}");
        Ok(())
    }

    fn delete_rows(&self, table_id: &str, queries: &[Query]) -> Result<Vec<Row>> {
        let rows = self.matching_rows(table_id, queries)?;
        let mut deleted = Vec::with_capacity(rows.len());
        for row in rows {
            // A cascade from an earlier row may have removed this one already.
            if self.find_row(table_id, &row.id)?.is_none() {
                continue;
            }
            deleted.push(self.project(table_id, &row, None)?);
            self.delete_row(table_id, &row.id)?;
        }
        Ok(deleted)
    }

    /// Add `sign * value` (default 1) to a numeric column, clamped to `bound`.
    fn adjust_column(
        &self,
        table_id: &str,
        row_id: &str,
        key: &str,
        value: Option<f64>,
        bound: Option<f64>,
        sign: f64,
    ) -> Result<Row> {
        let column = self
            .table(table_id)?
            .column(key)
            .ok_or_else(|| column_not_found(table_id, key))?;
        if !column.is_numeric() {
            return Err(TablesError::NotNumeric {
                table: table_id.to_string(),
                column: key.to_string(),
            });
        }
        let delta = value.unwrap_or(1.0);
        if !delta.is_finite() || delta < 0.0 {
            return Err(TablesError::bad_request(
                "general_argument_invalid",
                format!("Invalid `value` param: {delta} must be a non-negative number"),
            ));
        }

        let mut row = self.require_row(table_id, row_id)?;
        let current = row.data.get(key).and_then(Value::as_f64).unwrap_or(0.0);
        let mut next = current + sign * delta;
        // A bound already passed leaves the value where it is.
        if let Some(bound) = bound {
            next = if sign > 0.0 {
                next.min(bound.max(current))
            } else {
                next.max(bound.min(current))
            };
        }
        let stored = match column.data_type {
            DataType::Integer if next.fract() == 0.0 => Value::from(next as i64),
            DataType::Integer => {
                return Err(TablesError::bad_request(
                    "general_argument_invalid",
                    format!("`{key}` is an integer column, got {next}"),
                ))
            }
            _ => serde_json::Number::from_f64(next)
                .map(Value::Number)
                .ok_or_else(|| {
                    TablesError::bad_request(
                        "general_argument_invalid",
                        format!("`{key}` cannot hold {next}"),
                    )
                })?,
        };
        row.data.insert(key.to_string(), stored);
        row.updated_at = store::now();
        store::save_row(self.conn, &row)?;
        Ok(row)
    }

    // -- tables ---------------------------------------------------------------

    fn table_info(&self, table_id: &str) -> Result<TableInfo> {
        store::table_info(self.conn, self.database_id, table_id)?
            .ok_or_else(|| table_not_found(table_id))
    }

    fn list_tables(&self, queries: &[Query]) -> Result<TableList> {
        let plan = Plan::from_queries(queries)?;
        let tables = store::table_ids(self.conn, self.database_id)?
            .iter()
            .map(|table_id| self.table_info(table_id))
            .collect::<Result<Vec<_>>>()?;
        let (total, tables) = self.page(&plan, tables)?;
        Ok(TableList { total, tables })
    }

    fn create_table(&self, spec: &TableSpec) -> Result<TableInfo> {
        let table_id = store::resolve_id("table", &spec.table_id)?;
        if self.schema.table(&table_id).is_some() {
            return Err(TablesError::conflict(
                "table_already_exists",
                format!("Table with the requested ID `{table_id}` already exists."),
            ));
        }
        let spec = TableSpec {
            table_id,
            ..spec.clone()
        };
        store::insert_table(self.conn, self.database_id, &spec)?;
        info!("[SQLITE_TABLES] created table {}", spec.table_id);
        self.table_info(&spec.table_id)
    }

    fn update_table(&self, spec: &TableSpec) -> Result<TableInfo> {
        self.table(&spec.table_id)?;
        store::update_table(self.conn, self.database_id, spec)?;
        self.table_info(&spec.table_id)
    }

    fn delete_table(&self, table_id: &str) -> Result<()> {
        let table = self.table(table_id)?;
        for column in table.relationship_columns() {
            self.drop_relationship(table_id, column)?;
        }
        store::remove_table(self.conn, self.database_id, table_id)?;
        info!("[SQLITE_TABLES] deleted table {table_id}");
        Ok(())
    }

    // -- columns --------------------------------------------------------------

    fn list_columns(&self, table_id: &str, queries: &[Query]) -> Result<ColumnList> {
        let table = self.table(table_id)?;
        let plan = Plan::from_queries(queries)?;
        let (total, columns) = self.page(&plan, table.columns.clone())?;
        Ok(ColumnList { total, columns })
    }

    fn get_column(&self, table_id: &str, key: &str) -> Result<ColumnDefinition> {
        self.table(table_id)?
            .column(key)
            .cloned()
            .ok_or_else(|| column_not_found(table_id, key))
    }

    fn create_column(&self, table_id: &str, column: &ColumnDefinition) -> Result<ColumnDefinition> {
        let table = self.table(table_id)?;
        if is_meta_key(&column.key) || column.key.is_empty() {
            return Err(TablesError::bad_request(
                "column_invalid_key",
                format!("`{}` is not a valid column key.", column.key),
            ));
        }
        if table.column(&column.key).is_some() {
            return Err(TablesError::conflict(
                "column_already_exists",
                format!("Column `{}` already exists in table `{table_id}`.", column.key),
            ));
        }

        if let Some(relationship) = column.relationship() {
            let related = self.table(&relationship.related_table)?;
            if let Some(twin) = relationship.twin(table_id, &column.key) {
                if related.column(&twin.key).is_some() {
                    return Err(TablesError::conflict(
                        "column_already_exists",
                        format!(
                            "Column `{}` already exists in table `{}`.",
                            twin.key, relationship.related_table
                        ),
                    ));
                }
                let related = relationship.related_table.as_str();
                store::insert_column(self.conn, self.database_id, related, &twin)?;
            }
        }

        store::insert_column(self.conn, self.database_id, table_id, column)?;
        debug!("[SQLITE_TABLES] created column {} on {}", column.key, table_id);
        Ok(column.clone())
    }

    fn update_column(&self, table_id: &str, column: &ColumnDefinition) -> Result<ColumnDefinition> {
        let current = self.get_column(table_id, &column.key)?;
        if std::mem::discriminant(&current.data_type) != std::mem::discriminant(&column.data_type)
            || current.relationship().map(|r| (&r.related_table, r.kind, r.side))
                != column.relationship().map(|r| (&r.related_table, r.kind, r.side))
        {
            return Err(TablesError::bad_request(
                "column_type_invalid",
                format!(
                    "Column `{}` cannot change from {} to {}.",
                    column.key,
                    current.data_type.name(),
                    column.data_type.name()
                ),
            ));
        }
        store::replace_column(self.conn, self.database_id, table_id, column)?;
        Ok(column.clone())
    }

    fn delete_column(&self, table_id: &str, key: &str) -> Result<()> {
        let column = self.get_column(table_id, key)?;
        if column.relationship().is_some() {
            self.drop_relationship(table_id, &column)?;
        }
        store::remove_column(self.conn, self.database_id, table_id, key)?;
        Ok(())
    }

    /// Drop the links of a relationship column and its mirrored column.
    fn drop_relationship(&self, table_id: &str, column: &ColumnDefinition) -> Result<()> {
        store::drop_links(self.conn, self.database_id, table_id, column)?;
        if let Some(relationship) = column.relationship() {
            if let Some(twin_key) = relationship.two_way_key.as_deref() {
                let related = relationship.related_table.as_str();
                store::remove_column(self.conn, self.database_id, related, twin_key)?;
            }
        }
        Ok(())
    }

    // -- indexes --------------------------------------------------------------

    fn list_indexes(&self, table_id: &str, queries: &[Query]) -> Result<IndexList> {
        let table = self.table(table_id)?;
        let plan = Plan::from_queries(queries)?;
        let (total, indexes) = self.page(&plan, table.indexes.clone())?;
        Ok(IndexList { total, indexes })
    }

    fn get_index(&self, table_id: &str, key: &str) -> Result<IndexDefinition> {
        self.table(table_id)?
            .indexes
            .iter()
            .find(|index| index.key == key)
            .cloned()
            .ok_or_else(|| {
                TablesError::not_found(
                    "index_not_found",
                    format!("Index `{key}` of table `{table_id}` could not be found."),
                )
            })
    }

    fn create_index(&self, table_id: &str, index: &IndexDefinition) -> Result<IndexDefinition> {
        let table = self.table(table_id)?;
        if table.indexes.iter().any(|existing| existing.key == index.key) {
            return Err(TablesError::conflict(
                "index_already_exists",
                format!("Index `{}` already exists in table `{table_id}`.", index.key),
            ));
        }
        if let Some(missing) = index.columns.iter().find(|key| table.column(key).is_none()) {
            return Err(TablesError::bad_request(
                "index_invalid",
                format!("Index `{}` refers to unknown column `{missing}`.", index.key),
            ));
        }
        store::insert_index(self.conn, self.database_id, table_id, index)?;
        Ok(index.clone())
    }

    fn delete_index(&self, table_id: &str, key: &str) -> Result<()> {
        self.get_index(table_id, key)?;
        store::remove_index(self.conn, self.database_id, table_id, key)
    }
}

fn row_list(rows: Vec<Row>) -> RowList {
    RowList {
        total: rows.len() as u64,
        rows,
    }
}

#[async_trait]
impl TablesClient for SqliteTables {
    async fn list_tables(&self, database_id: &str, queries: &[Query]) -> Result<TableList> {
        self.run(database_id, "list_tables", |store| store.list_tables(queries))
            .await
    }

    async fn create_table(&self, database_id: &str, table: &TableSpec) -> Result<TableInfo> {
        self.run(database_id, "create_table", |store| store.create_table(table))
            .await
    }

    async fn get_table(&self, database_id: &str, table_id: &str) -> Result<TableInfo> {
        self.run(database_id, "get_table", |store| store.table_info(table_id))
            .await
    }

    async fn update_table(&self, database_id: &str, table: &TableSpec) -> Result<TableInfo> {
        self.run(database_id, "update_table", |store| store.update_table(table))
            .await
    }

    async fn delete_table(&self, database_id: &str, table_id: &str) -> Result<Ack> {
        self.run(database_id, "delete_table", |store| store.delete_table(table_id))
            .await?;
        Ok(Ack::default())
    }

    async fn list_columns(
        &self,
        database_id: &str,
        table_id: &str,
        queries: &[Query],
    ) -> Result<ColumnList> {
        self.run(database_id, "list_columns", |store| store.list_columns(table_id, queries))
            .await
    }

    async fn create_column(
        &self,
        database_id: &str,
        table_id: &str,
        column: &ColumnDefinition,
    ) -> Result<ColumnDefinition> {
        self.run(database_id, "create_column", |store| store.create_column(table_id, column))
            .await
    }

    async fn update_column(
        &self,
        database_id: &str,
        table_id: &str,
        column: &ColumnDefinition,
    ) -> Result<ColumnDefinition> {
        self.run(database_id, "update_column", |store| store.update_column(table_id, column))
            .await
    }

    async fn get_column(
        &self,
        database_id: &str,
        table_id: &str,
        key: &str,
    ) -> Result<ColumnDefinition> {
        self.run(database_id, "get_column", |store| store.get_column(table_id, key))
            .await
    }

    async fn delete_column(&self, database_id: &str, table_id: &str, key: &str) -> Result<Ack> {
        self.run(database_id, "delete_column", |store| store.delete_column(table_id, key))
            .await?;
        Ok(Ack::default())
    }

    async fn list_indexes(
        &self,
        database_id: &str,
        table_id: &str,
        queries: &[Query],
    ) -> Result<IndexList> {
        self.run(database_id, "list_indexes", |store| store.list_indexes(table_id, queries))
            .await
    }

    async fn create_index(
        &self,
        database_id: &str,
        table_id: &str,
        index: &IndexDefinition,
    ) -> Result<IndexDefinition> {
        self.run(database_id, "create_index", |store| store.create_index(table_id, index))
            .await
    }

    async fn get_index(
        &self,
        database_id: &str,
        table_id: &str,
        key: &str,
    ) -> Result<IndexDefinition> {
        self.run(database_id, "get_index", |store| store.get_index(table_id, key))
            .await
    }

    async fn delete_index(&self, database_id: &str, table_id: &str, key: &str) -> Result<Ack> {
        self.run(database_id, "delete_index", |store| store.delete_index(table_id, key))
            .await?;
        Ok(Ack::default())
    }

    async fn list_rows(
        &self,
        database_id: &str,
        table_id: &str,
        queries: &[Query],
    ) -> Result<RowList> {
        self.run(database_id, "list_rows", |store| store.list_rows(table_id, queries))
            .await
    }

    async fn get_row(
        &self,
        database_id: &str,
        table_id: &str,
        row_id: &str,
        queries: &[Query],
    ) -> Result<Row> {
        self.run(database_id, "get_row", |store| store.get_row(table_id, row_id, queries))
            .await
    }

    async fn create_row(
        &self,
        database_id: &str,
        table_id: &str,
        row_id: &str,
        data: Document,
        permissions: Option<Vec<String>>,
    ) -> Result<Row> {
        self.run(database_id, "create_row", |store| {
            let row = store.create_row(table_id, row_id, data, permissions)?;
            store.project(table_id, &row, None)
        })
        .await
    }

    async fn create_rows(
        &self,
        database_id: &str,
        table_id: &str,
        rows: Vec<Document>,
    ) -> Result<RowList> {
        self.run(database_id, "create_rows", |store| {
            let rows = store.create_rows(table_id, rows)?;
            let rows = rows
                .iter()
                .map(|row| store.project(table_id, row, None))
                .collect::<Result<Vec<_>>>()?;
            Ok(row_list(rows))
        })
        .await
    }

    async fn upsert_row(
        &self,
        database_id: &str,
        table_id: &str,
        row_id: &str,
        data: Option<Document>,
        permissions: Option<Vec<String>>,
    ) -> Result<Row> {
        self.run(database_id, "upsert_row", |store| {
            let row = store.upsert_row(table_id, row_id, data, permissions)?;
            store.project(table_id, &row, None)
        })
        .await
    }

    async fn upsert_rows(
        &self,
        database_id: &str,
        table_id: &str,
        rows: Vec<Document>,
    ) -> Result<RowList> {
        self.run(database_id, "upsert_rows", |store| {
            let rows = store.upsert_rows(table_id, rows)?;
            let rows = rows
                .iter()
                .map(|row| store.project(table_id, row, None))
                .collect::<Result<Vec<_>>>()?;
            Ok(row_list(rows))
        })
        .await
    }

    async fn update_row(
        &self,
        database_id: &str,
        table_id: &str,
        row_id: &str,
        data: Document,
        permissions: Option<Vec<String>>,
    ) -> Result<Row> {
        self.run(database_id, "update_row", |store| {
            let row = store.update_row(table_id, row_id, data, permissions)?;
            store.project(table_id, &row, None)
        })
        .await
    }

    async fn update_rows(
        &self,
        database_id: &str,
        table_id: &str,
        data: Document,
        queries: &[Query],
    ) -> Result<RowList> {
        self.run(database_id, "update_rows", |store| {
            let rows = store.update_rows(table_id, data, queries)?;
            let rows = rows
                .iter()
                .map(|row| store.project(table_id, row, None))
                .collect::<Result<Vec<_>>>()?;
            Ok(row_list(rows))
        })
        .await
    }

    async fn delete_row(&self, database_id: &str, table_id: &str, row_id: &str) -> Result<Ack> {
        self.run(database_id, "delete_row", |store| store.delete_row(table_id, row_id))
            .await?;
        Ok(Ack::default())
    }

    async fn delete_rows(
        &self,
        database_id: &str,
        table_id: &str,
        queries: &[Query],
    ) -> Result<RowList> {
        self.run(database_id, "delete_rows", |store| {
            store.delete_rows(table_id, queries).map(row_list)
        })
        .await
    }

    async fn increment_row_column(
        &self,
        database_id: &str,
        table_id: &str,
        row_id: &str,
        column: &str,
        value: Option<f64>,
        max: Option<f64>,
    ) -> Result<Row> {
        self.run(database_id, "increment_row_column", |store| {
            let row = store.adjust_column(table_id, row_id, column, value, max, 1.0)?;
            store.project(table_id, &row, None)
        })
        .await
    }

    async fn decrement_row_column(
        &self,
        database_id: &str,
        table_id: &str,
        row_id: &str,
        column: &str,
        value: Option<f64>,
        min: Option<f64>,
    ) -> Result<Row> {
        self.run(database_id, "decrement_row_column", |store| {
            let row = store.adjust_column(table_id, row_id, column, value, min, -1.0)?;
            store.project(table_id, &row, None)
        })
        .await
    }
}
