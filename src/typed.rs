//! Typed row accessor.
//!
//! [`TypedTables`] wraps one [`TablesClient`] and a [`Schema`]. Every
//! operation checks the table id (and selectors, columns, payloads) against
//! the schema, delegates verbatim to the client and decodes the result into
//! the caller's chosen row shape.

use crate::client::TablesClient;
use crate::error::{Result, TablesError};
use crate::payload;
use crate::query::Query;
use crate::row::{
    Ack, ColumnList, Document, IndexList, Row, RowList, TableInfo, TableList, TableSpec,
};
use crate::schema::{ColumnDefinition, IndexDefinition, Schema};
use crate::selector::{with_select, Selection};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct ListRows {
    pub database_id: String,
    pub table_id: String,
    pub select: Vec<String>,
    pub queries: Vec<Query>,
}

impl ListRows {
    pub fn new(database_id: impl Into<String>, table_id: impl Into<String>) -> Self {
        Self {
            database_id: database_id.into(),
            table_id: table_id.into(),
            select: Vec::new(),
            queries: Vec::new(),
        }
    }

    pub fn select<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = selectors.into_iter().map(Into::into).collect();
        self
    }

    pub fn query(mut self, query: Query) -> Self {
        self.queries.push(query);
        self
    }

    pub fn queries(mut self, queries: impl IntoIterator<Item = Query>) -> Self {
        self.queries.extend(queries);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetRow {
    pub database_id: String,
    pub table_id: String,
    pub row_id: String,
    pub select: Vec<String>,
    pub queries: Vec<Query>,
}

impl GetRow {
    pub fn new(
        database_id: impl Into<String>,
        table_id: impl Into<String>,
        row_id: impl Into<String>,
    ) -> Self {
        Self {
            database_id: database_id.into(),
            table_id: table_id.into(),
            row_id: row_id.into(),
            select: Vec::new(),
            queries: Vec::new(),
        }
    }

    pub fn select<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = selectors.into_iter().map(Into::into).collect();
        self
    }

    pub fn query(mut self, query: Query) -> Self {
        self.queries.push(query);
        self
    }
}

/// Row write request; `data` is any serializable creation payload.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRow<D> {
    pub database_id: String,
    pub table_id: String,
    pub row_id: String,
    pub data: D,
    pub permissions: Option<Vec<String>>,
}

impl<D> WriteRow<D> {
    pub fn new(
        database_id: impl Into<String>,
        table_id: impl Into<String>,
        row_id: impl Into<String>,
        data: D,
    ) -> Self {
        Self {
            database_id: database_id.into(),
            table_id: table_id.into(),
            row_id: row_id.into(),
            data,
            permissions: None,
        }
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = Some(permissions);
        self
    }
}

pub type CreateRow<D> = WriteRow<D>;
pub type UpdateRow<D> = WriteRow<D>;
/// Upsert without data keeps whatever the row already holds.
pub type UpsertRow<D> = WriteRow<Option<D>>;

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRow {
    pub database_id: String,
    pub table_id: String,
    pub row_id: String,
}

impl DeleteRow {
    pub fn new(
        database_id: impl Into<String>,
        table_id: impl Into<String>,
        row_id: impl Into<String>,
    ) -> Self {
        Self {
            database_id: database_id.into(),
            table_id: table_id.into(),
            row_id: row_id.into(),
        }
    }
}

/// Increment/decrement request. `bound` is the max for increments and the min for decrements.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustColumn {
    pub database_id: String,
    pub table_id: String,
    pub row_id: String,
    pub column: String,
    pub value: Option<f64>,
    pub bound: Option<f64>,
}

impl AdjustColumn {
    pub fn new(
        database_id: impl Into<String>,
        table_id: impl Into<String>,
        row_id: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            database_id: database_id.into(),
            table_id: table_id.into(),
            row_id: row_id.into(),
            column: column.into(),
            value: None,
            bound: None,
        }
    }

    pub fn by(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn bounded(mut self, bound: f64) -> Self {
        self.bound = Some(bound);
        self
    }
}

/// Typed row accessor over a wrapped [`TablesClient`].
#[derive(Debug, Clone)]
pub struct TypedTables<C> {
    client: C,
    schema: Arc<Schema>,
}

impl<C: TablesClient> TypedTables<C> {
    pub fn new(client: C, schema: Schema) -> Self {
        Self::with_shared_schema(client, Arc::new(schema))
    }

    pub fn with_shared_schema(client: C, schema: Arc<Schema>) -> Self {
        Self { client, schema }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Validate `selectors` and put the compiled select clause in front of `queries`.
    fn selection_queries(
        &self,
        table_id: &str,
        select: &[String],
        queries: Vec<Query>,
    ) -> Result<Vec<Query>> {
        self.schema.require_table(table_id)?;
        if !select.is_empty() {
            Selection::parse(&self.schema, table_id, select)?;
        }
        Ok(with_select(select, queries))
    }

    // ---------------------------------------------------------------------
    // Rows
    // ---------------------------------------------------------------------

    pub async fn list_rows<T: DeserializeOwned>(&self, request: ListRows) -> Result<RowList<T>> {
        let queries = self.selection_queries(&request.table_id, &request.select, request.queries)?;
        debug!(
            "[TYPED_TABLES] list_rows database={} table={} queries={}",
            request.database_id,
            request.table_id,
            queries.len()
        );
        self.client
            .list_rows(&request.database_id, &request.table_id, &queries)
            .await?
            .decode()
    }

    pub async fn get_row<T: DeserializeOwned>(&self, request: GetRow) -> Result<Row<T>> {
        let queries = self.selection_queries(&request.table_id, &request.select, request.queries)?;
        debug!(
            "[TYPED_TABLES] get_row database={} table={} row={}",
            request.database_id, request.table_id, request.row_id
        );
        self.client
            .get_row(&request.database_id, &request.table_id, &request.row_id, &queries)
            .await?
            .decode()
    }

    /// [`TypedTables::get_row`], with a missing row (404) mapped to `None`.
    pub async fn get_row_optional<T: DeserializeOwned>(
        &self,
        request: GetRow,
    ) -> Result<Option<Row<T>>> {
        match self.get_row(request).await {
            Ok(row) => Ok(Some(row)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn create_row<T, D>(&self, request: CreateRow<D>) -> Result<Row<T>>
    where
        T: DeserializeOwned,
        D: Serialize,
    {
        let data = to_document(&request.table_id, &request.data)?;
        payload::check_create(&self.schema, &request.table_id, &data)?;
        debug!(
            "[TYPED_TABLES] create_row database={} table={} row={}",
            request.database_id, request.table_id, request.row_id
        );
        self.client
            .create_row(
                &request.database_id,
                &request.table_id,
                &request.row_id,
                data,
                request.permissions,
            )
            .await?
            .decode()
    }

    /// [`TypedTables::create_row`], with an id collision (409) mapped to `None`.
    pub async fn create_row_optional<T, D>(&self, request: CreateRow<D>) -> Result<Option<Row<T>>>
    where
        T: DeserializeOwned,
        D: Serialize,
    {
        match self.create_row(request).await {
            Ok(row) => Ok(Some(row)),
            Err(err) if err.is_conflict() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Partial update; columns missing from `data` keep their value.
    pub async fn update_row<T, D>(&self, request: UpdateRow<D>) -> Result<Row<T>>
    where
        T: DeserializeOwned,
        D: Serialize,
    {
        let data = to_document(&request.table_id, &request.data)?;
        payload::check_update(&self.schema, &request.table_id, &data)?;
        debug!(
            "[TYPED_TABLES] update_row database={} table={} row={} columns={}",
            request.database_id,
            request.table_id,
            request.row_id,
            data.len()
        );
        self.client
            .update_row(
                &request.database_id,
                &request.table_id,
                &request.row_id,
                data,
                request.permissions,
            )
            .await?
            .decode()
    }

    pub async fn upsert_row<T, D>(&self, request: UpsertRow<D>) -> Result<Row<T>>
    where
        T: DeserializeOwned,
        D: Serialize,
    {
        let data = match &request.data {
            Some(data) => {
                let data = to_document(&request.table_id, data)?;
                payload::check_update(&self.schema, &request.table_id, &data)?;
                Some(data)
            }
            None => {
                self.schema.require_table(&request.table_id)?;
                None
            }
        };
        debug!(
            "[TYPED_TABLES] upsert_row database={} table={} row={}",
            request.database_id, request.table_id, request.row_id
        );
        self.client
            .upsert_row(
                &request.database_id,
                &request.table_id,
                &request.row_id,
                data,
                request.permissions,
            )
            .await?
            .decode()
    }

    pub async fn delete_row(&self, request: DeleteRow) -> Result<Ack> {
        self.schema.require_table(&request.table_id)?;
        debug!(
            "[TYPED_TABLES] delete_row database={} table={} row={}",
            request.database_id, request.table_id, request.row_id
        );
        self.client
            .delete_row(&request.database_id, &request.table_id, &request.row_id)
            .await
    }

    pub async fn increment_row_column<T: DeserializeOwned>(
        &self,
        request: AdjustColumn,
    ) -> Result<Row<T>> {
        self.require_numeric(&request.table_id, &request.column)?;
        debug!(
            "[TYPED_TABLES] increment_row_column table={} row={} column={} by={:?}",
            request.table_id, request.row_id, request.column, request.value
        );
        self.client
            .increment_row_column(
                &request.database_id,
                &request.table_id,
                &request.row_id,
                &request.column,
                request.value,
                request.bound,
            )
            .await?
            .decode()
    }

    pub async fn decrement_row_column<T: DeserializeOwned>(
        &self,
        request: AdjustColumn,
    ) -> Result<Row<T>> {
        self.require_numeric(&request.table_id, &request.column)?;
        debug!(
            "[TYPED_TABLES] decrement_row_column table={} row={} column={} by={:?}",
            request.table_id, request.row_id, request.column, request.value
        );
        self.client
            .decrement_row_column(
                &request.database_id,
                &request.table_id,
                &request.row_id,
                &request.column,
                request.value,
                request.bound,
            )
            .await?
            .decode()
    }

    fn require_numeric(&self, table_id: &str, column: &str) -> Result<()> {
        if self.schema.require_column(table_id, column)?.is_numeric() {
            Ok(())
        } else {
            Err(TablesError::NotNumeric {
                table: table_id.to_string(),
                column: column.to_string(),
            })
        }
    }

    // ---------------------------------------------------------------------
    // Bulk rows
    // ---------------------------------------------------------------------

    pub async fn create_rows<T, D>(
        &self,
        database_id: &str,
        table_id: &str,
        rows: &[D],
    ) -> Result<RowList<T>>
    where
        T: DeserializeOwned,
        D: Serialize,
    {
        let rows = to_documents(table_id, rows)?;
        payload::check_bulk(&self.schema, table_id, &rows, false)?;
        debug!("[TYPED_TABLES] create_rows table={table_id} count={}", rows.len());
        self.client.create_rows(database_id, table_id, rows).await?.decode()
    }

    /// Every row must carry its `$id`.
    pub async fn upsert_rows<T, D>(
        &self,
        database_id: &str,
        table_id: &str,
        rows: &[D],
    ) -> Result<RowList<T>>
    where
        T: DeserializeOwned,
        D: Serialize,
    {
        let rows = to_documents(table_id, rows)?;
        payload::check_bulk(&self.schema, table_id, &rows, true)?;
        debug!("[TYPED_TABLES] upsert_rows table={table_id} count={}", rows.len());
        self.client.upsert_rows(database_id, table_id, rows).await?.decode()
    }

    /// Apply the same partial `data` to every row matching `queries`.
    pub async fn update_rows<T, D>(
        &self,
        database_id: &str,
        table_id: &str,
        data: &D,
        queries: Vec<Query>,
    ) -> Result<RowList<T>>
    where
        T: DeserializeOwned,
        D: Serialize,
    {
        let data = to_document(table_id, data)?;
        payload::check_update(&self.schema, table_id, &data)?;
        debug!("[TYPED_TABLES] update_rows table={table_id} queries={}", queries.len());
        self.client
            .update_rows(database_id, table_id, data, &queries)
            .await?
            .decode()
    }

    pub async fn delete_rows<T: DeserializeOwned>(
        &self,
        database_id: &str,
        table_id: &str,
        queries: Vec<Query>,
    ) -> Result<RowList<T>> {
        self.schema.require_table(table_id)?;
        debug!("[TYPED_TABLES] delete_rows table={table_id} queries={}", queries.len());
        self.client
            .delete_rows(database_id, table_id, &queries)
            .await?
            .decode()
    }

    // ---------------------------------------------------------------------
    // Tables, columns and indexes
    // ---------------------------------------------------------------------

    pub async fn list_tables(&self, database_id: &str, queries: Vec<Query>) -> Result<TableList> {
        self.client.list_tables(database_id, &queries).await
    }

    /// Create `table_id` with the name the schema gives it.
    pub async fn create_table(&self, database_id: &str, table_id: &str) -> Result<TableInfo> {
        let table = self.schema.require_table(table_id)?;
        self.create_table_with(database_id, TableSpec::new(&table.id, &table.name))
            .await
    }

    pub async fn create_table_with(&self, database_id: &str, spec: TableSpec) -> Result<TableInfo> {
        self.schema.require_table(&spec.table_id)?;
        debug!("[TYPED_TABLES] create_table database={database_id} table={}", spec.table_id);
        self.client.create_table(database_id, &spec).await
    }

    pub async fn get_table(&self, database_id: &str, table_id: &str) -> Result<TableInfo> {
        self.schema.require_table(table_id)?;
        self.client.get_table(database_id, table_id).await
    }

    pub async fn update_table(&self, database_id: &str, spec: TableSpec) -> Result<TableInfo> {
        self.schema.require_table(&spec.table_id)?;
        self.client.update_table(database_id, &spec).await
    }

    pub async fn delete_table(&self, database_id: &str, table_id: &str) -> Result<Ack> {
        self.schema.require_table(table_id)?;
        debug!("[TYPED_TABLES] delete_table database={database_id} table={table_id}");
        self.client.delete_table(database_id, table_id).await
    }

    pub async fn list_columns(
        &self,
        database_id: &str,
        table_id: &str,
        queries: Vec<Query>,
    ) -> Result<ColumnList> {
        self.schema.require_table(table_id)?;
        self.client.list_columns(database_id, table_id, &queries).await
    }

    /// Create column `key` exactly as the schema declares it.
    pub async fn create_column(
        &self,
        database_id: &str,
        table_id: &str,
        key: &str,
    ) -> Result<ColumnDefinition> {
        let column = self.schema.require_column(table_id, key)?;
        debug!(
            "[TYPED_TABLES] create_column table={table_id} key={key} type={}",
            column.data_type.name()
        );
        self.client.create_column(database_id, table_id, column).await
    }

    /// Push the schema's current definition of column `key`.
    pub async fn update_column(
        &self,
        database_id: &str,
        table_id: &str,
        key: &str,
    ) -> Result<ColumnDefinition> {
        let column = self.schema.require_column(table_id, key)?;
        self.client.update_column(database_id, table_id, column).await
    }

    pub async fn get_column(
        &self,
        database_id: &str,
        table_id: &str,
        key: &str,
    ) -> Result<ColumnDefinition> {
        self.schema.require_column(table_id, key)?;
        self.client.get_column(database_id, table_id, key).await
    }

    pub async fn delete_column(&self, database_id: &str, table_id: &str, key: &str) -> Result<Ack> {
        self.schema.require_column(table_id, key)?;
        self.client.delete_column(database_id, table_id, key).await
    }

    pub async fn list_indexes(
        &self,
        database_id: &str,
        table_id: &str,
        queries: Vec<Query>,
    ) -> Result<IndexList> {
        self.schema.require_table(table_id)?;
        self.client.list_indexes(database_id, table_id, &queries).await
    }

    /// Index columns must belong to the table.
    pub async fn create_index(
        &self,
        database_id: &str,
        table_id: &str,
        index: &IndexDefinition,
    ) -> Result<IndexDefinition> {
        for column in &index.columns {
            self.schema.require_column(table_id, column)?;
        }
        debug!("[TYPED_TABLES] create_index table={table_id} key={}", index.key);
        self.client.create_index(database_id, table_id, index).await
    }

    pub async fn get_index(
        &self,
        database_id: &str,
        table_id: &str,
        key: &str,
    ) -> Result<IndexDefinition> {
        self.schema.require_table(table_id)?;
        self.client.get_index(database_id, table_id, key).await
    }

    pub async fn delete_index(&self, database_id: &str, table_id: &str, key: &str) -> Result<Ack> {
        self.schema.require_table(table_id)?;
        self.client.delete_index(database_id, table_id, key).await
    }

    /// Create every table, column and index of the schema in `database_id`.
    ///
    /// Two-way relationship columns create their mirrored column on the
    /// related table, so a mirrored column declared in the schema is skipped.
    pub async fn provision(&self, database_id: &str) -> Result<()> {
        for table in &self.schema.tables {
            self.create_table(database_id, &table.id).await?;
        }

        let mut mirrored: HashSet<(String, String)> = HashSet::new();
        for table in &self.schema.tables {
            for column in &table.columns {
                if mirrored.contains(&(table.id.clone(), column.key.clone())) {
                    continue;
                }
                self.create_column(database_id, &table.id, &column.key).await?;
                if let Some(relationship) = column.relationship() {
                    if let Some(twin_key) = &relationship.two_way_key {
                        mirrored.insert((relationship.related_table.clone(), twin_key.clone()));
                    }
                }
            }
        }

        for table in &self.schema.tables {
            for index in &table.indexes {
                self.create_index(database_id, &table.id, index).await?;
            }
        }
        debug!(
            "[TYPED_TABLES] provisioned database={database_id} tables={}",
            self.schema.tables.len()
        );
        Ok(())
    }
}

fn to_document<D: Serialize + ?Sized>(table_id: &str, data: &D) -> Result<Document> {
    match serde_json::to_value(data)? {
        Value::Object(document) => Ok(document),
        other => Err(TablesError::InvalidPayload {
            table: table_id.to_string(),
            reason: format!("row data must be an object, got {other}"),
        }),
    }
}

fn to_documents<D: Serialize>(table_id: &str, rows: &[D]) -> Result<Vec<Document>> {
    rows.iter().map(|row| to_document(table_id, row)).collect()
}
