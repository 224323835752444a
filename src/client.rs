//! The wrapped client seam.
//!
//! [`TablesClient`] is the exact surface of a TablesDB-style database client.
//! The typed accessor only ever talks to this trait; the crate ships one
//! implementation, [`crate::sqlite::SqliteTables`].

use crate::error::Result;
use crate::query::Query;
use crate::row::{
    Ack, ColumnList, Document, IndexList, Row, RowList, TableInfo, TableList, TableSpec,
};
use crate::schema::{ColumnDefinition, IndexDefinition};
use async_trait::async_trait;

#[async_trait]
pub trait TablesClient: Send + Sync {
    // Tables
    async fn list_tables(&self, database_id: &str, queries: &[Query]) -> Result<TableList>;
    async fn create_table(&self, database_id: &str, table: &TableSpec) -> Result<TableInfo>;
    async fn get_table(&self, database_id: &str, table_id: &str) -> Result<TableInfo>;
    async fn update_table(&self, database_id: &str, table: &TableSpec) -> Result<TableInfo>;
    async fn delete_table(&self, database_id: &str, table_id: &str) -> Result<Ack>;

    // Columns
    async fn list_columns(
        &self,
        database_id: &str,
        table_id: &str,
        queries: &[Query],
    ) -> Result<ColumnList>;
    async fn create_column(
        &self,
        database_id: &str,
        table_id: &str,
        column: &ColumnDefinition,
    ) -> Result<ColumnDefinition>;
    async fn update_column(
        &self,
        database_id: &str,
        table_id: &str,
        column: &ColumnDefinition,
    ) -> Result<ColumnDefinition>;
    async fn get_column(
        &self,
        database_id: &str,
        table_id: &str,
        key: &str,
    ) -> Result<ColumnDefinition>;
    async fn delete_column(&self, database_id: &str, table_id: &str, key: &str) -> Result<Ack>;

    // Indexes
    async fn list_indexes(
        &self,
        database_id: &str,
        table_id: &str,
        queries: &[Query],
    ) -> Result<IndexList>;
    async fn create_index(
        &self,
        database_id: &str,
        table_id: &str,
        index: &IndexDefinition,
    ) -> Result<IndexDefinition>;
    async fn get_index(
        &self,
        database_id: &str,
        table_id: &str,
        key: &str,
    ) -> Result<IndexDefinition>;
    async fn delete_index(&self, database_id: &str, table_id: &str, key: &str) -> Result<Ack>;

    // Rows
    async fn list_rows(
        &self,
        database_id: &str,
        table_id: &str,
        queries: &[Query],
    ) -> Result<RowList>;
    async fn get_row(
        &self,
        database_id: &str,
        table_id: &str,
        row_id: &str,
        queries: &[Query],
    ) -> Result<Row>;
    async fn create_row(
        &self,
        database_id: &str,
        table_id: &str,
        row_id: &str,
        data: Document,
        permissions: Option<Vec<String>>,
    ) -> Result<Row>;
    async fn create_rows(
        &self,
        database_id: &str,
        table_id: &str,
        rows: Vec<Document>,
    ) -> Result<RowList>;
    async fn upsert_row(
        &self,
        database_id: &str,
        table_id: &str,
        row_id: &str,
        data: Option<Document>,
        permissions: Option<Vec<String>>,
    ) -> Result<Row>;
    async fn upsert_rows(
        &self,
        database_id: &str,
        table_id: &str,
        rows: Vec<Document>,
    ) -> Result<RowList>;
    async fn update_row(
        &self,
        database_id: &str,
        table_id: &str,
        row_id: &str,
        data: Document,
        permissions: Option<Vec<String>>,
    ) -> Result<Row>;
    async fn update_rows(
        &self,
        database_id: &str,
        table_id: &str,
        data: Document,
        queries: &[Query],
    ) -> Result<RowList>;
    async fn delete_row(&self, database_id: &str, table_id: &str, row_id: &str) -> Result<Ack>;
    async fn delete_rows(
        &self,
        database_id: &str,
        table_id: &str,
        queries: &[Query],
    ) -> Result<RowList>;
    async fn increment_row_column(
        &self,
        database_id: &str,
        table_id: &str,
        row_id: &str,
        column: &str,
        value: Option<f64>,
        max: Option<f64>,
    ) -> Result<Row>;
    async fn decrement_row_column(
        &self,
        database_id: &str,
        table_id: &str,
        row_id: &str,
        column: &str,
        value: Option<f64>,
        min: Option<f64>,
    ) -> Result<Row>;
}
