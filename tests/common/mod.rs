#![allow(dead_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use typed_tables::client::TablesClient;
use typed_tables::row::{ColumnList, IndexList, TableList};
use typed_tables::{
    Ack, ColumnDefinition, Document, IndexDefinition, IndexType, Query, RelationKind, Result, Row,
    RowList, Schema, SqliteConfig, SqliteTables, TableDefinition, TableInfo, TableSpec, TypedTables,
};

pub const DB: &str = "main";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub age: i64,
    pub status: String,
    pub description: Option<String>,
    pub email: Option<String>,
    pub score: i64,
    pub labels: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub title: String,
    pub content: Option<String>,
    pub views: i64,
}

/// `users` and `posts`, linked by a two-way one-to-many `users.posts` / `posts.author`.
pub fn schema() -> Schema {
    let posts =
        ColumnDefinition::related("posts", "posts", RelationKind::OneToMany).two_way("author");
    let author = posts
        .relationship()
        .and_then(|relationship| relationship.twin("users", "posts"))
        .expect("two-way relationship has a twin");

    Schema::new()
        .add_table(
            TableDefinition::new("users")
                .with_name("Users")
                .with_column(ColumnDefinition::string("name").with_size(128))
                .with_column(ColumnDefinition::integer("age"))
                .with_column(ColumnDefinition::enumeration(
                    "status",
                    ["active", "restricted", "deleted"],
                ))
                .with_column(ColumnDefinition::string("description").nullable())
                .with_column(ColumnDefinition::email("email").nullable())
                .with_column(ColumnDefinition::integer("score").with_default(0))
                .with_column(ColumnDefinition::string("labels").array().nullable())
                .with_column(posts)
                .with_index(IndexDefinition::new("email_unique", IndexType::Unique, ["email"])),
        )
        .add_table(
            TableDefinition::new("posts")
                .with_name("Posts")
                .with_column(ColumnDefinition::string("title"))
                .with_column(ColumnDefinition::string("content").nullable())
                .with_column(ColumnDefinition::integer("views").with_default(0))
                .with_column(author),
        )
}

pub fn document(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

// Helper function to create a provisioned in-memory database
pub async fn create_test_tables() -> anyhow::Result<TypedTables<SqliteTables>> {
    create_tables_with(SqliteConfig::in_memory()).await
}

pub async fn create_tables_with(config: SqliteConfig) -> anyhow::Result<TypedTables<SqliteTables>> {
    let tables = TypedTables::new(SqliteTables::open(config)?, schema());
    tables.provision(DB).await?;
    Ok(tables)
}

/// Delegates to a [`SqliteTables`] and records every `list_rows` call.
pub struct CountingClient {
    inner: SqliteTables,
    list_rows_calls: AtomicUsize,
    list_rows_queries: Mutex<Vec<Vec<Query>>>,
}

impl CountingClient {
    pub fn new(inner: SqliteTables) -> Self {
        Self {
            inner,
            list_rows_calls: AtomicUsize::new(0),
            list_rows_queries: Mutex::new(Vec::new()),
        }
    }

    pub fn list_rows_calls(&self) -> usize {
        self.list_rows_calls.load(Ordering::SeqCst)
    }

    pub fn last_list_rows_queries(&self) -> Option<Vec<Query>> {
        self.list_rows_queries.lock().unwrap().last().cloned()
    }
}

pub async fn create_counting_tables() -> anyhow::Result<TypedTables<CountingClient>> {
    let client = CountingClient::new(SqliteTables::open(SqliteConfig::in_memory())?);
    let tables = TypedTables::new(client, schema());
    tables.provision(DB).await?;
    Ok(tables)
}

#[async_trait]
impl TablesClient for CountingClient {
    async fn list_tables(&self, database_id: &str, queries: &[Query]) -> Result<TableList> {
        self.inner.list_tables(database_id, queries).await
    }

    async fn create_table(&self, database_id: &str, table: &TableSpec) -> Result<TableInfo> {
        self.inner.create_table(database_id, table).await
    }

    async fn get_table(&self, database_id: &str, table_id: &str) -> Result<TableInfo> {
        self.inner.get_table(database_id, table_id).await
    }

    async fn update_table(&self, database_id: &str, table: &TableSpec) -> Result<TableInfo> {
        self.inner.update_table(database_id, table).await
    }

    async fn delete_table(&self, database_id: &str, table_id: &str) -> Result<Ack> {
        self.inner.delete_table(database_id, table_id).await
    }

    async fn list_columns(
        &self,
        database_id: &str,
        table_id: &str,
        queries: &[Query],
    ) -> Result<ColumnList> {
        self.inner.list_columns(database_id, table_id, queries).await
    }

    async fn create_column(
        &self,
        database_id: &str,
        table_id: &str,
        column: &ColumnDefinition,
    ) -> Result<ColumnDefinition> {
        self.inner.create_column(database_id, table_id, column).await
    }

    async fn update_column(
        &self,
        database_id: &str,
        table_id: &str,
        column: &ColumnDefinition,
    ) -> Result<ColumnDefinition> {
        self.inner.update_column(database_id, table_id, column).await
    }

    async fn get_column(
        &self,
        database_id: &str,
        table_id: &str,
        key: &str,
    ) -> Result<ColumnDefinition> {
        self.inner.get_column(database_id, table_id, key).await
    }

    async fn delete_column(&self, database_id: &str, table_id: &str, key: &str) -> Result<Ack> {
        self.inner.delete_column(database_id, table_id, key).await
    }

    async fn list_indexes(
        &self,
        database_id: &str,
        table_id: &str,
        queries: &[Query],
    ) -> Result<IndexList> {
        self.inner.list_indexes(database_id, table_id, queries).await
    }

    async fn create_index(
        &self,
        database_id: &str,
        table_id: &str,
        index: &IndexDefinition,
    ) -> Result<IndexDefinition> {
        self.inner.create_index(database_id, table_id, index).await
    }

    async fn get_index(
        &self,
        database_id: &str,
        table_id: &str,
        key: &str,
    ) -> Result<IndexDefinition> {
        self.inner.get_index(database_id, table_id, key).await
    }

    async fn delete_index(&self, database_id: &str, table_id: &str, key: &str) -> Result<Ack> {
        self.inner.delete_index(database_id, table_id, key).await
    }

    async fn list_rows(
        &self,
        database_id: &str,
        table_id: &str,
        queries: &[Query],
    ) -> Result<RowList> {
        self.list_rows_calls.fetch_add(1, Ordering::SeqCst);
        self.list_rows_queries.lock().unwrap().push(queries.to_vec());
        self.inner.list_rows(database_id, table_id, queries).await
    }

    async fn get_row(
        &self,
        database_id: &str,
        table_id: &str,
        row_id: &str,
        queries: &[Query],
    ) -> Result<Row> {
        self.inner.get_row(database_id, table_id, row_id, queries).await
    }

    async fn create_row(
        &self,
        database_id: &str,
        table_id: &str,
        row_id: &str,
        data: Document,
        permissions: Option<Vec<String>>,
    ) -> Result<Row> {
        self.inner
            .create_row(database_id, table_id, row_id, data, permissions)
            .await
    }

    async fn create_rows(
        &self,
        database_id: &str,
        table_id: &str,
        rows: Vec<Document>,
    ) -> Result<RowList> {
        self.inner.create_rows(database_id, table_id, rows).await
    }

    async fn upsert_row(
        &self,
        database_id: &str,
        table_id: &str,
        row_id: &str,
        data: Option<Document>,
        permissions: Option<Vec<String>>,
    ) -> Result<Row> {
        self.inner
            .upsert_row(database_id, table_id, row_id, data, permissions)
            .await
    }

    async fn upsert_rows(
        &self,
        database_id: &str,
        table_id: &str,
        rows: Vec<Document>,
    ) -> Result<RowList> {
        self.inner.upsert_rows(database_id, table_id, rows).await
    }

    async fn update_row(
        &self,
        database_id: &str,
        table_id: &str,
        row_id: &str,
        data: Document,
        permissions: Option<Vec<String>>,
    ) -> Result<Row> {
        self.inner
            .update_row(database_id, table_id, row_id, data, permissions)
            .await
    }

    async fn update_rows(
        &self,
        database_id: &str,
        table_id: &str,
        data: Document,
        queries: &[Query],
    ) -> Result<RowList> {
        self.inner.update_rows(database_id, table_id, data, queries).await
    }

    async fn delete_row(&self, database_id: &str, table_id: &str, row_id: &str) -> Result<Ack> {
        self.inner.delete_row(database_id, table_id, row_id).await
    }

    async fn delete_rows(
        &self,
        database_id: &str,
        table_id: &str,
        queries: &[Query],
    ) -> Result<RowList> {
        self.inner.delete_rows(database_id, table_id, queries).await
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
        self.inner
            .increment_row_column(database_id, table_id, row_id, column, value, max)
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
        self.inner
            .decrement_row_column(database_id, table_id, row_id, column, value, min)
            .await
    }
}
