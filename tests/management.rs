mod common;

use anyhow::Result;
use common::{create_test_tables, schema, User, DB};
use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;
use typed_tables::client::TablesClient;
use typed_tables::{
    ColumnDefinition, CreateRow, DataType, DeleteRow, Document, GetRow, IndexDefinition, IndexType,
    ListRows, Query, RelationKind, RelationMutate, RelationSide, Schema, SqliteConfig, SqliteTables,
    TableDefinition, TableSpec, TablesError, TypedTables,
};

// Helper function to create a temporary file-backed database
fn create_temp_db() -> Result<(SqliteConfig, NamedTempFile)> {
    let temp_file = NamedTempFile::new()?;
    let path = temp_file
        .path()
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("temp path is not UTF-8"))?
        .to_string();
    Ok((SqliteConfig::new(path), temp_file))
}

fn library_schema(on_delete: RelationMutate) -> Schema {
    Schema::new()
        .add_table(
            TableDefinition::new("authors")
                .with_column(ColumnDefinition::string("name"))
                .with_column(
                    ColumnDefinition::related("books", "books", RelationKind::OneToMany)
                        .on_delete(on_delete),
                ),
        )
        .add_table(TableDefinition::new("books").with_column(ColumnDefinition::string("title")))
}

async fn seed_library(on_delete: RelationMutate) -> Result<TypedTables<SqliteTables>> {
    let client = SqliteTables::open(SqliteConfig::in_memory())?;
    let tables = TypedTables::new(client, library_schema(on_delete));
    tables.provision(DB).await?;
    for (id, title) in [("b1", "Dune"), ("b2", "Emma")] {
        tables
            .create_row::<Document, _>(CreateRow::new(DB, "books", id, json!({"title": title})))
            .await?;
    }
    tables
        .create_row::<Document, _>(CreateRow::new(
            DB,
            "authors",
            "a1",
            json!({"name": "Ann", "books": ["b1", "b2"]}),
        ))
        .await?;
    Ok(tables)
}

#[tokio::test]
async fn test_provision_creates_tables_columns_and_indexes() {
    test_provision_creates_tables_columns_and_indexes_impl().await.unwrap();
}

async fn test_provision_creates_tables_columns_and_indexes_impl() -> Result<()> {
    let tables = create_test_tables().await?;

    let list = tables.list_tables(DB, Vec::new()).await?;
    assert_eq!(list.total, 2);

    let users = tables.get_table(DB, "users").await?;
    assert_eq!(users.name, "Users");
    assert!(users.enabled);
    let keys: Vec<&str> = users.columns.iter().map(|column| column.key.as_str()).collect();
    assert_eq!(
        keys,
        vec!["name", "age", "status", "description", "email", "score", "labels", "posts"]
    );
    assert_eq!(users.indexes.len(), 1);

    // The mirrored side of a two-way relationship is created once, by the backend.
    let author = tables.get_column(DB, "posts", "author").await?;
    let relationship = author.relationship().unwrap();
    assert_eq!(relationship.related_table, "users");
    assert_eq!(relationship.side, RelationSide::Child);

    let age = tables.get_column(DB, "users", "age").await?;
    assert_eq!(age.data_type, DataType::Integer);

    let err = tables.provision(DB).await.unwrap_err();
    assert!(err.is_conflict());

    // Databases are independent namespaces.
    tables.provision("staging").await?;
    assert_eq!(tables.list_tables("staging", Vec::new()).await?.total, 2);
    Ok(())
}

#[tokio::test]
async fn test_list_columns_filters_by_definition() {
    test_list_columns_filters_by_definition_impl().await.unwrap();
}

async fn test_list_columns_filters_by_definition_impl() -> Result<()> {
    let tables = create_test_tables().await?;
    let columns = tables
        .list_columns(DB, "users", vec![Query::equal("type", ["relationship"])])
        .await?;
    assert_eq!(columns.total, 1);
    assert_eq!(columns.columns[0].key, "posts");

    let nullable = tables
        .list_columns(DB, "users", vec![Query::equal("nullable", [true])])
        .await?;
    assert_eq!(nullable.total, 3);
    Ok(())
}

#[tokio::test]
async fn test_table_updates_and_deletes() {
    test_table_updates_and_deletes_impl().await.unwrap();
}

async fn test_table_updates_and_deletes_impl() -> Result<()> {
    let tables = create_test_tables().await?;

    let renamed = tables
        .update_table(DB, TableSpec::new("users", "People").with_row_security(true))
        .await?;
    assert_eq!(renamed.name, "People");
    assert!(renamed.row_security);

    tables.delete_table(DB, "posts").await?;
    let err = tables.get_table(DB, "posts").await.unwrap_err();
    assert!(err.is_not_found());

    // Dropping one side of a two-way relationship drops its mirror.
    let users = tables.get_table(DB, "users").await?;
    assert!(users.columns.iter().all(|column| column.key != "posts"));
    Ok(())
}

#[tokio::test]
async fn test_column_and_index_management() {
    test_column_and_index_management_impl().await.unwrap();
}

async fn test_column_and_index_management_impl() -> Result<()> {
    let tables = create_test_tables().await?;

    tables.update_column(DB, "users", "description").await?;
    let err = tables
        .client()
        .update_column(DB, "users", &ColumnDefinition::string("age"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(400));

    let err = tables
        .client()
        .create_column(DB, "users", &ColumnDefinition::string("name"))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    tables.delete_column(DB, "users", "labels").await?;
    let err = tables.get_column(DB, "users", "labels").await.unwrap_err();
    assert!(err.is_not_found());

    let index = IndexDefinition::new("age_key", IndexType::Key, ["age"]);
    tables.create_index(DB, "users", &index).await?;
    assert_eq!(tables.get_index(DB, "users", "age_key").await?, index);
    assert_eq!(tables.list_indexes(DB, "users", Vec::new()).await?.total, 2);
    let err = tables.create_index(DB, "users", &index).await.unwrap_err();
    assert!(err.is_conflict());

    tables.delete_index(DB, "users", "age_key").await?;
    let err = tables.get_index(DB, "users", "age_key").await.unwrap_err();
    assert!(err.is_not_found());

    let err = tables
        .create_index(DB, "users", &IndexDefinition::new("bad", IndexType::Key, ["nickname"]))
        .await
        .unwrap_err();
    assert!(matches!(err, TablesError::UnknownColumn { .. }));
    Ok(())
}

#[tokio::test]
async fn test_on_delete_rules() {
    test_on_delete_rules_impl().await.unwrap();
}

async fn test_on_delete_rules_impl() -> Result<()> {
    let tables = seed_library(RelationMutate::Cascade).await?;
    tables.delete_row(DeleteRow::new(DB, "authors", "a1")).await?;
    let books = tables.list_rows::<Document>(ListRows::new(DB, "books")).await?;
    assert_eq!(books.total, 0);

    let tables = seed_library(RelationMutate::Restrict).await?;
    let err = tables
        .delete_row(DeleteRow::new(DB, "authors", "a1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(400));
    assert!(tables
        .get_row_optional::<Document>(GetRow::new(DB, "authors", "a1"))
        .await?
        .is_some());

    let tables = seed_library(RelationMutate::SetNull).await?;
    tables.delete_row(DeleteRow::new(DB, "authors", "a1")).await?;
    let books = tables.list_rows::<Document>(ListRows::new(DB, "books")).await?;
    assert_eq!(books.total, 2);
    Ok(())
}

#[tokio::test]
async fn test_file_backed_database_persists() {
    test_file_backed_database_persists_impl().await.unwrap();
}

async fn test_file_backed_database_persists_impl() -> Result<()> {
    let (config, _temp_file) = create_temp_db()?;
    {
        let tables = TypedTables::new(SqliteTables::open(config.clone())?, schema());
        tables.provision(DB).await?;
        tables
            .create_row::<User, _>(CreateRow::new(
                DB,
                "users",
                "u1",
                json!({"name": "John Doe", "age": 30, "status": "active"}),
            ))
            .await?;
    }

    let reopened = TypedTables::new(SqliteTables::open(config)?, schema());
    let row = reopened.get_row::<User>(GetRow::new(DB, "users", "u1")).await?;
    assert_eq!(row.data.name, "John Doe");
    assert_eq!(row.sequence, Some(1));
    Ok(())
}

#[tokio::test]
async fn test_schema_loaded_from_json_file() {
    test_schema_loaded_from_json_file_impl().await.unwrap();
}

async fn test_schema_loaded_from_json_file_impl() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    write!(
        file,
        "{}",
        json!({
            "tables": [{
                "id": "notes",
                "name": "Notes",
                "columns": [
                    {"key": "body", "type": "string", "size": 64},
                    {"key": "pinned", "type": "boolean", "default": false}
                ],
                "indexes": [{"key": "body_search", "type": "fulltext", "columns": ["body"]}]
            }]
        })
    )?;

    let schema = Schema::from_json_file(file.path())?;
    let tables = TypedTables::new(SqliteTables::open(SqliteConfig::in_memory())?, schema);
    tables.provision(DB).await?;

    let row = tables
        .create_row::<Document, _>(CreateRow::new(DB, "notes", "n1", json!({"body": "remember"})))
        .await?;
    assert_eq!(row.data["pinned"], false);

    let too_long = json!({"body": "x".repeat(65)});
    let err = tables
        .create_row::<Document, _>(CreateRow::new(DB, "notes", "n2", too_long))
        .await
        .unwrap_err();
    assert!(matches!(err, TablesError::InvalidPayload { .. }));

    let err = Schema::from_json_file("/nonexistent/schema.json").unwrap_err();
    assert!(matches!(err, TablesError::SchemaFile { .. }));
    Ok(())
}
