mod common;

use anyhow::Result;
use common::{create_tables_with, create_test_tables, Post, UserName, DB};
use serde_json::json;
use typed_tables::{
    CreateRow, DeleteRow, Document, GetRow, ListRows, RelationLoad, Row, SqliteConfig, SqliteTables,
    TablesError, TypedTables,
};

/// John Doe with two posts, linked from the posts' side.
async fn seed(tables: &TypedTables<SqliteTables>) -> Result<()> {
    tables
        .create_row::<Document, _>(CreateRow::new(
            DB,
            "users",
            "u1",
            json!({"name": "John Doe", "age": 30, "status": "active"}),
        ))
        .await?;
    for (id, title) in [("p1", "Hello"), ("p2", "Again")] {
        tables
            .create_row::<Document, _>(CreateRow::new(
                DB,
                "posts",
                id,
                json!({"title": title, "content": "World", "author": "u1"}),
            ))
            .await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_nested_selection_projects_related_rows() {
    test_nested_selection_projects_related_rows_impl().await.unwrap();
}

async fn test_nested_selection_projects_related_rows_impl() -> Result<()> {
    let tables = create_test_tables().await?;
    seed(&tables).await?;

    let row = tables
        .get_row::<Document>(GetRow::new(DB, "users", "u1").select(["name", "posts.title"]))
        .await?;
    assert_eq!(row.data["name"], "John Doe");
    assert!(row.data.get("age").is_none());
    let posts = row.data["posts"].as_array().unwrap();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0]["$id"], "p1");
    assert_eq!(posts[0]["title"], "Hello");
    assert!(posts[0].get("content").is_none());
    assert!(posts[0].get("$sequence").is_none());
    Ok(())
}

#[tokio::test]
async fn test_selectors_union_and_merge() {
    test_selectors_union_and_merge_impl().await.unwrap();
}

async fn test_selectors_union_and_merge_impl() -> Result<()> {
    let tables = create_test_tables().await?;
    seed(&tables).await?;

    let merged = tables
        .get_row::<Document>(
            GetRow::new(DB, "users", "u1").select(["posts.title", "posts.content"]),
        )
        .await?;
    assert_eq!(merged.data["posts"][1]["title"], "Again");
    assert_eq!(merged.data["posts"][1]["content"], "World");

    let forward = tables
        .get_row::<Document>(GetRow::new(DB, "users", "u1").select(["name", "posts.title", "age"]))
        .await?;
    let backward = tables
        .get_row::<Document>(GetRow::new(DB, "users", "u1").select(["age", "posts.title", "name"]))
        .await?;
    assert_eq!(forward, backward);
    Ok(())
}

#[tokio::test]
async fn test_select_all_renders_relationship_ids() {
    test_select_all_renders_relationship_ids_impl().await.unwrap();
}

async fn test_select_all_renders_relationship_ids_impl() -> Result<()> {
    let tables = create_test_tables().await?;
    seed(&tables).await?;

    let row = tables
        .get_row::<Document>(GetRow::new(DB, "users", "u1").select(["*"]))
        .await?;
    assert!(row.sequence.is_some());
    assert_eq!(row.data["age"], 30);
    assert_eq!(row.data["posts"], json!(["p1", "p2"]));

    let post = tables
        .get_row::<Document>(GetRow::new(DB, "posts", "p2").select(["title", "author"]))
        .await?;
    assert_eq!(post.data["author"], "u1");
    Ok(())
}

#[tokio::test]
async fn test_single_relationship_selects_one_row() {
    test_single_relationship_selects_one_row_impl().await.unwrap();
}

async fn test_single_relationship_selects_one_row_impl() -> Result<()> {
    #[derive(serde::Deserialize)]
    struct PostWithAuthor {
        title: String,
        author: Row<UserName>,
    }

    let tables = create_test_tables().await?;
    seed(&tables).await?;

    let post = tables
        .get_row::<PostWithAuthor>(GetRow::new(DB, "posts", "p1").select(["title", "author.name"]))
        .await?;
    assert_eq!(post.data.title, "Hello");
    assert_eq!(post.data.author.id, "u1");
    assert_eq!(post.data.author.data.name, "John Doe");
    Ok(())
}

#[tokio::test]
async fn test_list_rows_applies_selection() {
    test_list_rows_applies_selection_impl().await.unwrap();
}

async fn test_list_rows_applies_selection_impl() -> Result<()> {
    let tables = create_test_tables().await?;
    seed(&tables).await?;

    let list = tables
        .list_rows::<Post>(ListRows::new(DB, "posts").select(["title", "content", "views"]))
        .await?;
    assert_eq!(list.total, 2);
    assert_eq!(list.rows[0].data.title, "Hello");
    assert_eq!(list.rows[0].data.views, 0);
    assert!(list.rows.iter().all(|row| row.sequence.is_none()));
    Ok(())
}

#[tokio::test]
async fn test_invalid_selectors_are_rejected() {
    test_invalid_selectors_are_rejected_impl().await.unwrap();
}

async fn test_invalid_selectors_are_rejected_impl() -> Result<()> {
    let tables = create_test_tables().await?;
    for selector in ["nickname", "name.first", "posts.author.posts.title", "posts.missing"] {
        let err = tables
            .get_row::<Document>(GetRow::new(DB, "users", "u1").select([selector]))
            .await
            .unwrap_err();
        assert!(
            matches!(err, TablesError::InvalidSelector { .. }),
            "{selector}: {err}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_default_shape_follows_relation_load() {
    test_default_shape_follows_relation_load_impl().await.unwrap();
}

async fn test_default_shape_follows_relation_load_impl() -> Result<()> {
    let stubs = create_test_tables().await?;
    seed(&stubs).await?;
    let row = stubs.get_row::<Document>(GetRow::new(DB, "users", "u1")).await?;
    let posts = row.data["posts"].as_array().unwrap();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0]["$id"], "p1");
    assert_eq!(posts[0]["$tableId"], "posts");
    assert!(posts[0].get("title").is_none());

    let config = SqliteConfig::in_memory().with_relation_load(RelationLoad::Expand);
    let expanded = create_tables_with(config).await?;
    seed(&expanded).await?;
    let row = expanded.get_row::<Document>(GetRow::new(DB, "users", "u1")).await?;
    assert_eq!(row.data["posts"][0]["title"], "Hello");
    // One level only: the related row's own relationships are not loaded.
    assert!(row.data["posts"][0].get("author").is_none());
    Ok(())
}

#[tokio::test]
async fn test_nested_payload_creates_related_rows() {
    test_nested_payload_creates_related_rows_impl().await.unwrap();
}

async fn test_nested_payload_creates_related_rows_impl() -> Result<()> {
    let tables = create_test_tables().await?;
    tables
        .create_row::<Document, _>(CreateRow::new(
            DB,
            "users",
            "u1",
            json!({
                "name": "John Doe",
                "age": 30,
                "status": "active",
                "posts": [{"$id": "p9", "title": "Nested"}]
            }),
        ))
        .await?;

    let post = tables
        .get_row::<Document>(GetRow::new(DB, "posts", "p9").select(["title", "author.name"]))
        .await?;
    assert_eq!(post.data["title"], "Nested");
    assert_eq!(post.data["author"]["name"], "John Doe");

    // Deleting the post unlinks it from its author.
    tables.delete_row(DeleteRow::new(DB, "posts", "p9")).await?;
    let user = tables
        .get_row::<Document>(GetRow::new(DB, "users", "u1").select(["posts"]))
        .await?;
    assert_eq!(user.data["posts"], json!([]));
    Ok(())
}
