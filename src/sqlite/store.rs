//! SQL statements behind the SQLite client.
//!
//! Table, column and index definitions live in metadata tables; rows keep
//! their scalar columns as a JSON document and relationships live in `links`,
//! always stored from the parent side of the relationship.

use crate::error::{Result, TablesError};
use crate::row::{Document, Row, TableInfo, TableSpec, ID_UNIQUE};
use crate::schema::{
    ColumnDefinition, IndexDefinition, RelationKind, RelationSide, Schema, TableDefinition,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use ulid::Ulid;

const MAX_ID_LENGTH: usize = 36;

pub(crate) fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tables_meta (
            database_id TEXT NOT NULL,
            table_id TEXT NOT NULL,
            name TEXT NOT NULL,
            permissions TEXT NOT NULL,
            row_security INTEGER NOT NULL,
            enabled INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (database_id, table_id)
        );
        CREATE TABLE IF NOT EXISTS columns_meta (
            database_id TEXT NOT NULL,
            table_id TEXT NOT NULL,
            key TEXT NOT NULL,
            position INTEGER NOT NULL,
            definition TEXT NOT NULL,
            PRIMARY KEY (database_id, table_id, key)
        );
        CREATE TABLE IF NOT EXISTS indexes_meta (
            database_id TEXT NOT NULL,
            table_id TEXT NOT NULL,
            key TEXT NOT NULL,
            definition TEXT NOT NULL,
            PRIMARY KEY (database_id, table_id, key)
        );
        CREATE TABLE IF NOT EXISTS rows (
            sequence INTEGER PRIMARY KEY AUTOINCREMENT,
            database_id TEXT NOT NULL,
            table_id TEXT NOT NULL,
            row_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            permissions TEXT NOT NULL,
            data TEXT NOT NULL,
            UNIQUE (database_id, table_id, row_id)
        );
        CREATE TABLE IF NOT EXISTS links (
            database_id TEXT NOT NULL,
            parent_table TEXT NOT NULL,
            parent_key TEXT NOT NULL,
            parent_row TEXT NOT NULL,
            child_row TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (database_id, parent_table, parent_key, parent_row, child_row)
        );
        CREATE INDEX IF NOT EXISTS idx_links_child
            ON links (database_id, parent_table, parent_key, child_row);
        "#,
    )?;
    Ok(())
}

/// Timestamp in the wrapped API's format, e.g. `2024-01-01T00:00:00.000+00:00`.
pub(crate) fn now() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3f+00:00")
        .to_string()
}

/// Generate an id for `unique()`, otherwise check the caller's id.
pub(crate) fn resolve_id(kind: &str, id: &str) -> Result<String> {
    if id == ID_UNIQUE {
        return Ok(Ulid::new().to_string().to_lowercase());
    }
    let mut chars = id.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid_start && valid_rest && id.len() <= MAX_ID_LENGTH {
        Ok(id.to_string())
    } else {
        Err(TablesError::bad_request(
            format!("{kind}_invalid_id"),
            format!(
                "Invalid `{kind}Id` param: must contain at most {MAX_ID_LENGTH} chars. \
                 Valid chars are a-z, A-Z, 0-9, period, hyphen, and underscore. \
                 Can't start with a special char"
            ),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tables, columns and indexes
// ---------------------------------------------------------------------------

/// The database's current schema, as built by create_table/create_column.
pub(crate) fn load_schema(conn: &Connection, database_id: &str) -> Result<Schema> {
    let mut schema = Schema::new();
    let mut stmt = conn.prepare(
        "SELECT table_id, name FROM tables_meta
         WHERE database_id = ?1 ORDER BY created_at, table_id",
    )?;
    let tables = stmt
        .query_map(params![database_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (table_id, name) in tables {
        let mut table = TableDefinition::new(&table_id).with_name(name);
        table.columns = columns(conn, database_id, &table_id)?;
        table.indexes = indexes(conn, database_id, &table_id)?;
        schema = schema.add_table(table);
    }
    Ok(schema)
}

pub(crate) fn table_info(
    conn: &Connection,
    database_id: &str,
    table_id: &str,
) -> Result<Option<TableInfo>> {
    let found = conn
        .query_row(
            "SELECT name, permissions, row_security, enabled, created_at, updated_at
             FROM tables_meta WHERE database_id = ?1 AND table_id = ?2",
            params![database_id, table_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;
    let Some((name, permissions, row_security, enabled, created_at, updated_at)) = found else {
        return Ok(None);
    };
    Ok(Some(TableInfo {
        id: table_id.to_string(),
        database_id: database_id.to_string(),
        created_at,
        updated_at,
        permissions: serde_json::from_str(&permissions)?,
        name,
        enabled,
        row_security,
        columns: columns(conn, database_id, table_id)?,
        indexes: indexes(conn, database_id, table_id)?,
    }))
}

pub(crate) fn table_ids(conn: &Connection, database_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT table_id FROM tables_meta
         WHERE database_id = ?1 ORDER BY created_at, table_id",
    )?;
    let ids = stmt
        .query_map(params![database_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

pub(crate) fn insert_table(conn: &Connection, database_id: &str, spec: &TableSpec) -> Result<()> {
    let now = now();
    conn.execute(
        "INSERT INTO tables_meta (database_id, table_id, name, permissions,
             row_security, enabled, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            database_id,
            spec.table_id,
            spec.name,
            serde_json::to_string(&spec.permissions)?,
            spec.row_security,
            spec.enabled,
            now
        ],
    )?;
    Ok(())
}

pub(crate) fn update_table(conn: &Connection, database_id: &str, spec: &TableSpec) -> Result<()> {
    conn.execute(
        "UPDATE tables_meta
         SET name = ?3, permissions = ?4, row_security = ?5, enabled = ?6, updated_at = ?7
         WHERE database_id = ?1 AND table_id = ?2",
        params![
            database_id,
            spec.table_id,
            spec.name,
            serde_json::to_string(&spec.permissions)?,
            spec.row_security,
            spec.enabled,
            now()
        ],
    )?;
    Ok(())
}

/// Drop a table with its rows, columns and indexes. Links are dropped by the caller.
pub(crate) fn remove_table(conn: &Connection, database_id: &str, table_id: &str) -> Result<()> {
    for statement in [
        "DELETE FROM rows WHERE database_id = ?1 AND table_id = ?2",
        "DELETE FROM columns_meta WHERE database_id = ?1 AND table_id = ?2",
        "DELETE FROM indexes_meta WHERE database_id = ?1 AND table_id = ?2",
        "DELETE FROM tables_meta WHERE database_id = ?1 AND table_id = ?2",
    ] {
        conn.execute(statement, params![database_id, table_id])?;
    }
    Ok(())
}

pub(crate) fn columns(
    conn: &Connection,
    database_id: &str,
    table_id: &str,
) -> Result<Vec<ColumnDefinition>> {
    let mut stmt = conn.prepare(
        "SELECT definition FROM columns_meta
         WHERE database_id = ?1 AND table_id = ?2 ORDER BY position",
    )?;
    let definitions = stmt
        .query_map(params![database_id, table_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    definitions
        .iter()
        .map(|definition| Ok(serde_json::from_str(definition)?))
        .collect()
}

pub(crate) fn insert_column(
    conn: &Connection,
    database_id: &str,
    table_id: &str,
    column: &ColumnDefinition,
) -> Result<()> {
    conn.execute(
        "INSERT INTO columns_meta (database_id, table_id, key, position, definition)
         VALUES (?1, ?2, ?3,
            (SELECT COALESCE(MAX(position) + 1, 0) FROM columns_meta
             WHERE database_id = ?1 AND table_id = ?2),
            ?4)",
        params![database_id, table_id, column.key, serde_json::to_string(column)?],
    )?;
    Ok(())
}

pub(crate) fn replace_column(
    conn: &Connection,
    database_id: &str,
    table_id: &str,
    column: &ColumnDefinition,
) -> Result<()> {
    conn.execute(
        "UPDATE columns_meta SET definition = ?4
         WHERE database_id = ?1 AND table_id = ?2 AND key = ?3",
        params![database_id, table_id, column.key, serde_json::to_string(column)?],
    )?;
    Ok(())
}

pub(crate) fn remove_column(
    conn: &Connection,
    database_id: &str,
    table_id: &str,
    key: &str,
) -> Result<()> {
    conn.execute(
        "DELETE FROM columns_meta WHERE database_id = ?1 AND table_id = ?2 AND key = ?3",
        params![database_id, table_id, key],
    )?;
    Ok(())
}

pub(crate) fn indexes(
    conn: &Connection,
    database_id: &str,
    table_id: &str,
) -> Result<Vec<IndexDefinition>> {
    let mut stmt = conn.prepare(
        "SELECT definition FROM indexes_meta
         WHERE database_id = ?1 AND table_id = ?2 ORDER BY key",
    )?;
    let definitions = stmt
        .query_map(params![database_id, table_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    definitions
        .iter()
        .map(|definition| Ok(serde_json::from_str(definition)?))
        .collect()
}

pub(crate) fn insert_index(
    conn: &Connection,
    database_id: &str,
    table_id: &str,
    index: &IndexDefinition,
) -> Result<()> {
    conn.execute(
        "INSERT INTO indexes_meta (database_id, table_id, key, definition) VALUES (?1, ?2, ?3, ?4)",
        params![database_id, table_id, index.key, serde_json::to_string(index)?],
    )?;
    Ok(())
}

pub(crate) fn remove_index(
    conn: &Connection,
    database_id: &str,
    table_id: &str,
    key: &str,
) -> Result<()> {
    conn.execute(
        "DELETE FROM indexes_meta WHERE database_id = ?1 AND table_id = ?2 AND key = ?3",
        params![database_id, table_id, key],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

type RawRow = (i64, String, String, String, String, String);

const ROW_COLUMNS: &str = "sequence, row_id, created_at, updated_at, permissions, data";

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_raw(database_id: &str, table_id: &str, raw: RawRow) -> Result<Row> {
    let (sequence, id, created_at, updated_at, permissions, data) = raw;
    Ok(Row {
        id,
        sequence: Some(sequence),
        table_id: table_id.to_string(),
        database_id: database_id.to_string(),
        created_at,
        updated_at,
        permissions: serde_json::from_str(&permissions)?,
        data: serde_json::from_str::<Document>(&data)?,
    })
}

pub(crate) fn load_row(
    conn: &Connection,
    database_id: &str,
    table_id: &str,
    row_id: &str,
) -> Result<Option<Row>> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT {ROW_COLUMNS} FROM rows
                 WHERE database_id = ?1 AND table_id = ?2 AND row_id = ?3"
            ),
            params![database_id, table_id, row_id],
            read_raw,
        )
        .optional()?;
    raw.map(|raw| decode_raw(database_id, table_id, raw)).transpose()
}

/// Every row of a table, in insertion order.
pub(crate) fn load_rows(conn: &Connection, database_id: &str, table_id: &str) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ROW_COLUMNS} FROM rows WHERE database_id = ?1 AND table_id = ?2 ORDER BY sequence"
    ))?;
    let raws = stmt
        .query_map(params![database_id, table_id], read_raw)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raws.into_iter()
        .map(|raw| decode_raw(database_id, table_id, raw))
        .collect()
}

/// The rows of a table among `row_ids`, in insertion order.
pub(crate) fn load_rows_by_id(
    conn: &Connection,
    database_id: &str,
    table_id: &str,
    row_ids: &[String],
) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ROW_COLUMNS} FROM rows
         WHERE database_id = ?1 AND table_id = ?2
             AND row_id IN (SELECT value FROM json_each(?3))
         ORDER BY sequence"
    ))?;
    let raws = stmt
        .query_map(
            params![database_id, table_id, serde_json::to_string(row_ids)?],
            read_raw,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raws.into_iter()
        .map(|raw| decode_raw(database_id, table_id, raw))
        .collect()
}

/// Whether a row other than `row_id` holds `values` in `columns`.
pub(crate) fn has_duplicate(
    conn: &Connection,
    database_id: &str,
    table_id: &str,
    row_id: &str,
    columns: &[(&str, &Value)],
) -> Result<bool> {
    let mut sql = String::from(
        "SELECT 1 FROM rows WHERE database_id = ?1 AND table_id = ?2 AND row_id != ?3",
    );
    let mut values = vec![
        database_id.to_string(),
        table_id.to_string(),
        row_id.to_string(),
    ];
    for (key, value) in columns {
        let path = values.len() + 1;
        sql.push_str(&format!(
            " AND json_extract(data, ?{path}) IS json_extract(?{}, '$')",
            path + 1
        ));
        values.push(format!("$.\"{key}\""));
        values.push(serde_json::to_string(value)?);
    }
    sql.push_str(" LIMIT 1");
    let found = conn
        .query_row(&sql, params_from_iter(values), |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

/// Insert `row` and return its sequence number.
pub(crate) fn insert_row(conn: &Connection, row: &Row) -> Result<i64> {
    conn.execute(
        "INSERT INTO rows (database_id, table_id, row_id, created_at, updated_at, permissions, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            row.database_id,
            row.table_id,
            row.id,
            row.created_at,
            row.updated_at,
            serde_json::to_string(&row.permissions)?,
            serde_json::to_string(&row.data)?
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn save_row(conn: &Connection, row: &Row) -> Result<()> {
    conn.execute(
        "UPDATE rows SET created_at = ?4, updated_at = ?5, permissions = ?6, data = ?7
         WHERE database_id = ?1 AND table_id = ?2 AND row_id = ?3",
        params![
            row.database_id,
            row.table_id,
            row.id,
            row.created_at,
            row.updated_at,
            serde_json::to_string(&row.permissions)?,
            serde_json::to_string(&row.data)?
        ],
    )?;
    Ok(())
}

pub(crate) fn remove_row(
    conn: &Connection,
    database_id: &str,
    table_id: &str,
    row_id: &str,
) -> Result<()> {
    conn.execute(
        "DELETE FROM rows WHERE database_id = ?1 AND table_id = ?2 AND row_id = ?3",
        params![database_id, table_id, row_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// Where the links of a relationship column are stored.
struct LinkKey<'a> {
    parent_table: &'a str,
    parent_key: &'a str,
    kind: RelationKind,
    /// The column sits on the parent side.
    from_parent: bool,
}

fn link_key<'a>(table_id: &'a str, column: &'a ColumnDefinition) -> Option<LinkKey<'a>> {
    let relationship = column.relationship()?;
    Some(match relationship.side {
        RelationSide::Parent => LinkKey {
            parent_table: table_id,
            parent_key: &column.key,
            kind: relationship.kind,
            from_parent: true,
        },
        RelationSide::Child => LinkKey {
            parent_table: &relationship.related_table,
            parent_key: relationship.two_way_key.as_deref()?,
            kind: relationship.kind,
            from_parent: false,
        },
    })
}

/// Ids `row_id` links to through `column`: children in link order,
/// parents in row insertion order.
pub(crate) fn linked_ids(
    conn: &Connection,
    database_id: &str,
    table_id: &str,
    column: &ColumnDefinition,
    row_id: &str,
) -> Result<Vec<String>> {
    let Some(key) = link_key(table_id, column) else {
        return Ok(Vec::new());
    };
    let sql = if key.from_parent {
        "SELECT child_row FROM links
         WHERE database_id = ?1 AND parent_table = ?2 AND parent_key = ?3 AND parent_row = ?4
         ORDER BY position, child_row"
    } else {
        "SELECT links.parent_row FROM links
         LEFT JOIN rows ON rows.database_id = links.database_id
             AND rows.table_id = links.parent_table
             AND rows.row_id = links.parent_row
         WHERE links.database_id = ?1 AND links.parent_table = ?2
             AND links.parent_key = ?3 AND links.child_row = ?4
         ORDER BY rows.sequence, links.parent_row"
    };
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map(params![database_id, key.parent_table, key.parent_key, row_id], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

const UNLINK_PARENT: &str = "DELETE FROM links
    WHERE database_id = ?1 AND parent_table = ?2 AND parent_key = ?3 AND parent_row = ?4";

const UNLINK_CHILD: &str = "DELETE FROM links
    WHERE database_id = ?1 AND parent_table = ?2 AND parent_key = ?3 AND child_row = ?4";

const LINK: &str = "INSERT OR REPLACE INTO links
    (database_id, parent_table, parent_key, parent_row, child_row, position)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

/// Appends the link at the end of the parent's list.
const LINK_LAST: &str = "INSERT OR REPLACE INTO links
    (database_id, parent_table, parent_key, parent_row, child_row, position)
    VALUES (?1, ?2, ?3, ?4, ?5,
        (SELECT COALESCE(MAX(position) + 1, 0) FROM links
         WHERE database_id = ?1 AND parent_table = ?2 AND parent_key = ?3 AND parent_row = ?4))";

/// Replace the links of `row_id` through `column` with `ids`.
///
/// Single-valued sides steal the link: pointing a post at a new author
/// removes it from the previous author's list.
pub(crate) fn set_links(
    conn: &Connection,
    database_id: &str,
    table_id: &str,
    column: &ColumnDefinition,
    row_id: &str,
    ids: &[String],
) -> Result<()> {
    let Some(key) = link_key(table_id, column) else {
        return Ok(());
    };
    let parent_single = matches!(key.kind, RelationKind::OneToOne | RelationKind::ManyToOne);
    let child_single = matches!(key.kind, RelationKind::OneToOne | RelationKind::OneToMany);
    let (parent_table, parent_key) = (key.parent_table, key.parent_key);

    if key.from_parent {
        conn.execute(UNLINK_PARENT, params![database_id, parent_table, parent_key, row_id])?;
        for (position, id) in ids.iter().enumerate() {
            if child_single {
                conn.execute(UNLINK_CHILD, params![database_id, parent_table, parent_key, id])?;
            }
            let position = position as i64;
            conn.execute(
                LINK,
                params![database_id, parent_table, parent_key, row_id, id, position],
            )?;
        }
    } else {
        conn.execute(UNLINK_CHILD, params![database_id, parent_table, parent_key, row_id])?;
        for id in ids {
            if parent_single {
                conn.execute(UNLINK_PARENT, params![database_id, parent_table, parent_key, id])?;
            }
            conn.execute(LINK_LAST, params![database_id, parent_table, parent_key, id, row_id])?;
        }
    }
    Ok(())
}

/// Drop every link stored for a relationship column.
pub(crate) fn drop_links(
    conn: &Connection,
    database_id: &str,
    table_id: &str,
    column: &ColumnDefinition,
) -> Result<()> {
    if let Some(key) = link_key(table_id, column) {
        conn.execute(
            "DELETE FROM links WHERE database_id = ?1 AND parent_table = ?2 AND parent_key = ?3",
            params![database_id, key.parent_table, key.parent_key],
        )?;
    }
    Ok(())
}
