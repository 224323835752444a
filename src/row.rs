//! Row and management models returned by the wrapped client.

use crate::error::Result;
use crate::schema::{ColumnDefinition, IndexDefinition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A dynamically-shaped set of columns.
pub type Document = Map<String, Value>;

/// Row id placeholder asking the client to generate a unique id.
pub const ID_UNIQUE: &str = "unique()";

/// One stored record: reserved metadata plus caller-defined columns `T`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row<T = Document> {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "$sequence", default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,
    #[serde(rename = "$tableId")]
    pub table_id: String,
    #[serde(rename = "$databaseId")]
    pub database_id: String,
    #[serde(rename = "$createdAt")]
    pub created_at: String,
    #[serde(rename = "$updatedAt")]
    pub updated_at: String,
    #[serde(rename = "$permissions", default)]
    pub permissions: Vec<String>,
    #[serde(flatten)]
    pub data: T,
}

impl Row<Document> {
    /// Reinterpret the columns as `T`, keeping the metadata.
    pub fn decode<T: DeserializeOwned>(self) -> Result<Row<T>> {
        let data = serde_json::from_value(Value::Object(self.data))?;
        Ok(Row {
            id: self.id,
            sequence: self.sequence,
            table_id: self.table_id,
            database_id: self.database_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            permissions: self.permissions,
            data,
        })
    }

    /// The row as one JSON object, metadata included.
    pub fn into_value(self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// A metadata-only copy, used for relationship stubs.
    pub fn stub(&self) -> Row<Document> {
        Row {
            data: Document::new(),
            ..self.clone()
        }
    }
}

/// Page of rows plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowList<T = Document> {
    pub total: u64,
    pub rows: Vec<Row<T>>,
}

impl RowList<Document> {
    pub fn decode<T: DeserializeOwned>(self) -> Result<RowList<T>> {
        let rows = self
            .rows
            .into_iter()
            .map(Row::decode)
            .collect::<Result<Vec<_>>>()?;
        Ok(RowList {
            total: self.total,
            rows,
        })
    }
}

/// Empty acknowledgement returned by delete operations.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub message: String,
}

/// A relationship value: either the referenced row's id or the row itself.
///
/// Also usable in creation payloads, where a nested payload creates the
/// related row alongside the parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reference<T> {
    Row(Box<Row<T>>),
    Id(String),
}

impl<T> Reference<T> {
    pub fn id(&self) -> &str {
        match self {
            Self::Row(row) => &row.id,
            Self::Id(id) => id,
        }
    }

    pub fn row(&self) -> Option<&Row<T>> {
        match self {
            Self::Row(row) => Some(row),
            Self::Id(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "$databaseId")]
    pub database_id: String,
    #[serde(rename = "$createdAt")]
    pub created_at: String,
    #[serde(rename = "$updatedAt")]
    pub updated_at: String,
    #[serde(rename = "$permissions", default)]
    pub permissions: Vec<String>,
    pub name: String,
    pub enabled: bool,
    pub row_security: bool,
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
}

/// Table settings sent on create/update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSpec {
    pub table_id: String,
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub row_security: bool,
    pub enabled: bool,
}

impl TableSpec {
    pub fn new(table_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
            name: name.into(),
            permissions: Vec::new(),
            row_security: false,
            enabled: true,
        }
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_row_security(mut self, row_security: bool) -> Self {
        self.row_security = row_security;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableList {
    pub total: u64,
    pub tables: Vec<TableInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnList {
    pub total: u64,
    pub columns: Vec<ColumnDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexList {
    pub total: u64,
    pub indexes: Vec<IndexDefinition>,
}
