//! Schema description the accessor is parameterized with.
//!
//! A [`Schema`] maps table ids to their column shapes. It is declared once by
//! the caller, either with the builder methods below or loaded from a JSON
//! schema file, and is never mutated by the accessor.

use crate::error::{Result, TablesError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Metadata keys every row carries.
pub const META_KEYS: [&str; 7] = [
    "$id",
    "$sequence",
    "$tableId",
    "$databaseId",
    "$createdAt",
    "$updatedAt",
    "$permissions",
];

/// Metadata keys a creation payload may override.
pub const TIMESTAMP_OVERRIDES: [&str; 2] = ["$createdAt", "$updatedAt"];

pub fn is_meta_key(key: &str) -> bool {
    META_KEYS.contains(&key)
}

/// Schema definition: the set of tables a database is expected to hold.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<TableDefinition>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(mut self, table: TableDefinition) -> Self {
        self.tables.push(table);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a schema file written in the JSON form of [`Schema`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|source| TablesError::SchemaFile {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_json_str(&contents)
    }

    pub fn table(&self, table_id: &str) -> Option<&TableDefinition> {
        self.tables.iter().find(|table| table.id == table_id)
    }

    /// Like [`Schema::table`] but fails with [`TablesError::UnknownTable`].
    pub fn require_table(&self, table_id: &str) -> Result<&TableDefinition> {
        self.table(table_id)
            .ok_or_else(|| TablesError::UnknownTable(table_id.to_string()))
    }

    pub fn column(&self, table_id: &str, key: &str) -> Option<&ColumnDefinition> {
        self.table(table_id).and_then(|table| table.column(key))
    }

    pub fn require_column(&self, table_id: &str, key: &str) -> Result<&ColumnDefinition> {
        self.require_table(table_id)?
            .column(key)
            .ok_or_else(|| TablesError::UnknownColumn {
                table: table_id.to_string(),
                column: key.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub id: String,
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    /// Table whose display name equals its id.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn column(&self, key: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|column| column.key == key)
    }

    pub fn relationship_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns
            .iter()
            .filter(|column| column.relationship().is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub key: String,
    #[serde(flatten)]
    pub data_type: DataType,
    /// The column's declared type includes null.
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub array: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
}

impl ColumnDefinition {
    pub fn new(key: impl Into<String>, data_type: DataType) -> Self {
        Self {
            key: key.into(),
            data_type,
            nullable: false,
            array: false,
            default: None,
            size: None,
        }
    }

    pub fn string(key: impl Into<String>) -> Self {
        Self::new(key, DataType::String)
    }

    pub fn integer(key: impl Into<String>) -> Self {
        Self::new(key, DataType::Integer)
    }

    pub fn float(key: impl Into<String>) -> Self {
        Self::new(key, DataType::Float)
    }

    pub fn boolean(key: impl Into<String>) -> Self {
        Self::new(key, DataType::Boolean)
    }

    pub fn datetime(key: impl Into<String>) -> Self {
        Self::new(key, DataType::Datetime)
    }

    pub fn email(key: impl Into<String>) -> Self {
        Self::new(key, DataType::Email)
    }

    pub fn ip(key: impl Into<String>) -> Self {
        Self::new(key, DataType::Ip)
    }

    pub fn url(key: impl Into<String>) -> Self {
        Self::new(key, DataType::Url)
    }

    pub fn point(key: impl Into<String>) -> Self {
        Self::new(key, DataType::Point)
    }

    pub fn line(key: impl Into<String>) -> Self {
        Self::new(key, DataType::Line)
    }

    pub fn polygon(key: impl Into<String>) -> Self {
        Self::new(key, DataType::Polygon)
    }

    pub fn enumeration<I, S>(key: impl Into<String>, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            key,
            DataType::Enum {
                elements: elements.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn relationship(&self) -> Option<&Relationship> {
        match &self.data_type {
            DataType::Relationship(relationship) => Some(relationship),
            _ => None,
        }
    }

    /// Relationship column pointing at `related_table`.
    pub fn related(
        key: impl Into<String>,
        related_table: impl Into<String>,
        kind: RelationKind,
    ) -> Self {
        Self::new(
            key,
            DataType::Relationship(Relationship {
                related_table: related_table.into(),
                kind,
                two_way: false,
                two_way_key: None,
                on_delete: RelationMutate::SetNull,
                side: RelationSide::Parent,
            }),
        )
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    /// Mark a relationship column as two-way, mirrored by `two_way_key` on the related table.
    pub fn two_way(mut self, two_way_key: impl Into<String>) -> Self {
        if let DataType::Relationship(relationship) = &mut self.data_type {
            relationship.two_way = true;
            relationship.two_way_key = Some(two_way_key.into());
        }
        self
    }

    pub fn on_delete(mut self, on_delete: RelationMutate) -> Self {
        if let DataType::Relationship(relationship) = &mut self.data_type {
            relationship.on_delete = on_delete;
        }
        self
    }

    /// Integer or float, single-valued.
    pub fn is_numeric(&self) -> bool {
        !self.array && matches!(self.data_type, DataType::Integer | DataType::Float)
    }

    /// A creation payload may omit this column. Relationships are always optional.
    pub fn is_optional(&self) -> bool {
        self.nullable || self.default.is_some() || self.relationship().is_some()
    }

    /// The column holds a list of values (or related rows).
    pub fn is_many(&self) -> bool {
        match self.relationship() {
            Some(relationship) => relationship.is_many(),
            None => self.array,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum DataType {
    String,
    Integer,
    Float,
    Boolean,
    Datetime,
    Email,
    Ip,
    Url,
    Enum { elements: Vec<String> },
    /// `[x, y]`
    Point,
    /// A list of points.
    Line,
    /// A list of rings, each a list of points.
    Polygon,
    Relationship(Relationship),
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "double",
            Self::Boolean => "boolean",
            Self::Datetime => "datetime",
            Self::Email => "email",
            Self::Ip => "ip",
            Self::Url => "url",
            Self::Enum { .. } => "enum",
            Self::Point => "point",
            Self::Line => "line",
            Self::Polygon => "polygon",
            Self::Relationship(_) => "relationship",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub related_table: String,
    pub kind: RelationKind,
    #[serde(default)]
    pub two_way: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_way_key: Option<String>,
    #[serde(default)]
    pub on_delete: RelationMutate,
    #[serde(default)]
    pub side: RelationSide,
}

impl Relationship {
    /// Whether this side of the relationship holds many related rows.
    pub fn is_many(&self) -> bool {
        match self.side {
            RelationSide::Parent => {
                matches!(self.kind, RelationKind::OneToMany | RelationKind::ManyToMany)
            }
            RelationSide::Child => {
                matches!(self.kind, RelationKind::ManyToOne | RelationKind::ManyToMany)
            }
        }
    }

    /// The definition of the mirrored column on the related table.
    pub fn twin(&self, table_id: &str, key: &str) -> Option<ColumnDefinition> {
        let twin_key = self.two_way_key.as_ref()?;
        let relationship = Relationship {
            related_table: table_id.to_string(),
            kind: self.kind,
            two_way: true,
            two_way_key: Some(key.to_string()),
            on_delete: self.on_delete,
            side: match self.side {
                RelationSide::Parent => RelationSide::Child,
                RelationSide::Child => RelationSide::Parent,
            },
        };
        let mut column =
            ColumnDefinition::new(twin_key.clone(), DataType::Relationship(relationship));
        column.nullable = true;
        Some(column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationMutate {
    Restrict,
    Cascade,
    #[default]
    SetNull,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationSide {
    #[default]
    Parent,
    Child,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub key: String,
    #[serde(rename = "type")]
    pub index_type: IndexType,
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orders: Vec<String>,
}

impl IndexDefinition {
    pub fn new<I, S>(key: impl Into<String>, index_type: IndexType, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            index_type,
            columns: columns.into_iter().map(Into::into).collect(),
            orders: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IndexType {
    Key,
    Unique,
    Fulltext,
}
