//! Schema-aware, typed access to TablesDB-style row stores.
//!
//! # Intention
//!
//! - Wrap a dynamically-typed table/row client behind a typed accessor that
//!   validates table ids, selectors and payloads against a declared schema.
//! - Resolve row-id references into full rows with batched lookups.
//! - Ship a local SQLite client implementing the same client seam.
//!
//! # Architectural Boundaries
//!
//! - [`client::TablesClient`] is the only way the accessor talks to storage.
//! - Schema, selector and payload rules are pure and shared by the accessor
//!   and the SQLite client.
//! - No permission evaluation, transactions across calls, or realtime.

pub mod client;
pub mod error;
pub mod payload;
pub mod populate;
pub mod projection;
pub mod query;
pub mod row;
pub mod schema;
pub mod selector;
pub mod sqlite;
pub mod typed;

pub use client::TablesClient;
pub use error::{Result, TablesError};
pub use populate::{PopulateRequest, PopulateRow, PopulateRows, POPULATE_BATCH_LIMIT};
pub use projection::RelationLoad;
pub use query::{Method, Query};
pub use row::{Ack, Document, Reference, Row, RowList, TableInfo, TableSpec, ID_UNIQUE};
pub use schema::{
    ColumnDefinition, DataType, IndexDefinition, IndexType, RelationKind, RelationMutate,
    RelationSide, Schema, TableDefinition,
};
pub use selector::{Selection, SELECT_ALL};
pub use sqlite::{SqliteConfig, SqliteTables};
pub use typed::{
    AdjustColumn, CreateRow, DeleteRow, GetRow, ListRows, TypedTables, UpdateRow, UpsertRow,
    WriteRow,
};
