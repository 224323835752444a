//! Error types shared by the accessor, the client seam and the SQLite client.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TablesError>;

/// Status code the wrapped client uses for a missing row, table or column.
pub const CODE_NOT_FOUND: u16 = 404;
/// Status code the wrapped client uses for an identifier collision.
pub const CODE_CONFLICT: u16 = 409;
pub const CODE_BAD_REQUEST: u16 = 400;

#[derive(Debug, Error)]
pub enum TablesError {
    /// Failure signalled by the wrapped client, carrying its status code.
    #[error("{message} (code {code}, type {kind})")]
    Api {
        code: u16,
        kind: String,
        message: String,
    },

    #[error("unknown table `{0}`")]
    UnknownTable(String),

    #[error("unknown column `{column}` in table `{table}`")]
    UnknownColumn { table: String, column: String },

    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid payload for table `{table}`: {reason}")]
    InvalidPayload { table: String, reason: String },

    #[error("column `{column}` of table `{table}` is not numeric")]
    NotNumeric { table: String, column: String },

    #[error("invalid reference in column `{column}`: {reason}")]
    InvalidReference { column: String, reason: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("cannot read schema file {path}: {source}")]
    SchemaFile {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl TablesError {
    pub fn api(code: u16, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn not_found(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::api(CODE_NOT_FOUND, kind, message)
    }

    pub fn conflict(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::api(CODE_CONFLICT, kind, message)
    }

    pub fn bad_request(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::api(CODE_BAD_REQUEST, kind, message)
    }

    /// The wrapped client's status code, if this error came from it.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Some(CODE_NOT_FOUND)
    }

    pub fn is_conflict(&self) -> bool {
        self.code() == Some(CODE_CONFLICT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_helpers_only_match_api_errors() {
        assert!(TablesError::not_found("row_not_found", "missing").is_not_found());
        assert!(TablesError::conflict("row_already_exists", "taken").is_conflict());
        assert!(!TablesError::UnknownTable("users".into()).is_not_found());
        assert_eq!(TablesError::bad_request("x", "y").code(), Some(400));
    }
}
