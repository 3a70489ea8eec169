use serde::{Deserialize, Serialize};
use std::fmt;

/// One column of a table schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub ordinal: usize,
    pub name: String,
    /// Type name in the destination store's vocabulary
    pub data_type: String,
    pub is_key: bool,
    pub comment: Option<String>,
}

impl Column {
    pub fn new(ordinal: usize, name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            ordinal,
            name: name.into(),
            data_type: data_type.into(),
            is_key: false,
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }

    pub fn renamed(&self, name: String) -> Self {
        Self {
            name,
            ..self.clone()
        }
    }
}

/// Ordered columns of one source snapshot
pub type Schema = Vec<Column>;

/// A destination table, optionally qualified by the attached database name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: Option<String>,
    pub table: String,
}

impl TableRef {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            schema: None,
            table: table.into(),
        }
    }

    pub fn with_schema(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            table: table.into(),
        }
    }

    /// SQLite's name for the database holding the table
    pub fn schema_or_main(&self) -> &str {
        self.schema.as_deref().unwrap_or("main")
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema_or_main(), self.table)
    }
}
