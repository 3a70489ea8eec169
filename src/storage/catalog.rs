use rusqlite::Connection;

use crate::error::ApplyError;
use crate::models::TableRef;

/// Columns of a destination table and the subset identifying its rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    /// All columns in declaration order
    pub columns: Vec<String>,
    /// Replica-identity columns in key order; empty when the table has no key
    pub identity_columns: Vec<String>,
}

impl TableDescription {
    /// SQLite column names compare case-insensitively
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

/// Destination-table metadata consumed by the apply engine
pub trait TableMetadataProvider {
    fn describe_table(&self, table: &TableRef) -> Result<TableDescription, ApplyError>;
}

impl TableMetadataProvider for Connection {
    /// Identity is the primary key. SQLite numbers key columns from 1 in key
    /// order and reports 0 for the rest.
    fn describe_table(&self, table: &TableRef) -> Result<TableDescription, ApplyError> {
        let mut stmt = self.prepare(
            "SELECT name, pk FROM pragma_table_info(?1, ?2) ORDER BY cid",
        )?;

        let rows = stmt.query_map(
            rusqlite::params![table.table, table.schema_or_main()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;
        let rows = rows.collect::<Result<Vec<_>, _>>()?;

        if rows.is_empty() {
            return Err(ApplyError::TableNotFound(table.to_string()));
        }

        let mut keyed: Vec<(i64, String)> = rows
            .iter()
            .filter(|(_, pk)| *pk > 0)
            .map(|(name, pk)| (*pk, name.clone()))
            .collect();
        keyed.sort();

        Ok(TableDescription {
            columns: rows.into_iter().map(|(name, _)| name).collect(),
            identity_columns: keyed.into_iter().map(|(_, name)| name).collect(),
        })
    }
}
