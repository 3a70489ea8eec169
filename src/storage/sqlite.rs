use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::catalog::TableMetadataProvider;
use crate::error::ApplyError;
use crate::models::{ActionKind, ChangePayload, ChangeRow, DiffObject, TableRef, Value};
use crate::services::dialect::{QueryDialect, SqliteDialect};

/// How long a writer waits on another connection's lock before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Open a SQLite database from a path or a `sqlite:` / `sqlite://` URL
pub fn open_connection<P: AsRef<Path>>(db_path: P) -> rusqlite::Result<Connection> {
    let path_str = db_path.as_ref().to_string_lossy();
    let clean_path: &str = if path_str.starts_with("sqlite:") {
        path_str.trim_start_matches("sqlite:").trim_start_matches("//")
    } else {
        path_str.as_ref()
    };

    let conn = Connection::open(clean_path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    Ok(conn)
}

/// Source of diff objects for the apply engine
pub trait DiffObjectReader {
    /// Load an object's change rows in stored order
    fn read_diff(&self, object_id: &str) -> Result<DiffObject, ApplyError>;
}

/// Action payload as stored in an object's `sg_action_data` column
#[derive(Debug, Serialize, Deserialize)]
struct ActionData {
    c: Vec<String>,
    v: Vec<serde_json::Value>,
}

/// Diff objects stored as tables next to the destination tables.
///
/// Each object is a table named after its id holding the identity columns
/// followed by `sg_action_kind` and `sg_action_data`. The `sg_objects`
/// registry records which stored columns form the identity.
pub struct SqliteObjectStore<'a> {
    conn: &'a Connection,
    dialect: SqliteDialect,
}

impl<'a> SqliteObjectStore<'a> {
    pub fn new(conn: &'a Connection) -> rusqlite::Result<Self> {
        let store = Self {
            conn,
            dialect: SqliteDialect::new(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS sg_objects (
                object_id TEXT PRIMARY KEY,
                identity_columns TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;
        Ok(())
    }

    /// Persist a diff object. Rows are read back in the order written.
    pub fn write_diff(&self, diff: &DiffObject) -> Result<(), ApplyError> {
        diff.validate()?;

        // JSON has no NaN or infinity; storing them would read back as null
        if diff
            .rows
            .iter()
            .any(|row| row.payload.values.iter().any(Value::is_non_finite))
        {
            return Err(ApplyError::InvalidActionData {
                object_id: diff.object_id.clone(),
                reason: "non-finite float in action data".to_string(),
            });
        }

        let identity_json = serde_json::to_string(&diff.identity_columns)
            .map_err(|e| ApplyError::Internal(e.to_string()))?;

        let tx = self.conn.unchecked_transaction()?;

        let column_defs = diff
            .identity_columns
            .iter()
            .map(|c| self.dialect.quote_identifier(c))
            .chain([
                format!("{} INTEGER NOT NULL", self.dialect.quote_identifier(DiffObject::ACTION_KIND_COLUMN)),
                format!("{} TEXT", self.dialect.quote_identifier(DiffObject::ACTION_DATA_COLUMN)),
            ])
            .collect::<Vec<_>>()
            .join(", ");
        let object_table = self.dialect.quote_identifier(&diff.object_id);
        tx.execute(&format!("CREATE TABLE {} ({})", object_table, column_defs), [])?;

        tx.execute(
            "INSERT INTO sg_objects (object_id, identity_columns, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![diff.object_id, identity_json, chrono::Utc::now().to_rfc3339()],
        )?;

        let placeholders = vec!["?"; diff.identity_columns.len() + 2].join(", ");
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} VALUES ({})",
                object_table, placeholders
            ))?;

            for row in &diff.rows {
                let action_data = match row.action {
                    ActionKind::Delete => None,
                    ActionKind::Insert | ActionKind::Update => Some(
                        serde_json::to_string(&ActionData {
                            c: row.payload.columns.clone(),
                            v: row.payload.values.iter().map(Value::to_json).collect(),
                        })
                        .map_err(|e| ApplyError::Internal(e.to_string()))?,
                    ),
                };

                let code = row.action.code();
                let mut params: Vec<&dyn rusqlite::ToSql> =
                    row.identity.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
                params.push(&code);
                params.push(&action_data);
                stmt.execute(params.as_slice())?;
            }
        }

        tx.commit()?;
        debug!(object_id = %diff.object_id, rows = diff.rows.len(), "stored diff object");
        Ok(())
    }
}

impl DiffObjectReader for SqliteObjectStore<'_> {
    fn read_diff(&self, object_id: &str) -> Result<DiffObject, ApplyError> {
        let identity_json: Option<String> = self
            .conn
            .query_row(
                "SELECT identity_columns FROM sg_objects WHERE object_id = ?1",
                [object_id],
                |row| row.get(0),
            )
            .optional()?;
        let identity_json =
            identity_json.ok_or_else(|| ApplyError::ObjectNotFound(object_id.to_string()))?;

        let identity_columns: Vec<String> = serde_json::from_str(&identity_json).map_err(|e| {
            ApplyError::MalformedDiffObject {
                object_id: object_id.to_string(),
                reason: format!("unreadable identity columns: {}", e),
            }
        })?;

        let stored_columns = self
            .conn
            .describe_table(&TableRef::new(object_id))
            .map_err(|e| match e {
                ApplyError::TableNotFound(_) => ApplyError::ObjectNotFound(object_id.to_string()),
                other => other,
            })?
            .columns;

        let mut diff = DiffObject {
            object_id: object_id.to_string(),
            identity_columns,
            stored_columns,
            rows: Vec::new(),
        };
        // Shape errors are reported before the action columns are read
        diff.validate()?;

        let select_list = diff
            .identity_columns
            .iter()
            .map(String::as_str)
            .chain([DiffObject::ACTION_KIND_COLUMN, DiffObject::ACTION_DATA_COLUMN])
            .map(|c| self.dialect.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY rowid",
            select_list,
            self.dialect.quote_identifier(object_id)
        ))?;

        let ri_count = diff.identity_columns.len();
        let raw_rows = stmt
            .query_map([], |row| {
                let identity = (0..ri_count)
                    .map(|i| row.get::<_, rusqlite::types::Value>(i).map(Value::from))
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                let kind: i64 = row.get(ri_count)?;
                let data: Option<String> = row.get(ri_count + 1)?;
                Ok((identity, kind, data))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for (identity, kind, data) in raw_rows {
            let action = ActionKind::from_code(kind).ok_or_else(|| ApplyError::InvalidActionData {
                object_id: object_id.to_string(),
                reason: format!("unknown action kind {}", kind),
            })?;

            let payload = match action {
                ActionKind::Delete => ChangePayload::default(),
                ActionKind::Insert | ActionKind::Update => {
                    parse_action_data(object_id, data.as_deref())?
                }
            };

            diff.rows.push(ChangeRow {
                identity,
                action,
                payload,
            });
        }

        diff.validate()?;
        debug!(object_id, rows = diff.rows.len(), "loaded diff object");
        Ok(diff)
    }
}

fn parse_action_data(object_id: &str, data: Option<&str>) -> Result<ChangePayload, ApplyError> {
    let invalid = |reason: String| ApplyError::InvalidActionData {
        object_id: object_id.to_string(),
        reason,
    };

    let data = data.ok_or_else(|| invalid("missing action data".to_string()))?;
    let parsed: ActionData =
        serde_json::from_str(data).map_err(|e| invalid(e.to_string()))?;

    Ok(ChangePayload::new(
        parsed.c,
        parsed.v.iter().map(Value::from_json).collect(),
    ))
}
