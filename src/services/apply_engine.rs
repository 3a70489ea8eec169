// Diff apply engine
//
// Replays a diff object's change rows against a destination table inside one
// transaction: deletes first, then inserts, then updates. Values are always
// bound as statement parameters; only identifiers are rendered as text.

use rusqlite::{Connection, ToSql, TransactionBehavior};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::dialect::{QueryDialect, SqliteDialect};
use crate::error::ApplyError;
use crate::models::{ActionKind, ApplyReport, ChangeRow, DiffObject, TableRef, Value};
use crate::storage::catalog::{TableDescription, TableMetadataProvider};

/// Upper bound on parameters bound to one statement
const MAX_BOUND_PARAMETERS: usize = 999;

/// Renders the statements the engine prepares against a destination table
pub struct StatementBuilder {
    dialect: SqliteDialect,
}

impl StatementBuilder {
    pub fn new() -> Self {
        Self {
            dialect: SqliteDialect::new(),
        }
    }

    pub fn target(&self, table: &TableRef) -> String {
        format!(
            "{}.{}",
            self.dialect.quote_identifier(table.schema_or_main()),
            self.dialect.quote_identifier(&table.table)
        )
    }

    fn column_list(&self, columns: &[&str]) -> String {
        columns
            .iter()
            .map(|c| self.dialect.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn placeholders(count: usize) -> String {
        vec!["?"; count].join(", ")
    }

    /// One statement removing every row whose identity matches one of
    /// `row_count` bound identity tuples
    pub fn delete(&self, table: &TableRef, identity_columns: &[&str], row_count: usize) -> String {
        let target = self.target(table);
        if let [column] = identity_columns {
            return format!(
                "DELETE FROM {} WHERE {} IN ({})",
                target,
                self.dialect.quote_identifier(column),
                Self::placeholders(row_count)
            );
        }

        let tuple = format!("({})", Self::placeholders(identity_columns.len()));
        let tuples = vec![tuple.as_str(); row_count].join(", ");
        format!(
            "DELETE FROM {} WHERE ({}) IN (VALUES {})",
            target,
            self.column_list(identity_columns),
            tuples
        )
    }

    pub fn insert(&self, table: &TableRef, columns: &[&str]) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.target(table),
            self.column_list(columns),
            Self::placeholders(columns.len())
        )
    }

    /// Binds the SET values first, then the identity values
    pub fn update(&self, table: &TableRef, columns: &[&str], identity_columns: &[&str]) -> String {
        let assignments = columns
            .iter()
            .map(|c| format!("{} = ?", self.dialect.quote_identifier(c)))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "UPDATE {} SET {} WHERE {}",
            self.target(table),
            assignments,
            self.identity_predicate(identity_columns)
        )
    }

    fn identity_predicate(&self, identity_columns: &[&str]) -> String {
        identity_columns
            .iter()
            .map(|c| format!("{} = ?", self.dialect.quote_identifier(c)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

impl Default for StatementBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies diff objects to destination tables.
///
/// Holds no state between calls. Callers must not run two applies against
/// the same destination table at once; `ApplyService` serializes them.
pub struct ApplyEngine {
    statements: StatementBuilder,
}

impl ApplyEngine {
    pub fn new() -> Self {
        Self {
            statements: StatementBuilder::new(),
        }
    }

    /// Apply `diff` to `table` as one transaction.
    ///
    /// Nothing is visible unless every phase succeeds; any error rolls the
    /// whole apply back.
    pub fn apply(
        &self,
        conn: &mut Connection,
        diff: &DiffObject,
        table: &TableRef,
    ) -> Result<ApplyReport, ApplyError> {
        diff.validate()?;

        // Take the write lock up front so concurrent writers queue behind us
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let description = tx.describe_table(table)?;
        self.check_schema(diff, table, &description)?;

        let identity_columns: Vec<&str> = diff.identity_columns.iter().map(String::as_str).collect();

        let deleted = self.apply_deletes(&tx, diff, table, &identity_columns)?;
        let inserted = self.apply_inserts(&tx, diff, table, &identity_columns)?;
        let updated = self.apply_updates(&tx, diff, table, &identity_columns)?;

        tx.commit()?;

        info!(
            object_id = %diff.object_id,
            table = %table,
            deleted,
            inserted,
            updated,
            "applied diff object"
        );

        Ok(ApplyReport {
            object_id: diff.object_id.clone(),
            table: table.clone(),
            deleted,
            inserted,
            updated,
            applied_at: chrono::Utc::now(),
        })
    }

    /// Every column the diff writes or matches on must exist in the
    /// destination, which itself needs a replica identity
    fn check_schema(
        &self,
        diff: &DiffObject,
        table: &TableRef,
        description: &TableDescription,
    ) -> Result<(), ApplyError> {
        if description.identity_columns.is_empty() {
            return Err(ApplyError::MissingReplicaIdentity {
                table: table.to_string(),
            });
        }

        let same_identity = description.identity_columns.len() == diff.identity_columns.len()
            && description
                .identity_columns
                .iter()
                .zip(&diff.identity_columns)
                .all(|(a, b)| a.eq_ignore_ascii_case(b));
        if !same_identity {
            warn!(
                object_id = %diff.object_id,
                table = %table,
                object_identity = ?diff.identity_columns,
                table_identity = ?description.identity_columns,
                "object and table replica identities differ, matching on the object's"
            );
        }

        // SQLite resolves column names case-insensitively (ASCII only)
        let mut checked: HashSet<String> = HashSet::new();
        let referenced = diff
            .identity_columns
            .iter()
            .chain(diff.rows.iter().flat_map(|row| row.payload.columns.iter()));

        for column in referenced {
            if checked.insert(column.to_ascii_lowercase()) && !description.has_column(column) {
                return Err(ApplyError::SchemaMismatch {
                    table: table.to_string(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    fn apply_deletes(
        &self,
        conn: &Connection,
        diff: &DiffObject,
        table: &TableRef,
        identity_columns: &[&str],
    ) -> Result<usize, ApplyError> {
        let deletes: Vec<&ChangeRow> = diff.rows_of(ActionKind::Delete).collect();
        if deletes.is_empty() {
            return Ok(0);
        }

        let batch_rows = (MAX_BOUND_PARAMETERS / identity_columns.len()).max(1);
        let mut deleted = 0;

        for batch in deletes.chunks(batch_rows) {
            let sql = self.statements.delete(table, identity_columns, batch.len());
            let params: Vec<&dyn ToSql> = batch
                .iter()
                .flat_map(|row| row.identity.iter().map(|v| v as &dyn ToSql))
                .collect();
            deleted += conn.prepare_cached(&sql)?.execute(params.as_slice())?;
        }

        debug!(object_id = %diff.object_id, requested = deletes.len(), deleted, "delete phase done");
        Ok(deleted)
    }

    fn apply_inserts(
        &self,
        conn: &Connection,
        diff: &DiffObject,
        table: &TableRef,
        identity_columns: &[&str],
    ) -> Result<usize, ApplyError> {
        let mut inserted = 0;

        // Rows sharing a column set reuse one cached statement
        for row in diff.rows_of(ActionKind::Insert) {
            let columns: Vec<&str> = identity_columns
                .iter()
                .copied()
                .chain(row.payload.columns.iter().map(String::as_str))
                .collect();
            let params: Vec<&Value> = row.identity.iter().chain(&row.payload.values).collect();

            let sql = self.statements.insert(table, &columns);
            inserted += conn
                .prepare_cached(&sql)?
                .execute(rusqlite::params_from_iter(params))?;
        }

        debug!(object_id = %diff.object_id, inserted, "insert phase done");
        Ok(inserted)
    }

    fn apply_updates(
        &self,
        conn: &Connection,
        diff: &DiffObject,
        table: &TableRef,
        identity_columns: &[&str],
    ) -> Result<usize, ApplyError> {
        let mut updated = 0;

        for row in diff.rows_of(ActionKind::Update) {
            if row.payload.is_empty() {
                continue;
            }

            let columns: Vec<&str> = row.payload.columns.iter().map(String::as_str).collect();
            let params: Vec<&Value> = row.payload.values.iter().chain(&row.identity).collect();

            let sql = self.statements.update(table, &columns, identity_columns);
            let changed = conn
                .prepare_cached(&sql)?
                .execute(rusqlite::params_from_iter(params))?;

            if changed == 0 {
                warn!(object_id = %diff.object_id, identity = ?row.identity, "update matched no row");
            }
            updated += changed;
        }

        debug!(object_id = %diff.object_id, updated, "update phase done");
        Ok(updated)
    }
}

impl Default for ApplyEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::SQLiteDialect;
    use sqlparser::parser::Parser;

    fn fruits() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE fruits (id INTEGER PRIMARY KEY, name TEXT, colour TEXT);
            INSERT INTO fruits VALUES (1, 'apple', 'green'), (3, 'potato', 'brown'), (4, 'kiwi', 'green');
            "#,
        )
        .unwrap();
        conn
    }

    fn contents(conn: &Connection) -> Vec<(i64, Option<String>, Option<String>)> {
        let mut stmt = conn
            .prepare("SELECT id, name, colour FROM fruits ORDER BY id")
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    fn row(id: i64, name: &str, colour: &str) -> (i64, Option<String>, Option<String>) {
        (id, Some(name.to_string()), Some(colour.to_string()))
    }

    #[test]
    fn test_statements_parse() {
        let builder = StatementBuilder::new();
        let table = TableRef::new("fruits");
        let statements = [
            builder.delete(&table, &["id"], 3),
            builder.insert(&table, &["id", "name"]),
            builder.update(&table, &["name", "colour"], &["id", "region"]),
        ];

        for sql in &statements {
            let parsed = Parser::parse_sql(&SQLiteDialect {}, sql);
            assert!(parsed.is_ok(), "failed to parse {}: {:?}", sql, parsed);
        }
        assert_eq!(statements[0], r#"DELETE FROM "main"."fruits" WHERE "id" IN (?, ?, ?)"#);
        assert_eq!(
            statements[2],
            r#"UPDATE "main"."fruits" SET "name" = ?, "colour" = ? WHERE "id" = ? AND "region" = ?"#
        );
    }

    #[test]
    fn test_composite_delete_statement() {
        let sql = StatementBuilder::new().delete(&TableRef::new("t"), &["a", "b"], 2);
        assert_eq!(
            sql,
            r#"DELETE FROM "main"."t" WHERE ("a", "b") IN (VALUES (?, ?), (?, ?))"#
        );
    }

    #[test]
    fn test_apply_end_to_end() {
        let mut conn = fruits();
        let diff = DiffObject::new(
            "o1",
            &["id"],
            vec![
                ChangeRow::delete(vec![Value::Integer(1)]),
                ChangeRow::insert(vec![Value::Integer(2)], &["name"], vec![Value::from("orange")]),
                ChangeRow::update(vec![Value::Integer(3)], &["name"], vec![Value::from("carrot")]),
            ],
        );

        let report = ApplyEngine::new()
            .apply(&mut conn, &diff, &TableRef::new("fruits"))
            .unwrap();

        assert_eq!((report.deleted, report.inserted, report.updated), (1, 1, 1));
        assert_eq!(
            contents(&conn),
            vec![
                (2, Some("orange".to_string()), None),
                row(3, "carrot", "brown"),
                row(4, "kiwi", "green"),
            ]
        );
    }

    #[test]
    fn test_delete_then_insert_same_key() {
        let mut conn = fruits();
        let diff = DiffObject::new(
            "o2",
            &["id"],
            vec![
                ChangeRow::insert(
                    vec![Value::Integer(1)],
                    &["name", "colour"],
                    vec![Value::from("pear"), Value::from("yellow")],
                ),
                ChangeRow::delete(vec![Value::Integer(1)]),
            ],
        );

        ApplyEngine::new()
            .apply(&mut conn, &diff, &TableRef::new("fruits"))
            .unwrap();

        assert_eq!(contents(&conn)[0], row(1, "pear", "yellow"));
    }

    #[test]
    fn test_insert_then_update_same_key() {
        // Updates run after inserts, so they see rows inserted by the same diff
        let mut conn = fruits();
        let diff = DiffObject::new(
            "o3",
            &["id"],
            vec![
                ChangeRow::update(vec![Value::Integer(5)], &["colour"], vec![Value::from("red")]),
                ChangeRow::insert(
                    vec![Value::Integer(5)],
                    &["name", "colour"],
                    vec![Value::from("cherry"), Value::from("black")],
                ),
            ],
        );

        let report = ApplyEngine::new()
            .apply(&mut conn, &diff, &TableRef::new("fruits"))
            .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(contents(&conn).last().unwrap(), &row(5, "cherry", "red"));
    }

    #[test]
    fn test_inserts_with_differing_columns() {
        let mut conn = fruits();
        let diff = DiffObject::new(
            "o4",
            &["id"],
            vec![
                ChangeRow::insert(vec![Value::Integer(10)], &["name"], vec![Value::from("lime")]),
                ChangeRow::insert(
                    vec![Value::Integer(11)],
                    &["colour", "name"],
                    vec![Value::from("purple"), Value::from("plum")],
                ),
                ChangeRow::insert(vec![Value::Integer(12)], &["name"], vec![Value::from("fig")]),
            ],
        );

        let report = ApplyEngine::new()
            .apply(&mut conn, &diff, &TableRef::new("fruits"))
            .unwrap();

        assert_eq!(report.inserted, 3);
        let rows = contents(&conn);
        assert!(rows.contains(&(10, Some("lime".to_string()), None)));
        assert!(rows.contains(&row(11, "plum", "purple")));
        assert!(rows.contains(&(12, Some("fig".to_string()), None)));
    }

    #[test]
    fn test_schema_mismatch_leaves_table_untouched() {
        let mut conn = fruits();
        let before = contents(&conn);
        let diff = DiffObject::new(
            "o5",
            &["id"],
            vec![
                ChangeRow::delete(vec![Value::Integer(1)]),
                ChangeRow::insert(vec![Value::Integer(2)], &["name"], vec![Value::from("orange")]),
                ChangeRow::update(vec![Value::Integer(3)], &["weight"], vec![Value::Integer(200)]),
            ],
        );

        let err = ApplyEngine::new()
            .apply(&mut conn, &diff, &TableRef::new("fruits"))
            .unwrap_err();

        assert!(matches!(err, ApplyError::SchemaMismatch { ref column, .. } if column == "weight"));
        assert_eq!(contents(&conn), before);
    }

    #[test]
    fn test_failure_mid_apply_rolls_back() {
        // The insert collides with an existing key after the delete phase ran
        let mut conn = fruits();
        let before = contents(&conn);
        let diff = DiffObject::new(
            "o6",
            &["id"],
            vec![
                ChangeRow::delete(vec![Value::Integer(1)]),
                ChangeRow::insert(vec![Value::Integer(4)], &["name"], vec![Value::from("dup")]),
            ],
        );

        let err = ApplyEngine::new()
            .apply(&mut conn, &diff, &TableRef::new("fruits"))
            .unwrap_err();

        assert!(matches!(err, ApplyError::Storage(_)));
        assert_eq!(contents(&conn), before);
    }

    #[test]
    fn test_missing_replica_identity() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE loose (id INTEGER, name TEXT)", []).unwrap();
        let diff = DiffObject::new("o7", &["id"], vec![ChangeRow::delete(vec![Value::Integer(1)])]);

        let err = ApplyEngine::new()
            .apply(&mut conn, &diff, &TableRef::new("loose"))
            .unwrap_err();
        assert!(matches!(err, ApplyError::MissingReplicaIdentity { .. }));
    }

    #[test]
    fn test_malformed_object_is_rejected() {
        let mut conn = fruits();
        let mut diff = DiffObject::new("o8", &["id"], vec![]);
        diff.stored_columns = vec!["id".to_string()];

        let err = ApplyEngine::new()
            .apply(&mut conn, &diff, &TableRef::new("fruits"))
            .unwrap_err();
        assert!(matches!(err, ApplyError::MalformedDiffObject { .. }));
    }

    #[test]
    fn test_composite_identity() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE stock (shop TEXT, item TEXT, qty INTEGER, PRIMARY KEY (shop, item));
            INSERT INTO stock VALUES ('a', 'x', 1), ('a', 'y', 2), ('b', 'x', 3);
            "#,
        )
        .unwrap();

        let diff = DiffObject::new(
            "o9",
            &["shop", "item"],
            vec![
                ChangeRow::delete(vec![Value::from("a"), Value::from("x")]),
                ChangeRow::delete(vec![Value::from("b"), Value::from("x")]),
                ChangeRow::update(vec![Value::from("a"), Value::from("y")], &["qty"], vec![Value::Integer(9)]),
            ],
        );

        let report = ApplyEngine::new()
            .apply(&mut conn, &diff, &TableRef::new("stock"))
            .unwrap();
        assert_eq!(report.deleted, 2);

        let remaining: Vec<(String, String, i64)> = conn
            .prepare("SELECT shop, item, qty FROM stock")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(remaining, vec![("a".to_string(), "y".to_string(), 9)]);
    }

    #[test]
    fn test_values_are_bound_not_interpolated() {
        let mut conn = fruits();
        let hostile = "x'); DROP TABLE fruits; --";
        let diff = DiffObject::new(
            "o10",
            &["id"],
            vec![ChangeRow::insert(vec![Value::Integer(20)], &["name"], vec![Value::from(hostile)])],
        );

        ApplyEngine::new()
            .apply(&mut conn, &diff, &TableRef::new("fruits"))
            .unwrap();

        let name: String = conn
            .query_row("SELECT name FROM fruits WHERE id = 20", [], |row| row.get(0))
            .unwrap();
        assert_eq!(name, hostile);
    }

    #[test]
    fn test_many_deletes_are_batched() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE big (id INTEGER PRIMARY KEY)", []).unwrap();
        {
            let tx = conn.transaction().unwrap();
            for i in 0..2500i64 {
                tx.execute("INSERT INTO big VALUES (?1)", [i]).unwrap();
            }
            tx.commit().unwrap();
        }

        let rows = (0..2000i64).map(|i| ChangeRow::delete(vec![Value::Integer(i)])).collect();
        let diff = DiffObject::new("o11", &["id"], rows);

        let report = ApplyEngine::new()
            .apply(&mut conn, &diff, &TableRef::new("big"))
            .unwrap();
        assert_eq!(report.deleted, 2000);

        let left: i64 = conn.query_row("SELECT COUNT(*) FROM big", [], |row| row.get(0)).unwrap();
        assert_eq!(left, 500);
    }

    #[test]
    fn test_blob_identity_through_stored_object() {
        use crate::storage::sqlite::{DiffObjectReader, SqliteObjectStore};

        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE files (id BLOB PRIMARY KEY, label TEXT, body BLOB);
            INSERT INTO files (id, label) VALUES (x'FF00', 'gone'), (x'0102', 'old');
            "#,
        )
        .unwrap();

        let diff = DiffObject::new(
            "o12",
            &["id"],
            vec![
                ChangeRow::delete(vec![Value::Blob(vec![0xff, 0x00])]),
                ChangeRow::update(vec![Value::Blob(vec![0x01, 0x02])], &["label"], vec![Value::from("new")]),
                ChangeRow::insert(
                    vec![Value::Blob(vec![0xab])],
                    &["label", "body"],
                    vec![Value::from("added"), Value::Blob(vec![0x00, 0xfe])],
                ),
            ],
        );
        let loaded = {
            let store = SqliteObjectStore::new(&conn).unwrap();
            store.write_diff(&diff).unwrap();
            store.read_diff("o12").unwrap()
        };
        assert_eq!(loaded.rows[0].identity, vec![Value::Blob(vec![0xff, 0x00])]);

        let report = ApplyEngine::new()
            .apply(&mut conn, &loaded, &TableRef::new("files"))
            .unwrap();
        assert_eq!((report.deleted, report.inserted, report.updated), (1, 1, 1));

        let rows: Vec<(Vec<u8>, String, Option<Vec<u8>>)> = conn
            .prepare("SELECT id, label, body FROM files ORDER BY id")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(
            rows,
            vec![
                (vec![0x01, 0x02], "new".to_string(), None),
                (vec![0xab], "added".to_string(), Some(vec![0x00, 0xfe])),
            ]
        );
    }

    #[test]
    fn test_column_names_match_case_insensitively() {
        let mut conn = fruits();
        let diff = DiffObject::new(
            "o13",
            &["ID"],
            vec![ChangeRow::update(vec![Value::Integer(3)], &["Name"], vec![Value::from("yam")])],
        );

        let report = ApplyEngine::new()
            .apply(&mut conn, &diff, &TableRef::new("fruits"))
            .unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(contents(&conn)[1], row(3, "yam", "brown"));
    }
}
