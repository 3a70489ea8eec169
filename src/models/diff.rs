use super::schema::TableRef;
use super::value::Value;
use crate::error::ApplyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a change row does to the destination row it identifies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Insert,
    Delete,
    Update,
}

impl ActionKind {
    /// Integer stored in an object's `sg_action_kind` column
    pub fn code(self) -> i64 {
        match self {
            ActionKind::Insert => 0,
            ActionKind::Delete => 1,
            ActionKind::Update => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ActionKind::Insert),
            1 => Some(ActionKind::Delete),
            2 => Some(ActionKind::Update),
            _ => None,
        }
    }
}

/// Non-identity columns written by an insert or update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangePayload {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl ChangePayload {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRow {
    /// Values of the replica-identity columns, in identity order
    pub identity: Vec<Value>,
    pub action: ActionKind,
    pub payload: ChangePayload,
}

impl ChangeRow {
    pub fn delete(identity: Vec<Value>) -> Self {
        Self {
            identity,
            action: ActionKind::Delete,
            payload: ChangePayload::default(),
        }
    }

    pub fn insert(identity: Vec<Value>, columns: &[&str], values: Vec<Value>) -> Self {
        Self {
            identity,
            action: ActionKind::Insert,
            payload: ChangePayload::new(columns.iter().map(|c| c.to_string()).collect(), values),
        }
    }

    pub fn update(identity: Vec<Value>, columns: &[&str], values: Vec<Value>) -> Self {
        Self {
            identity,
            action: ActionKind::Update,
            payload: ChangePayload::new(columns.iter().map(|c| c.to_string()).collect(), values),
        }
    }
}

/// Row-level changes between two versions of a table
#[derive(Debug, Clone, PartialEq)]
pub struct DiffObject {
    pub object_id: String,
    /// Replica-identity columns the change rows are keyed on
    pub identity_columns: Vec<String>,
    /// Every column the object itself stores, identity columns first
    pub stored_columns: Vec<String>,
    pub rows: Vec<ChangeRow>,
}

impl DiffObject {
    /// Column names of the action tag and payload following the identity prefix
    pub const ACTION_KIND_COLUMN: &'static str = "sg_action_kind";
    pub const ACTION_DATA_COLUMN: &'static str = "sg_action_data";

    pub fn new(object_id: impl Into<String>, identity_columns: &[&str], rows: Vec<ChangeRow>) -> Self {
        let identity_columns: Vec<String> = identity_columns.iter().map(|c| c.to_string()).collect();
        let stored_columns = identity_columns
            .iter()
            .cloned()
            .chain([
                Self::ACTION_KIND_COLUMN.to_string(),
                Self::ACTION_DATA_COLUMN.to_string(),
            ])
            .collect();

        Self {
            object_id: object_id.into(),
            identity_columns,
            stored_columns,
            rows,
        }
    }

    pub fn rows_of(&self, action: ActionKind) -> impl Iterator<Item = &ChangeRow> {
        self.rows.iter().filter(move |row| row.action == action)
    }

    /// Check the object's own shape before anything touches a destination.
    ///
    /// The identity columns must be a strict subset of the stored columns:
    /// an object keyed on every column it stores was written without key
    /// constraints and carries no action columns.
    pub fn validate(&self) -> Result<(), ApplyError> {
        let malformed = |reason: String| ApplyError::MalformedDiffObject {
            object_id: self.object_id.clone(),
            reason,
        };

        if self.identity_columns.is_empty() {
            return Err(malformed("no identity columns".to_string()));
        }
        if let Some(missing) = self
            .identity_columns
            .iter()
            .find(|c| !self.stored_columns.contains(*c))
        {
            return Err(malformed(format!("identity column {} is not stored", missing)));
        }
        if self
            .stored_columns
            .iter()
            .all(|c| self.identity_columns.contains(c))
        {
            return Err(malformed(
                "identity spans every stored column. Have primary key constraints been applied?"
                    .to_string(),
            ));
        }

        for (i, row) in self.rows.iter().enumerate() {
            if row.identity.len() != self.identity_columns.len() {
                return Err(malformed(format!(
                    "row {} has {} identity values, expected {}",
                    i,
                    row.identity.len(),
                    self.identity_columns.len()
                )));
            }
            if row.payload.columns.len() != row.payload.values.len() {
                return Err(malformed(format!(
                    "row {} has {} payload columns but {} values",
                    i,
                    row.payload.columns.len(),
                    row.payload.values.len()
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of one committed apply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    pub object_id: String,
    pub table: TableRef,
    pub deleted: usize,
    pub inserted: usize,
    pub updated: usize,
    pub applied_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_codes() {
        for kind in [ActionKind::Insert, ActionKind::Delete, ActionKind::Update] {
            assert_eq!(ActionKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ActionKind::from_code(3), None);
    }

    #[test]
    fn test_stored_columns_follow_identity() {
        let diff = DiffObject::new("o1", &["id"], vec![]);
        assert_eq!(diff.stored_columns, vec!["id", "sg_action_kind", "sg_action_data"]);
        assert!(diff.validate().is_ok());
    }

    #[test]
    fn test_identity_spanning_all_columns_is_malformed() {
        let mut diff = DiffObject::new("o1", &["id"], vec![]);
        diff.stored_columns = vec!["id".to_string()];
        assert!(matches!(
            diff.validate(),
            Err(ApplyError::MalformedDiffObject { .. })
        ));
    }

    #[test]
    fn test_short_identity_prefix_is_malformed() {
        let diff = DiffObject::new(
            "o1",
            &["id", "region"],
            vec![ChangeRow::delete(vec![Value::Integer(1)])],
        );
        assert!(matches!(
            diff.validate(),
            Err(ApplyError::MalformedDiffObject { .. })
        ));
    }
}
