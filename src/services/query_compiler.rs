// Foreign query compiler
//
// Translates qualifiers, projections and sort keys from an upstream scan
// planner into textual fragments of the remote source's query language.
// Fragments are assembled into a request by the caller.

use std::sync::Arc;
use tracing::warn;

use super::dialect::{QueryDialect, SoqlDialect};
use crate::error::CompileError;
use crate::models::{Operator, Qualifier, QualifierValue, Quantifier, SortKey, Value};

/// Expression that every row satisfies
const ALWAYS_TRUE: &str = "TRUE";

/// Push-down fragments for one remote scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteQuery {
    pub select: String,
    pub filter: String,
    pub order: String,
}

impl RemoteQuery {
    /// Request parameters of the source's query endpoint
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(3);
        if !self.select.is_empty() {
            params.push(("$select", self.select.clone()));
        }
        params.push(("$where", self.filter.clone()));
        params.push(("$order", self.order.clone()));
        params
    }
}

/// Compiles push-down fragments for one dialect.
///
/// Pure and reentrant; one instance can be shared by any number of
/// concurrent scan plans.
pub struct QueryCompiler {
    dialect: Arc<dyn QueryDialect>,
    row_id_column: String,
}

impl QueryCompiler {
    pub fn new(dialect: Arc<dyn QueryDialect>, row_id_column: impl Into<String>) -> Self {
        Self {
            dialect,
            row_id_column: row_id_column.into(),
        }
    }

    /// SoQL compiler ordering on the `:id` system column by default
    pub fn soql() -> Self {
        Self::new(Arc::new(SoqlDialect::new()), ":id")
    }

    pub fn dialect_name(&self) -> &str {
        self.dialect.dialect_name()
    }

    /// Conjunction of every qualifier, each parenthesized.
    ///
    /// Never excludes a row the qualifiers would keep: anything that cannot
    /// be expressed remotely compiles to `TRUE` and must be re-checked by
    /// the caller.
    pub fn compile_filter(&self, qualifiers: &[Qualifier]) -> String {
        if qualifiers.is_empty() {
            return ALWAYS_TRUE.to_string();
        }

        qualifiers
            .iter()
            .map(|qual| format!("({})", self.compile_qualifier(qual)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn compile_qualifier(&self, qual: &Qualifier) -> String {
        let joiner = match qual.quantifier {
            Quantifier::None => {
                return match &qual.value {
                    QualifierValue::Single(value) => {
                        self.compile_comparison(&qual.column, &qual.operator, value)
                    }
                    // A bare list has no meaning without ANY/ALL
                    QualifierValue::List(_) => {
                        warn!(column = %qual.column, "list value without quantifier, not pushed down");
                        ALWAYS_TRUE.to_string()
                    }
                };
            }
            Quantifier::Any => " OR ",
            Quantifier::All => " AND ",
        };

        let values = match &qual.value {
            QualifierValue::List(values) => values.as_slice(),
            QualifierValue::Single(value) => std::slice::from_ref(value),
        };

        if values.is_empty() {
            return ALWAYS_TRUE.to_string();
        }

        // col op ANY([a, b]) -> (col op a) OR (col op b)
        values
            .iter()
            .map(|value| format!("({})", self.compile_comparison(&qual.column, &qual.operator, value)))
            .collect::<Vec<_>>()
            .join(joiner)
    }

    fn compile_comparison(&self, column: &str, operator: &Operator, value: &Value) -> String {
        let Some(op) = remote_operator(operator) else {
            warn!(column, operator = operator.as_str(), "unsupported operator, not pushed down");
            return ALWAYS_TRUE.to_string();
        };

        match self.dialect.quote_literal(value) {
            Some(literal) => format!("{} {} {}", self.dialect.quote_identifier(column), op, literal),
            None => {
                warn!(column, value = %value, "value has no literal form, not pushed down");
                ALWAYS_TRUE.to_string()
            }
        }
    }

    pub fn compile_projection(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|column| self.dialect.quote_identifier(column))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Sort clause for the requested keys.
    ///
    /// The remote source only orders ascending with nulls last or descending
    /// with nulls first. With no keys, the row identifier alone keeps paging
    /// stable.
    pub fn compile_sort(&self, keys: &[SortKey]) -> Result<String, CompileError> {
        if keys.is_empty() {
            return Ok(self.dialect.quote_identifier(&self.row_id_column));
        }

        let mut clauses = Vec::with_capacity(keys.len());
        for key in keys {
            if key.nulls_first != key.is_reversed {
                return Err(CompileError::UnsupportedSortKey {
                    column: key.column.clone(),
                    is_reversed: key.is_reversed,
                    nulls_first: key.nulls_first,
                });
            }
            let order = if key.is_reversed { "DESC" } else { "ASC" };
            clauses.push(format!("{} {}", self.dialect.quote_identifier(&key.column), order));
        }
        Ok(clauses.join(","))
    }

    pub fn build_query(
        &self,
        projection: &[String],
        qualifiers: &[Qualifier],
        sort_keys: &[SortKey],
    ) -> Result<RemoteQuery, CompileError> {
        Ok(RemoteQuery {
            select: self.compile_projection(projection),
            filter: self.compile_filter(qualifiers),
            order: self.compile_sort(sort_keys)?,
        })
    }
}

fn remote_operator(operator: &Operator) -> Option<&'static str> {
    match operator {
        Operator::Eq => Some("="),
        Operator::Gt => Some(">"),
        Operator::Ge => Some(">="),
        Operator::Lt => Some("<"),
        Operator::Le => Some("<="),
        Operator::Ne => Some("<>"),
        Operator::NotEq => Some("!="),
        Operator::Like => Some("LIKE"),
        Operator::Other(_) => None,
    }
}
