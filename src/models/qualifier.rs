use super::value::Value;
use serde::{Deserialize, Serialize};

/// Comparison operator of a pushed-down qualifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
    /// `<>`
    Ne,
    /// `!=`
    NotEq,
    /// Pattern match (`~~` in a query plan)
    Like,
    /// Anything the remote dialect cannot express
    Other(String),
}

impl Operator {
    pub fn parse(op: &str) -> Self {
        match op {
            "=" => Operator::Eq,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            "<>" => Operator::Ne,
            "!=" => Operator::NotEq,
            "~~" => Operator::Like,
            other => Operator::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Operator::Eq => "=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Ne => "<>",
            Operator::NotEq => "!=",
            Operator::Like => "~~",
            Operator::Other(op) => op,
        }
    }
}

/// How a qualifier's value list combines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Quantifier {
    /// Plain `column op value`
    #[default]
    None,
    /// `column op ANY(list)`
    Any,
    /// `column op ALL(list)`
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QualifierValue {
    Single(Value),
    List(Vec<Value>),
}

/// One predicate pushed down from a query plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Qualifier {
    pub column: String,
    pub operator: Operator,
    pub value: QualifierValue,
    #[serde(default)]
    pub quantifier: Quantifier,
}

impl Qualifier {
    pub fn new(column: impl Into<String>, operator: &str, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            operator: Operator::parse(operator),
            value: QualifierValue::Single(value.into()),
            quantifier: Quantifier::None,
        }
    }

    pub fn any(column: impl Into<String>, operator: &str, values: Vec<Value>) -> Self {
        Self {
            column: column.into(),
            operator: Operator::parse(operator),
            value: QualifierValue::List(values),
            quantifier: Quantifier::Any,
        }
    }

    pub fn all(column: impl Into<String>, operator: &str, values: Vec<Value>) -> Self {
        Self {
            column: column.into(),
            operator: Operator::parse(operator),
            value: QualifierValue::List(values),
            quantifier: Quantifier::All,
        }
    }
}

/// Requested ordering on one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    pub is_reversed: bool,
    pub nulls_first: bool,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            is_reversed: false,
            nulls_first: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            is_reversed: true,
            nulls_first: true,
        }
    }
}
