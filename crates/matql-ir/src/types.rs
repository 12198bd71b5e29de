//! Type system and operator vocabularies for MATQL IR

use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL dialect of a source connection or destination store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[serde(alias = "postgresql")]
    Postgres,
    MySql,
    Sqlite,
    DuckDb,
}

impl Dialect {
    pub fn quote_char(self) -> char {
        match self {
            Dialect::MySql => '`',
            _ => '"',
        }
    }

    /// Bind placeholder for the 1-based parameter `index`
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres | Dialect::DuckDb => format!("${}", index),
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        }
    }

    /// Quote an identifier unless it is a plain `[A-Za-z_][A-Za-z0-9_]*`
    /// word that is not a reserved keyword
    pub fn quote_ident(self, ident: &str) -> String {
        if is_plain_ident(ident) && !is_reserved_word(ident) {
            return ident.to_string();
        }
        let q = self.quote_char();
        let escaped = ident.replace(q, &format!("{q}{q}"));
        format!("{q}{escaped}{q}")
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
            Dialect::DuckDb => "duckdb",
        };
        f.write_str(name)
    }
}

/// Keywords reserved in at least one supported dialect, sorted
const RESERVED_WORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric", "between", "both", "by", "case",
    "cast", "check", "collate", "column", "constraint", "create", "cross", "current_date", "current_time",
    "current_timestamp", "current_user", "default", "deferrable", "delete", "desc", "distinct", "do", "drop", "else",
    "end", "except", "exists", "false", "fetch", "for", "foreign", "from", "full", "grant", "group", "having", "in",
    "index", "initially", "inner", "insert", "intersect", "interval", "into", "is", "join", "key", "lateral",
    "leading", "left", "like", "limit", "localtime", "localtimestamp", "natural", "not", "null", "offset", "on",
    "only", "or", "order", "outer", "over", "placing", "primary", "qualify", "range", "references", "returning",
    "right", "rows", "select", "session_user", "set", "some", "symmetric", "table", "then", "to", "trailing", "true",
    "union", "unique", "update", "user", "using", "values", "variadic", "when", "where", "window", "with",
];

pub fn is_reserved_word(ident: &str) -> bool {
    RESERVED_WORDS
        .binary_search(&ident.to_ascii_lowercase().as_str())
        .is_ok()
}

pub fn is_plain_ident(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Destination store type vocabulary, independent of the source dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalType {
    Integer,
    Numeric,
    Text,
    Varchar(u32),
    Boolean,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Json,
    Bytes,
}

impl CanonicalType {
    /// Column type used in CREATE TABLE on the destination store
    pub fn ddl(&self, dialect: Dialect) -> String {
        let name = match (self, dialect) {
            (CanonicalType::Integer, _) => "BIGINT",
            (CanonicalType::Numeric, Dialect::DuckDb) => "DOUBLE",
            (CanonicalType::Numeric, Dialect::Sqlite) => "REAL",
            (CanonicalType::Numeric, _) => "NUMERIC",
            (CanonicalType::Text, Dialect::DuckDb) => "VARCHAR",
            (CanonicalType::Text, _) => "TEXT",
            (CanonicalType::Varchar(n), _) => return format!("VARCHAR({})", n),
            (CanonicalType::Boolean, _) => "BOOLEAN",
            (CanonicalType::Date, _) => "DATE",
            (CanonicalType::Time, _) => "TIME",
            (CanonicalType::Timestamp, Dialect::MySql) => "DATETIME",
            (CanonicalType::Timestamp, _) => "TIMESTAMP",
            (CanonicalType::TimestampTz, Dialect::MySql) => "TIMESTAMP",
            (CanonicalType::TimestampTz, Dialect::DuckDb) => "TIMESTAMPTZ",
            (CanonicalType::TimestampTz, _) => "TIMESTAMP WITH TIME ZONE",
            (CanonicalType::Json, Dialect::Postgres) => "JSONB",
            (CanonicalType::Json, Dialect::MySql) => "JSON",
            (CanonicalType::Json, _) => "VARCHAR",
            (CanonicalType::Bytes, Dialect::Postgres) => "BYTEA",
            (CanonicalType::Bytes, _) => "BLOB",
        };
        name.to_string()
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            CanonicalType::Date | CanonicalType::Time | CanonicalType::Timestamp | CanonicalType::TimestampTz
        )
    }

    pub fn is_text(&self) -> bool {
        matches!(self, CanonicalType::Text | CanonicalType::Varchar(_))
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalType::Integer => f.write_str("integer"),
            CanonicalType::Numeric => f.write_str("numeric"),
            CanonicalType::Text => f.write_str("text"),
            CanonicalType::Varchar(n) => write!(f, "varchar({})", n),
            CanonicalType::Boolean => f.write_str("boolean"),
            CanonicalType::Date => f.write_str("date"),
            CanonicalType::Time => f.write_str("time"),
            CanonicalType::Timestamp => f.write_str("timestamp"),
            CanonicalType::TimestampTz => f.write_str("timestamp with time zone"),
            CanonicalType::Json => f.write_str("json"),
            CanonicalType::Bytes => f.write_str("bytes"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=", alias = "<>")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
}

impl ComparisonOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Lt => "<",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Le => "<=",
            ComparisonOp::In => "IN",
            ComparisonOp::NotIn => "NOT IN",
        }
    }

    pub fn is_list(self) -> bool {
        matches!(self, ComparisonOp::In | ComparisonOp::NotIn)
    }

    /// Parse the free-form operator carried by join edges
    pub fn parse(op: &str) -> Option<Self> {
        match op.trim().to_ascii_uppercase().as_str() {
            "=" | "==" => Some(ComparisonOp::Eq),
            "!=" | "<>" => Some(ComparisonOp::Ne),
            ">" => Some(ComparisonOp::Gt),
            "<" => Some(ComparisonOp::Lt),
            ">=" => Some(ComparisonOp::Ge),
            "<=" => Some(ComparisonOp::Le),
            "IN" => Some(ComparisonOp::In),
            "NOT IN" => Some(ComparisonOp::NotIn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

impl Combinator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Combinator::And => "AND",
            Combinator::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    pub fn as_sql(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL JOIN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn as_sql(self) -> &'static str {
        match self {
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }
}

/// Scalar transform applied to a selected column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransformFunction {
    Date,
    Year,
    Month,
    Day,
    Upper,
    Lower,
    Trim,
    Round,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}
