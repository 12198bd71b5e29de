//! Dialect type registry
//!
//! Maps a source dialect's declared column type onto the canonical
//! destination type. The base mapping is static data per dialect; a
//! transform function on the column overrides it, because the destination
//! has to hold the post-transform shape of the value.

use matql_ir::{AggregateFunction, CanonicalType, Dialect, TransformFunction};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("No canonical type for {dialect} type '{declared_type}'")]
pub struct TypeConversionError {
    pub dialect: Dialect,
    pub declared_type: String,
}

use CanonicalType::*;

const POSTGRES: &[(&str, CanonicalType)] = &[
    ("smallint", Integer),
    ("integer", Integer),
    ("int", Integer),
    ("int2", Integer),
    ("int4", Integer),
    ("int8", Integer),
    ("bigint", Integer),
    ("smallserial", Integer),
    ("serial", Integer),
    ("bigserial", Integer),
    ("numeric", Numeric),
    ("decimal", Numeric),
    ("real", Numeric),
    ("float4", Numeric),
    ("float8", Numeric),
    ("double precision", Numeric),
    ("money", Numeric),
    ("text", Text),
    ("character varying", Text),
    ("varchar", Text),
    ("character", Text),
    ("char", Text),
    ("bpchar", Text),
    ("name", Text),
    ("citext", Text),
    ("uuid", Text),
    ("interval", Text),
    ("boolean", Boolean),
    ("bool", Boolean),
    ("date", Date),
    ("time", Time),
    ("time without time zone", Time),
    ("time with time zone", Time),
    ("timetz", Time),
    ("timestamp", Timestamp),
    ("timestamp without time zone", Timestamp),
    ("timestamp with time zone", TimestampTz),
    ("timestamptz", TimestampTz),
    ("json", Json),
    ("jsonb", Json),
    ("array", Json),
    ("bytea", Bytes),
];

const MYSQL: &[(&str, CanonicalType)] = &[
    ("tinyint", Integer),
    ("smallint", Integer),
    ("mediumint", Integer),
    ("int", Integer),
    ("integer", Integer),
    ("bigint", Integer),
    ("year", Integer),
    ("decimal", Numeric),
    ("numeric", Numeric),
    ("float", Numeric),
    ("double", Numeric),
    ("double precision", Numeric),
    ("real", Numeric),
    ("char", Text),
    ("varchar", Text),
    ("tinytext", Text),
    ("text", Text),
    ("mediumtext", Text),
    ("longtext", Text),
    ("enum", Text),
    ("set", Text),
    ("bit", Boolean),
    ("bool", Boolean),
    ("boolean", Boolean),
    ("date", Date),
    ("time", Time),
    ("datetime", Timestamp),
    ("timestamp", Timestamp),
    ("json", Json),
    ("binary", Bytes),
    ("varbinary", Bytes),
    ("tinyblob", Bytes),
    ("blob", Bytes),
    ("mediumblob", Bytes),
    ("longblob", Bytes),
];

const SQLITE: &[(&str, CanonicalType)] = &[
    ("integer", Integer),
    ("int", Integer),
    ("tinyint", Integer),
    ("smallint", Integer),
    ("bigint", Integer),
    ("real", Numeric),
    ("double", Numeric),
    ("float", Numeric),
    ("numeric", Numeric),
    ("decimal", Numeric),
    ("text", Text),
    ("varchar", Text),
    ("nvarchar", Text),
    ("char", Text),
    ("clob", Text),
    ("boolean", Boolean),
    ("date", Date),
    ("datetime", Timestamp),
    ("timestamp", Timestamp),
    ("json", Json),
    ("blob", Bytes),
];

const DUCKDB: &[(&str, CanonicalType)] = &[
    ("tinyint", Integer),
    ("smallint", Integer),
    ("integer", Integer),
    ("int", Integer),
    ("bigint", Integer),
    ("hugeint", Integer),
    ("utinyint", Integer),
    ("usmallint", Integer),
    ("uinteger", Integer),
    ("ubigint", Integer),
    ("int1", Integer),
    ("int2", Integer),
    ("int4", Integer),
    ("int8", Integer),
    ("decimal", Numeric),
    ("numeric", Numeric),
    ("real", Numeric),
    ("float", Numeric),
    ("float4", Numeric),
    ("double", Numeric),
    ("float8", Numeric),
    ("varchar", Text),
    ("text", Text),
    ("string", Text),
    ("char", Text),
    ("bpchar", Text),
    ("uuid", Text),
    ("interval", Text),
    ("boolean", Boolean),
    ("bool", Boolean),
    ("date", Date),
    ("time", Time),
    ("timestamp", Timestamp),
    ("datetime", Timestamp),
    ("timestamp_s", Timestamp),
    ("timestamp_ms", Timestamp),
    ("timestamp_ns", Timestamp),
    ("timestamptz", TimestampTz),
    ("timestamp with time zone", TimestampTz),
    ("json", Json),
    ("struct", Json),
    ("map", Json),
    ("list", Json),
    ("blob", Bytes),
    ("bytea", Bytes),
];

/// Table-driven `(dialect, declared type) -> canonical type` mapping
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    entries: HashMap<(Dialect, String), CanonicalType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
        };
        registry.register_builtins();
        registry
    }

    fn register_builtins(&mut self) {
        for (dialect, table) in [
            (Dialect::Postgres, POSTGRES),
            (Dialect::MySql, MYSQL),
            (Dialect::Sqlite, SQLITE),
            (Dialect::DuckDb, DUCKDB),
        ] {
            for (declared, canonical) in table {
                self.register(dialect, declared, *canonical);
            }
        }
    }

    pub fn register(&mut self, dialect: Dialect, declared_type: &str, canonical: CanonicalType) {
        self.entries.insert((dialect, normalize(declared_type)), canonical);
    }

    /// Base mapping only, no transform override or length handling
    pub fn lookup(&self, dialect: Dialect, declared_type: &str) -> Result<CanonicalType, TypeConversionError> {
        let raw = declared_type.trim().to_ascii_lowercase();

        // MySQL convention: TINYINT(1) is a boolean column
        if dialect == Dialect::MySql && raw.replace(' ', "") == "tinyint(1)" {
            return Ok(Boolean);
        }
        // Array types: `integer[]`, and Postgres internal `_int4` names
        if raw.ends_with("[]") || (dialect == Dialect::Postgres && raw.starts_with('_')) {
            return Ok(Json);
        }

        self.entries
            .get(&(dialect, normalize(&raw)))
            .copied()
            .ok_or_else(|| TypeConversionError {
                dialect,
                declared_type: declared_type.to_string(),
            })
    }

    /// Canonical destination type for a column.
    ///
    /// A transform function takes precedence over the declared type, even
    /// when the declared type has no mapping of its own.
    pub fn map(
        &self,
        dialect: Dialect,
        declared_type: &str,
        max_length: Option<u32>,
        transform: Option<TransformFunction>,
    ) -> Result<CanonicalType, TypeConversionError> {
        if let Some(transform) = transform {
            return Ok(transform_type(transform));
        }

        let canonical = self.lookup(dialect, declared_type)?;
        Ok(match (canonical, max_length) {
            (Text, Some(n)) if n > 0 => Varchar(n),
            (canonical, _) => canonical,
        })
    }

    /// Result type of an aggregate destination column
    pub fn aggregate_type(&self, function: AggregateFunction, input: Option<CanonicalType>) -> CanonicalType {
        match function {
            AggregateFunction::Sum | AggregateFunction::Avg | AggregateFunction::Count => Numeric,
            AggregateFunction::Min | AggregateFunction::Max => input.unwrap_or(Numeric),
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Type produced by a transform, independent of its input
pub fn transform_type(transform: TransformFunction) -> CanonicalType {
    match transform {
        TransformFunction::Date => Date,
        TransformFunction::Year | TransformFunction::Month | TransformFunction::Day => Integer,
        TransformFunction::Upper | TransformFunction::Lower | TransformFunction::Trim => Text,
        TransformFunction::Round => Numeric,
    }
}

/// Lower-case, drop `(...)` parameters and modifiers, collapse whitespace
fn normalize(declared_type: &str) -> String {
    let lowered = declared_type.to_ascii_lowercase();
    let mut stripped = String::with_capacity(lowered.len());
    let mut depth = 0usize;
    for c in lowered.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => stripped.push(c),
            _ => {}
        }
    }

    stripped
        .split_whitespace()
        .filter(|word| !matches!(*word, "unsigned" | "signed" | "zerofill"))
        .collect::<Vec<_>>()
        .join(" ")
}
