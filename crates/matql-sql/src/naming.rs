//! Destination column naming
//!
//! The same names are used as SELECT aliases, as destination column names
//! and as the keys rows are looked up by during insertion.

use matql_ir::{AggregateFunctionRef, ColumnRef};

/// Longest identifier accepted by the destination store (Postgres limit)
pub const MAX_IDENT_LEN: usize = 63;

/// Table names longer than this only contribute a suffix to column names
pub const LONG_TABLE_NAME: usize = 24;
const TABLE_SUFFIX_LEN: usize = 16;

/// Lower-case `[a-z0-9_]` identifier, never empty, never starting with a digit
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }

    let trimmed = out.trim_matches('_');
    let mut name = if trimmed.is_empty() {
        "col".to_string()
    } else if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        format!("c_{}", trimmed)
    } else {
        trimmed.to_string()
    };

    name.truncate(MAX_IDENT_LEN);
    name.trim_end_matches('_').to_string()
}

/// Destination name of a selected column.
///
/// `alias_name` wins; long (spreadsheet-derived) table names contribute a
/// truncated suffix; otherwise `schema_table_column`, where an aliased
/// occurrence uses its alias in place of the table.
pub fn destination_name(column: &ColumnRef) -> String {
    if let Some(alias) = column.alias_name.as_deref().filter(|a| !a.trim().is_empty()) {
        return sanitize_identifier(alias);
    }

    if let Some(table_alias) = &column.table_alias {
        return sanitize_identifier(&format!("{}_{}_{}", column.schema, table_alias, column.column_name));
    }

    if column.table_name.len() > LONG_TABLE_NAME {
        let table = sanitize_identifier(&column.table_name);
        let cut = table.len().saturating_sub(TABLE_SUFFIX_LEN);
        let tail = &table[cut..];
        // Prefer starting the suffix on a word boundary
        let suffix = if cut == 0 || table.as_bytes()[cut - 1] == b'_' {
            tail
        } else {
            match tail.find('_') {
                Some(p) if p + 1 < tail.len() => &tail[p + 1..],
                _ => tail,
            }
        };
        let suffix = suffix.trim_start_matches('_');
        return sanitize_identifier(&format!("{}_{}", suffix, column.column_name));
    }

    sanitize_identifier(&format!("{}_{}_{}", column.schema, column.table_name, column.column_name))
}

/// `alias` if given, else `function_columnname` lower-cased
pub fn aggregate_name(aggregate: &AggregateFunctionRef) -> String {
    match aggregate.alias.as_deref().filter(|a| !a.trim().is_empty()) {
        Some(alias) => sanitize_identifier(alias),
        None => sanitize_identifier(&format!(
            "{}_{}",
            aggregate.function.as_sql(),
            aggregate.column_name()
        )),
    }
}
