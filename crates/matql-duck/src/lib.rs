//! DuckDB source connection and destination store

use chrono::{DateTime, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, ValueRef};
use duckdb::{params_from_iter, Connection};
use matql_ir::{Dialect, Value};
use matql_materialize::{Row, SourceConnection, SourceError, StoreError};
use thiserror::Error;
use tracing::{debug, warn};

mod store;
pub use store::DuckStore;

#[derive(Debug, Error)]
pub enum DuckError {
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Provenance record is corrupt: {0}")]
    Provenance(String),

    #[error("No materialized table named '{0}'")]
    NotMaterialized(String),
}

impl From<DuckError> for StoreError {
    fn from(e: DuckError) -> Self {
        StoreError::new(e.to_string())
    }
}

/// Days between 0001-01-01 and 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

enum Target {
    Path(String),
    Shared(Connection),
}

/// DuckDB database exposed as a materialization source.
///
/// Spreadsheet and PDF uploads land in such databases; the connection is
/// opened on `connect` and dropped on `close`.
pub struct DuckSource {
    identity: String,
    target: Target,
    conn: Option<Connection>,
}

impl DuckSource {
    /// Source over a database file; `:memory:` opens a private database
    pub fn open(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            identity: format!("duckdb:{}", path),
            target: Target::Path(path),
            conn: None,
        }
    }

    /// Source sharing the database behind an existing connection
    pub fn from_connection(identity: impl Into<String>, conn: Connection) -> Self {
        Self {
            identity: identity.into(),
            target: Target::Shared(conn),
            conn: None,
        }
    }

    /// Replace the identity recorded with provenance
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    fn query(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>, DuckError> {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter().map(to_duck_value)))?;

        let names: Vec<String> = rows.as_ref().map(|s| s.column_names()).unwrap_or_default();

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut out = Row::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                let value = from_value_ref(row.get_ref(i)?, name);
                out.insert(name.clone(), value);
            }
            result.push(out);
        }
        Ok(result)
    }
}

impl SourceConnection for DuckSource {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    fn connect(&mut self) -> Result<(), SourceError> {
        if self.conn.is_some() {
            return Ok(());
        }
        let conn = match &self.target {
            Target::Path(path) if path == ":memory:" => Connection::open_in_memory(),
            Target::Path(path) => Connection::open(path),
            Target::Shared(conn) => conn.try_clone(),
        }
        .map_err(|e| SourceError::Connect(e.to_string()))?;

        debug!(source = %self.identity, "duckdb source connected");
        self.conn = Some(conn);
        Ok(())
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SourceError> {
        let conn = self.conn.as_ref().ok_or(SourceError::NotConnected)?;
        Self::query(conn, sql, params).map_err(|e| SourceError::Execution(e.to_string()))
    }

    fn close(&mut self) {
        self.conn = None;
    }
}

/// Parameter form of a value; temporal values travel as text and are cast
/// by the statement
pub fn to_duck_value(value: &Value) -> duckdb::types::Value {
    use duckdb::types::Value as Duck;

    match value {
        Value::Null => Duck::Null,
        Value::Bool(b) => Duck::Boolean(*b),
        Value::Int(i) => Duck::BigInt(*i),
        Value::Float(f) => Duck::Double(*f),
        Value::String(s) => Duck::Text(s.clone()),
        Value::Bytes(b) => Duck::Blob(b.clone()),
        Value::Array(_) | Value::Json(_) => Duck::Text(value.to_json().to_string()),
        Value::Date(d) => Duck::Text(d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => Duck::Text(t.format("%H:%M:%S%.f").to_string()),
        Value::Timestamp(ts) => Duck::Text(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::TimestampTz(ts) => Duck::Text(ts.to_rfc3339()),
    }
}

fn to_micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

/// Convert one DuckDB cell into a `Value`
pub fn from_value_ref(value: ValueRef<'_>, column: &str) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::Int(i as i64),
        ValueRef::SmallInt(i) => Value::Int(i as i64),
        ValueRef::Int(i) => Value::Int(i as i64),
        ValueRef::BigInt(i) => Value::Int(i),
        ValueRef::HugeInt(i) => i64::try_from(i).map(Value::Int).unwrap_or(Value::Float(i as f64)),
        ValueRef::UTinyInt(i) => Value::Int(i as i64),
        ValueRef::USmallInt(i) => Value::Int(i as i64),
        ValueRef::UInt(i) => Value::Int(i as i64),
        ValueRef::UBigInt(i) => i64::try_from(i).map(Value::Int).unwrap_or(Value::Float(i as f64)),
        ValueRef::Float(f) => Value::Float(f as f64),
        ValueRef::Double(f) => Value::Float(f),
        ValueRef::Decimal(d) => d.to_string().parse::<f64>().map(Value::Float).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
        ValueRef::Date32(days) => days
            .checked_add(UNIX_EPOCH_DAYS_FROM_CE)
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .map(Value::Date)
            .unwrap_or(Value::Null),
        ValueRef::Time64(unit, t) => {
            let micros = to_micros(unit, t);
            NaiveTime::from_num_seconds_from_midnight_opt(
                (micros / 1_000_000) as u32,
                ((micros % 1_000_000) * 1_000) as u32,
            )
            .map(Value::Time)
            .unwrap_or(Value::Null)
        }
        ValueRef::Timestamp(unit, t) => DateTime::from_timestamp_micros(to_micros(unit, t))
            .map(|dt| Value::Timestamp(dt.naive_utc()))
            .unwrap_or(Value::Null),
        ValueRef::Interval { months, days, nanos } => {
            Value::String(format!("{} months {} days {} microseconds", months, days, nanos / 1_000))
        }
        _ => {
            warn!(column = column, "unsupported DuckDB type, reading NULL");
            Value::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE sales (region VARCHAR, amount DOUBLE, units HUGEINT, sold_on DATE, sold_at TIMESTAMP, ok BOOLEAN);
             INSERT INTO sales VALUES
               ('EU', 10.5, 3, DATE '2025-11-23', TIMESTAMP '2025-11-23 08:30:00', true),
               ('US', 4.0, 1, NULL, NULL, false);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_source_converts_cells() {
        let conn = seeded();
        let mut source = DuckSource::from_connection("test", conn.try_clone().unwrap());
        source.connect().unwrap();

        let rows = source
            .execute("SELECT * FROM sales WHERE region = $1", &[Value::from("EU")])
            .unwrap();
        assert_eq!(rows.len(), 1);

        let row = &rows[0];
        assert_eq!(row.keys().collect::<Vec<_>>(), vec!["region", "amount", "units", "sold_on", "sold_at", "ok"]);
        assert_eq!(row["region"], Value::from("EU"));
        assert_eq!(row["amount"], Value::Float(10.5));
        assert_eq!(row["units"], Value::Int(3));
        assert_eq!(row["sold_on"], Value::Date(NaiveDate::from_ymd_opt(2025, 11, 23).unwrap()));
        assert_eq!(
            row["sold_at"],
            Value::Timestamp(NaiveDate::from_ymd_opt(2025, 11, 23).unwrap().and_hms_opt(8, 30, 0).unwrap())
        );
        assert_eq!(row["ok"], Value::Bool(true));

        source.close();
        assert!(matches!(source.execute("SELECT 1", &[]), Err(SourceError::NotConnected)));
    }

    #[test]
    fn test_source_reports_sql_errors() {
        let mut source = DuckSource::open(":memory:");
        source.connect().unwrap();
        let err = source.execute("SELECT * FROM missing_table", &[]).unwrap_err();
        assert!(matches!(err, SourceError::Execution(_)));
        assert_eq!(source.identity(), "duckdb::memory:");
    }
}
