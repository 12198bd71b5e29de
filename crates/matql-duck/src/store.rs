use chrono::{DateTime, Utc};
use duckdb::{params, params_from_iter, Connection};
use matql_ir::{Dialect, Value};
use matql_materialize::{DestinationStore, ProvenanceRecord, StoreError};
use matql_sql::naming::sanitize_identifier;
use tracing::{debug, info, warn};

use crate::{to_duck_value, DuckError};

const PROVENANCE_TABLE: &str = "matql_materializations";

/// DuckDB-backed internal store for materialized tables.
pub struct DuckStore {
    conn: Connection,
    schema: String,
}

impl DuckStore {
    pub fn open(path: &str, schema: &str) -> Result<Self, DuckError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        Self::from_connection(conn, schema)
    }

    pub fn open_in_memory(schema: &str) -> Result<Self, DuckError> {
        Self::from_connection(Connection::open_in_memory()?, schema)
    }

    /// Creates the schema and the provenance table when missing.
    ///
    /// The schema name is sanitized the same way the materializer sanitizes
    /// its destination schema, so both address the same schema.
    pub fn from_connection(conn: Connection, schema: &str) -> Result<Self, DuckError> {
        let schema = sanitize_identifier(schema);
        let store = Self { conn, schema };
        let q = |ident: &str| Dialect::DuckDb.quote_ident(ident);
        store.conn.execute_batch(&format!(
            "CREATE SCHEMA IF NOT EXISTS {schema};
             CREATE TABLE IF NOT EXISTS {schema}.{table} (
                 table_name VARCHAR NOT NULL,
                 schema_name VARCHAR NOT NULL,
                 source_identity VARCHAR NOT NULL,
                 source_dialect VARCHAR NOT NULL,
                 fingerprint VARCHAR NOT NULL,
                 row_count BIGINT NOT NULL,
                 ir VARCHAR NOT NULL,
                 created_at VARCHAR NOT NULL
             );",
            schema = q(&store.schema),
            table = PROVENANCE_TABLE,
        ))?;
        debug!(schema = %store.schema, "duckdb store ready");
        Ok(store)
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn provenance_table(&self) -> String {
        format!("{}.{}", Dialect::DuckDb.quote_ident(&self.schema), PROVENANCE_TABLE)
    }

    /// Provenance records, oldest first
    pub fn list_materializations(&self) -> Result<Vec<ProvenanceRecord>, DuckError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT table_name, schema_name, source_identity, source_dialect, fingerprint, row_count, ir, created_at \
             FROM {} ORDER BY created_at, table_name",
            self.provenance_table()
        ))?;

        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(
                |(table_name, schema, source_identity, dialect, fingerprint, row_count, ir, created_at)| {
                    let corrupt = |e: &dyn std::fmt::Display| DuckError::Provenance(format!("{}: {}", table_name, e));
                    let source_dialect = serde_json::from_value(serde_json::Value::String(dialect))
                        .map_err(|e| corrupt(&e))?;
                    let ir = serde_json::from_str(&ir).map_err(|e| corrupt(&e))?;
                    let created_at = DateTime::parse_from_rfc3339(&created_at)
                        .map_err(|e| corrupt(&e))?
                        .with_timezone(&Utc);
                    Ok(ProvenanceRecord {
                        table_name,
                        schema,
                        source_identity,
                        source_dialect,
                        fingerprint,
                        row_count: row_count.max(0) as u64,
                        ir,
                        created_at,
                    })
                },
            )
            .collect()
    }

    /// Drop a materialized table and its provenance record in one
    /// transaction. Tables without a provenance record are left alone.
    pub fn drop_table(&self, name: &str) -> Result<(), DuckError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT schema_name FROM {} WHERE table_name = ?",
            self.provenance_table()
        ))?;
        let schemas = stmt
            .query_map(params![name], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let Some(schema) = schemas.into_iter().next() else {
            return Err(DuckError::NotMaterialized(name.to_string()));
        };

        let q = |ident: &str| Dialect::DuckDb.quote_ident(ident);
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        let dropped = self
            .conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {}.{}", q(&schema), q(name)))
            .and_then(|_| {
                self.conn.execute(
                    &format!("DELETE FROM {} WHERE table_name = ?", self.provenance_table()),
                    params![name],
                )
            });
        match dropped {
            Ok(_) => self.conn.execute_batch("COMMIT")?,
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    warn!(error = %rollback, "rollback failed");
                }
                return Err(e.into());
            }
        }
        info!(table = %name, schema = %schema, "materialized table dropped");
        Ok(())
    }
}

impl DestinationStore for DuckStore {
    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    fn supports_binding(&self) -> bool {
        true
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("BEGIN TRANSACTION").map_err(DuckError::from)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT").map_err(DuckError::from)?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("ROLLBACK").map_err(DuckError::from)?;
        Ok(())
    }

    fn execute_ddl(&mut self, sql: &str) -> Result<(), StoreError> {
        debug!(sql = %sql, "store ddl");
        self.conn.execute_batch(sql).map_err(DuckError::from)?;
        Ok(())
    }

    fn execute_dml(&mut self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        let affected = self
            .conn
            .execute(sql, params_from_iter(params.iter().map(to_duck_value)))
            .map_err(DuckError::from)?;
        Ok(affected as u64)
    }

    fn record_provenance(&mut self, record: &ProvenanceRecord) -> Result<(), StoreError> {
        let ir = serde_json::to_string(&record.ir).map_err(|e| StoreError::new(e.to_string()))?;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {} VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    self.provenance_table()
                ),
                params![
                    record.table_name,
                    record.schema,
                    record.source_identity,
                    record.source_dialect.to_string(),
                    record.fingerprint,
                    record.row_count as i64,
                    ir,
                    record.created_at.to_rfc3339(),
                ],
            )
            .map_err(DuckError::from)?;
        Ok(())
    }
}
