//! Validate → compile → execute on source → create table → insert rows

use std::borrow::Cow;
use std::time::Instant;

use chrono::Utc;
use matql_ir::{CanonicalType, Dialect, QueryDocument, Value};
use matql_registry::TypeRegistry;
use matql_sql::literal::{coerce, encode};
use matql_sql::naming::sanitize_identifier;
use matql_sql::{complete_grouping, CompiledQuery, Compiler, GroupingPolicy, OutputSource, Validator};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::MaterializeError;
use crate::source::{Row, SourceConnection, SourceSession};
use crate::store::{DestinationStore, ProvenanceRecord, StoreTransaction};

pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterializeOptions {
    pub grouping: GroupingPolicy,
    /// Rows per multi-row INSERT
    pub batch_size: usize,
    pub destination_schema: String,
    pub table_prefix: String,
    /// Fixed destination name; generated when absent
    pub table_name: Option<String>,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            grouping: GroupingPolicy::Strict,
            batch_size: DEFAULT_BATCH_SIZE,
            destination_schema: "materialized".to_string(),
            table_prefix: "mq".to_string(),
            table_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationColumn {
    pub name: String,
    pub canonical_type: CanonicalType,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaterializedTable {
    pub name: String,
    pub schema: String,
    pub columns: Vec<DestinationColumn>,
    pub source_identity: String,
    pub source_ir: QueryDocument,
    pub row_count: u64,
    pub fingerprint: String,
}

/// One multi-row INSERT
#[derive(Debug, Clone, PartialEq)]
pub struct InsertBatch {
    pub sql: String,
    pub params: Vec<Value>,
    pub rows: usize,
}

pub struct Materializer<'r> {
    registry: &'r TypeRegistry,
    options: MaterializeOptions,
}

impl<'r> Materializer<'r> {
    pub fn new(registry: &'r TypeRegistry, options: MaterializeOptions) -> Self {
        Self { registry, options }
    }

    pub fn options(&self) -> &MaterializeOptions {
        &self.options
    }

    /// Run the whole pipeline. Document errors surface before the source
    /// is opened; store work happens inside one transaction.
    pub fn materialize<S, D>(
        &self,
        doc: &QueryDocument,
        source: &mut S,
        store: &mut D,
    ) -> Result<MaterializedTable, MaterializeError>
    where
        S: SourceConnection + ?Sized,
        D: DestinationStore + ?Sized,
    {
        let started = Instant::now();

        let doc: Cow<'_, QueryDocument> = match self.options.grouping {
            GroupingPolicy::Strict => Cow::Borrowed(doc),
            GroupingPolicy::AutoComplete => Cow::Owned(complete_grouping(doc)),
        };
        Validator::new().validate(&doc)?;

        let source_dialect = source.dialect();
        let compiled = Compiler::new(source_dialect).compile(&doc)?;
        let columns = destination_columns(self.registry, source_dialect, &doc, &compiled)?;

        let schema = sanitize_identifier(&self.options.destination_schema);
        let name = match &self.options.table_name {
            Some(name) => sanitize_identifier(name),
            None => generate_table_name(&self.options.table_prefix),
        };
        let fingerprint = doc.fingerprint();

        let rows = {
            let mut session = SourceSession::open(source).map_err(|e| MaterializeError::SourceExecution {
                message: e.to_string(),
                sql: compiled.display_sql(),
            })?;
            session
                .execute(&compiled.sql, &compiled.params)
                .map_err(|e| MaterializeError::SourceExecution {
                    message: e.to_string(),
                    sql: compiled.display_sql(),
                })?
        };
        debug!(rows = rows.len(), "source query returned");

        let store_dialect = store.dialect();
        let batches = insert_batches(
            store_dialect,
            store.supports_binding(),
            &schema,
            &name,
            &columns,
            &rows,
            self.options.batch_size,
        )?;
        let create = create_table_sql(store_dialect, &schema, &name, &columns);

        let row_count = rows.len() as u64;
        let record = ProvenanceRecord {
            table_name: name.clone(),
            schema: schema.clone(),
            source_identity: source.identity(),
            source_dialect,
            fingerprint: fingerprint.clone(),
            row_count,
            ir: doc.clone().into_owned(),
            created_at: Utc::now(),
        };

        let mut tx = StoreTransaction::begin(store).map_err(|e| MaterializeError::Materialization {
            message: e.to_string(),
            sql: None,
        })?;
        tx.store()
            .execute_ddl(&create)
            .map_err(|e| MaterializeError::Materialization {
                message: e.to_string(),
                sql: Some(create.clone()),
            })?;
        for batch in &batches {
            tx.store()
                .execute_dml(&batch.sql, &batch.params)
                .map_err(|e| MaterializeError::Materialization {
                    message: e.to_string(),
                    sql: Some(batch.sql.clone()),
                })?;
        }
        tx.store()
            .record_provenance(&record)
            .map_err(|e| MaterializeError::Materialization {
                message: e.to_string(),
                sql: None,
            })?;
        tx.commit().map_err(|e| MaterializeError::Materialization {
            message: e.to_string(),
            sql: None,
        })?;

        info!(
            table = %format!("{}.{}", schema, name),
            rows = row_count,
            fingerprint = %fingerprint,
            source = %record.source_identity,
            duration_ms = started.elapsed().as_millis() as u64,
            "materialization complete"
        );

        Ok(MaterializedTable {
            name,
            schema,
            columns,
            source_identity: record.source_identity,
            source_ir: record.ir,
            row_count,
            fingerprint,
        })
    }
}

/// `{prefix}_{12 hex chars}`
pub fn generate_table_name(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}_{}", sanitize_identifier(prefix), &id[..12])
}

/// Destination column list, in SELECT order, named exactly like the
/// compiled SELECT aliases
pub fn destination_columns(
    registry: &TypeRegistry,
    dialect: Dialect,
    doc: &QueryDocument,
    compiled: &CompiledQuery,
) -> Result<Vec<DestinationColumn>, MaterializeError> {
    let mut columns = Vec::with_capacity(compiled.columns.len());
    for output in &compiled.columns {
        let canonical_type = match &output.source {
            OutputSource::Column(col) => registry
                .map(dialect, &col.data_type, col.max_length, col.transform_function)
                .map_err(|source| MaterializeError::TypeConversion {
                    column: col.reference(),
                    source,
                })?,
            OutputSource::Aggregate(agg) => {
                // MIN/MAX keep the input type when the document describes the column
                let input = doc
                    .columns
                    .iter()
                    .find(|c| c.matches(&agg.column))
                    .and_then(|c| registry.map(dialect, &c.data_type, c.max_length, None).ok());
                registry.aggregate_type(agg.function, input)
            }
            OutputSource::Expression { .. } => CanonicalType::Numeric,
            OutputSource::Calculated { canonical_type, .. } => canonical_type.unwrap_or(CanonicalType::Numeric),
        };
        columns.push(DestinationColumn {
            name: output.name.clone(),
            canonical_type,
        });
    }
    Ok(columns)
}

fn qualified(dialect: Dialect, schema: &str, name: &str) -> String {
    format!("{}.{}", dialect.quote_ident(schema), dialect.quote_ident(name))
}

pub fn create_table_sql(dialect: Dialect, schema: &str, name: &str, columns: &[DestinationColumn]) -> String {
    let defs: Vec<String> = columns
        .iter()
        .map(|c| format!("{} {}", dialect.quote_ident(&c.name), c.canonical_type.ddl(dialect)))
        .collect();
    format!("CREATE TABLE {} ({})", qualified(dialect, schema, name), defs.join(", "))
}

/// Build batched INSERTs, looking every cell up by its destination name.
///
/// Binding stores get coerced values behind placeholders (temporal values
/// are cast explicitly); other stores get literals from the encoder.
pub fn insert_batches(
    dialect: Dialect,
    binding: bool,
    schema: &str,
    name: &str,
    columns: &[DestinationColumn],
    rows: &[Row],
    batch_size: usize,
) -> Result<Vec<InsertBatch>, MaterializeError> {
    if columns.is_empty() {
        return Ok(Vec::new());
    }

    let head = format!(
        "INSERT INTO {} ({}) VALUES ",
        qualified(dialect, schema, name),
        columns
            .iter()
            .map(|c| dialect.quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut batches = Vec::new();
    for chunk in rows.chunks(batch_size.max(1)) {
        let mut params = Vec::new();
        let mut tuples = Vec::with_capacity(chunk.len());

        for row in chunk {
            let mut cells = Vec::with_capacity(columns.len());
            for col in columns {
                let value = row.get(&col.name).ok_or_else(|| MaterializeError::MissingResultColumn {
                    column: col.name.clone(),
                })?;

                if binding {
                    params.push(coerce(value, &col.canonical_type, &col.name));
                    let placeholder = dialect.placeholder(params.len());
                    cells.push(if col.canonical_type.is_temporal() {
                        format!("CAST({} AS {})", placeholder, col.canonical_type.ddl(dialect))
                    } else {
                        placeholder
                    });
                } else {
                    cells.push(encode(value, &col.canonical_type, &col.name));
                }
            }
            tuples.push(format!("({})", cells.join(", ")));
        }

        batches.push(InsertBatch {
            sql: format!("{}{}", head, tuples.join(", ")),
            params,
            rows: chunk.len(),
        });
    }
    Ok(batches)
}
