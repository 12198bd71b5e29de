//! Materialization of query documents into durable destination tables
//!
//! The pipeline is strictly sequential: grouping validation, compilation,
//! destination typing, source execution, then table creation, batched
//! inserts and the provenance record inside a single store transaction.
//! Any failure before the transaction leaves the store untouched; any
//! failure inside it rolls everything back.

pub mod error;
pub mod materializer;
pub mod source;
pub mod store;

pub use error::{ErrorReport, MaterializeError};
pub use materializer::{
    create_table_sql, destination_columns, generate_table_name, insert_batches, DestinationColumn, InsertBatch,
    MaterializeOptions, MaterializedTable, Materializer, DEFAULT_BATCH_SIZE,
};
pub use source::{Row, SourceConnection, SourceError, SourceSession};
pub use store::{DestinationStore, ProvenanceRecord, StoreError, StoreTransaction};
