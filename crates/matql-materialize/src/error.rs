use matql_registry::TypeConversionError;
use matql_sql::{CompileError, GroupingError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error(transparent)]
    Grouping(#[from] GroupingError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("Column '{column}': {source}")]
    TypeConversion {
        column: String,
        #[source]
        source: TypeConversionError,
    },

    #[error("Source execution failed: {message}")]
    SourceExecution { message: String, sql: String },

    #[error("Materialization failed: {message}")]
    Materialization { message: String, sql: Option<String> },

    #[error("Result rows have no column '{column}'")]
    MissingResultColumn { column: String },
}

/// Structured error payload returned to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
    pub offending: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

impl MaterializeError {
    pub fn kind(&self) -> &'static str {
        match self {
            MaterializeError::Grouping(_) => "GroupingError",
            MaterializeError::Compile(CompileError::UnreachableTable { .. }) => "UnreachableTableError",
            MaterializeError::Compile(CompileError::DanglingAlias { .. }) => "DanglingAliasError",
            MaterializeError::Compile(_) => "CompileError",
            MaterializeError::TypeConversion { .. } => "TypeConversionError",
            MaterializeError::SourceExecution { .. } => "SourceExecutionError",
            MaterializeError::Materialization { .. } | MaterializeError::MissingResultColumn { .. } => {
                "MaterializationError"
            }
        }
    }

    /// True when re-submitting a corrected document can fix the failure
    pub fn is_document_error(&self) -> bool {
        matches!(
            self,
            MaterializeError::Grouping(_) | MaterializeError::Compile(_) | MaterializeError::TypeConversion { .. }
        )
    }

    pub fn report(&self) -> ErrorReport {
        let offending = match self {
            MaterializeError::Grouping(e) => {
                let mut names = e.missing_references();
                names.extend(e.unexpected.iter().cloned());
                names
            }
            MaterializeError::Compile(e) => e.offending(),
            MaterializeError::TypeConversion { column, source } => {
                vec![column.clone(), source.declared_type.clone()]
            }
            MaterializeError::MissingResultColumn { column } => vec![column.clone()],
            MaterializeError::SourceExecution { .. } | MaterializeError::Materialization { .. } => Vec::new(),
        };

        let sql = match self {
            MaterializeError::SourceExecution { sql, .. } => Some(sql.clone()),
            MaterializeError::Materialization { sql, .. } => sql.clone(),
            _ => None,
        };

        ErrorReport {
            kind: self.kind().to_string(),
            message: self.to_string(),
            offending,
            sql,
        }
    }
}
