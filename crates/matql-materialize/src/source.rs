//! Source collaborator: anything that can run a SQL string and return rows

use indexmap::IndexMap;
use matql_ir::{Dialect, Value};
use thiserror::Error;
use tracing::debug;

/// One result row, keyed by SELECT alias in SELECT order
pub type Row = IndexMap<String, Value>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("{0}")]
    Execution(String),

    #[error("Source is not connected")]
    NotConnected,
}

/// A connected source capable of executing SQL.
///
/// Implementations own connection management and credentials; the
/// materializer only needs the dialect tag, an identity for provenance,
/// and query execution with bound parameters.
pub trait SourceConnection {
    /// Stable identity recorded with provenance (connection id, file path, ...)
    fn identity(&self) -> String;

    fn dialect(&self) -> Dialect;

    fn connect(&mut self) -> Result<(), SourceError>;

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SourceError>;

    /// Must be safe to call on an already-closed source
    fn close(&mut self);
}

/// Scoped acquisition of a source: connected on open, closed on drop.
pub struct SourceSession<'a, S: SourceConnection + ?Sized> {
    source: &'a mut S,
}

impl<'a, S: SourceConnection + ?Sized> SourceSession<'a, S> {
    pub fn open(source: &'a mut S) -> Result<Self, SourceError> {
        source.connect()?;
        debug!(source = %source.identity(), "source session opened");
        Ok(Self { source })
    }

    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SourceError> {
        self.source.execute(sql, params)
    }
}

impl<S: SourceConnection + ?Sized> Drop for SourceSession<'_, S> {
    fn drop(&mut self) {
        self.source.close();
        debug!(source = %self.source.identity(), "source session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts connects and closes; optionally fails every statement
    struct CountingSource {
        connected: bool,
        connects: usize,
        closes: usize,
        fail_with: Option<String>,
    }

    impl CountingSource {
        fn new() -> Self {
            Self {
                connected: false,
                connects: 0,
                closes: 0,
                fail_with: None,
            }
        }
    }

    impl SourceConnection for CountingSource {
        fn identity(&self) -> String {
            "mem".to_string()
        }

        fn dialect(&self) -> Dialect {
            Dialect::DuckDb
        }

        fn connect(&mut self) -> Result<(), SourceError> {
            self.connects += 1;
            self.connected = true;
            Ok(())
        }

        fn execute(&mut self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>, SourceError> {
            if !self.connected {
                return Err(SourceError::NotConnected);
            }
            match &self.fail_with {
                Some(message) => Err(SourceError::Execution(message.clone())),
                None => Ok(Vec::new()),
            }
        }

        fn close(&mut self) {
            if self.connected {
                self.closes += 1;
            }
            self.connected = false;
        }
    }

    #[test]
    fn test_session_closes_on_every_exit_path() {
        let mut source = CountingSource::new();
        {
            let mut session = SourceSession::open(&mut source).unwrap();
            session.execute("SELECT 1", &[]).unwrap();
        }
        assert_eq!((source.connects, source.closes), (1, 1));
        assert!(!source.connected);

        source.fail_with = Some("syntax error".to_string());
        let result = (|| -> Result<Vec<Row>, SourceError> {
            let mut session = SourceSession::open(&mut source)?;
            session.execute("SELEC 1", &[])
        })();
        assert!(matches!(result, Err(SourceError::Execution(_))));
        assert_eq!((source.connects, source.closes), (2, 2));
    }

    #[test]
    fn test_execute_requires_connection() {
        let mut source = CountingSource::new();
        assert!(matches!(source.execute("SELECT 1", &[]), Err(SourceError::NotConnected)));
    }
}
