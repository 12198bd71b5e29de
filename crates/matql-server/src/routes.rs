//! HTTP surface: validate, compile and materialize query documents
//!
//! DuckDB work is blocking and runs on the blocking pool; the destination
//! store is shared behind a mutex so materializations are serialized.

use std::path::Path as FsPath;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use matql_duck::{DuckError, DuckSource, DuckStore};
use matql_ir::{Dialect, QueryDocument};
use matql_materialize::{ErrorReport, MaterializeError, MaterializedTable, Materializer, ProvenanceRecord};
use matql_registry::TypeRegistry;
use matql_sql::{complete_grouping, CompiledQuery, Compiler, GroupingPolicy, Validator};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::config::Config;
use crate::log_event;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    registry: Arc<TypeRegistry>,
    store: Arc<Mutex<DuckStore>>,
    metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(config: Config, store: DuckStore) -> Result<Self, prometheus::Error> {
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(TypeRegistry::new()),
            store: Arc::new(Mutex::new(store)),
            metrics: Arc::new(Metrics::new()?),
        })
    }

    fn policy(&self, auto_complete: Option<bool>) -> GroupingPolicy {
        match auto_complete {
            Some(true) => GroupingPolicy::AutoComplete,
            Some(false) => GroupingPolicy::Strict,
            None => self.config.materialize.grouping_policy,
        }
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, DuckStore>, ApiError> {
        self.store
            .lock()
            .map_err(|_| ApiError::Internal("destination store lock poisoned".to_string()))
    }

    fn run_materialization(&self, req: MaterializeRequest) -> Result<MaterializedTable, ApiError> {
        let mut options = self.config.materialize_options();
        options.grouping = self.policy(req.auto_complete_grouping);
        options.table_name = req.table_name;

        let mut source = DuckSource::open(req.source.database);
        if let Some(identity) = req.source.identity {
            source = source.with_identity(identity);
        }

        let materializer = Materializer::new(&self.registry, options);
        let mut store = self.lock_store()?;
        let table = materializer.materialize(&req.ir, &mut source, &mut *store)?;
        Ok(table)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/validate", post(validate))
        .route("/compile", post(compile))
        .route("/materialize", post(materialize))
        .route("/materializations", get(list_materializations))
        .route("/materializations/:name", delete(drop_materialization))
        .route("/metrics", get(metrics))
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Materialize(MaterializeError),
    Store(DuckError),
    BadRequest(String),
    Internal(String),
}

impl From<MaterializeError> for ApiError {
    fn from(e: MaterializeError) -> Self {
        ApiError::Materialize(e)
    }
}

impl From<DuckError> for ApiError {
    fn from(e: DuckError) -> Self {
        ApiError::Store(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Materialize(e) if e.is_document_error() => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Materialize(MaterializeError::SourceExecution { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(DuckError::NotMaterialized(_)) => StatusCode::NOT_FOUND,
            ApiError::Materialize(_) | ApiError::Store(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn report(&self) -> ErrorReport {
        let plain = |kind: &str, message: String| ErrorReport {
            kind: kind.to_string(),
            message,
            offending: Vec::new(),
            sql: None,
        };
        match self {
            ApiError::Materialize(e) => e.report(),
            ApiError::Store(DuckError::NotMaterialized(name)) => ErrorReport {
                offending: vec![name.clone()],
                ..plain("NotFound", format!("No materialized table named '{}'", name))
            },
            ApiError::Store(e) => plain("StoreError", e.to_string()),
            ApiError::BadRequest(message) => plain("BadRequest", message.clone()),
            ApiError::Internal(message) => plain("InternalError", message.clone()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let report = self.report();
        if status.is_server_error() {
            error!(kind = %report.kind, message = %report.message, "request failed");
        }
        (status, Json(report)).into_response()
    }
}

fn join_error(e: tokio::task::JoinError) -> ApiError {
    ApiError::Internal(format!("worker task failed: {}", e))
}

/// Apply the grouping policy, then validate
fn prepare(ir: QueryDocument, policy: GroupingPolicy) -> Result<QueryDocument, MaterializeError> {
    let ir = match policy {
        GroupingPolicy::AutoComplete => complete_grouping(&ir),
        GroupingPolicy::Strict => ir,
    };
    Validator::new().validate(&ir)?;
    Ok(ir)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub ir: QueryDocument,
    #[serde(default)]
    pub auto_complete_grouping: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    /// The document as it will be compiled
    pub ir: QueryDocument,
}

async fn validate(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let ir = prepare(req.ir, state.policy(req.auto_complete_grouping))?;
    Ok(Json(ValidateResponse { valid: true, ir }))
}

fn default_dialect() -> Dialect {
    Dialect::DuckDb
}

#[derive(Debug, Deserialize)]
pub struct CompileRequest {
    pub ir: QueryDocument,
    #[serde(default = "default_dialect")]
    pub dialect: Dialect,
    #[serde(default)]
    pub auto_complete_grouping: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CompileResponse {
    #[serde(flatten)]
    pub compiled: CompiledQuery,
    pub display_sql: String,
}

async fn compile(
    State(state): State<AppState>,
    Json(req): Json<CompileRequest>,
) -> Result<Json<CompileResponse>, ApiError> {
    let ir = prepare(req.ir, state.policy(req.auto_complete_grouping))?;
    let compiled = Compiler::new(req.dialect)
        .compile(&ir)
        .map_err(MaterializeError::from)?;
    let display_sql = compiled.display_sql();
    Ok(Json(CompileResponse { compiled, display_sql }))
}

#[derive(Debug, Deserialize)]
pub struct SourceSpec {
    /// DuckDB database file holding the source tables
    pub database: String,
    #[serde(default)]
    pub identity: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MaterializeRequest {
    pub ir: QueryDocument,
    pub source: SourceSpec,
    #[serde(default)]
    pub auto_complete_grouping: Option<bool>,
    #[serde(default)]
    pub table_name: Option<String>,
}

async fn materialize(
    State(state): State<AppState>,
    Json(req): Json<MaterializeRequest>,
) -> Result<Json<MaterializedTable>, ApiError> {
    // Opening a missing file would create an empty database
    if req.source.database != ":memory:" && !FsPath::new(&req.source.database).exists() {
        return Err(ApiError::BadRequest(format!(
            "source database not found: {}",
            req.source.database
        )));
    }

    let started = Instant::now();
    let worker = state.clone();
    let result = tokio::task::spawn_blocking(move || worker.run_materialization(req))
        .await
        .map_err(join_error)?;
    let seconds = started.elapsed().as_secs_f64();

    match result {
        Ok(table) => {
            state.metrics.record_success(table.row_count, seconds);
            log_event!(
                level: tracing::Level::INFO,
                event: "materialized",
                table: table.name,
                source: table.source_identity,
                rows: table.row_count,
                duration_ms: (seconds * 1000.0) as u64,
            );
            Ok(Json(table))
        }
        Err(e) => {
            let outcome = match &e {
                ApiError::Materialize(inner) => inner.kind(),
                _ => "InternalError",
            };
            state.metrics.record_failure(outcome, seconds);
            warn!(outcome = outcome, "materialization rejected");
            Err(e)
        }
    }
}

async fn list_materializations(State(state): State<AppState>) -> Result<Json<Vec<ProvenanceRecord>>, ApiError> {
    let records = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let store = state.lock_store()?;
        let records = store.list_materializations()?;
        Ok(records)
    })
    .await
    .map_err(join_error)??;
    Ok(Json(records))
}

async fn drop_materialization(State(state): State<AppState>, Path(name): Path<String>) -> Result<StatusCode, ApiError> {
    tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let store = state.lock_store()?;
        store.drop_table(&name)?;
        Ok(())
    })
    .await
    .map_err(join_error)??;
    Ok(StatusCode::NO_CONTENT)
}

async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let text = state
        .metrics
        .render()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response())
}
