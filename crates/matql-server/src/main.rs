//! MATQL server
//!
//! HTTP front end for validating, compiling and materializing query
//! documents into the internal DuckDB store.

use anyhow::Context;
use matql_duck::DuckStore;
use tracing::info;

mod config;
mod logging;
mod metrics;
mod routes;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path = std::env::var("MATQL_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load(&config_path).with_context(|| format!("loading {}", config_path))?;
    config.apply_logging_env();
    logging::init();

    let store = DuckStore::open(&config.store.database, &config.store.schema)
        .with_context(|| format!("opening store {}", config.store.database))?;
    info!(
        database = %config.store.database,
        schema = %config.store.schema,
        grouping_policy = ?config.materialize.grouping_policy,
        "destination store ready"
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = routes::router(routes::AppState::new(config, store)?);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("MATQL server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
