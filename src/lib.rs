//! Hourly ingestion of Seoul real-time city data.
//!
//! For a fixed list of area codes the job fetches population and road-traffic
//! records, concatenates them per record kind, and appends each table to SQLite.

pub mod apis;
pub mod app;
pub mod config;
pub mod constants;
pub mod error;
pub mod infra;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod types;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, RunReport};
pub use types::{AreaCode, RecordKind, Table, Value};

use std::sync::Arc;

/// Wire the production extractor and loader from configuration
pub fn build_pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    let http = Arc::new(infra::ReqwestHttp::new(config.request_timeout())?);
    let extractor = Arc::new(apis::SeoulCityData::new(http, &config.api));
    let loader = Arc::new(infra::SqliteLoader::open(&config.database.path)?);
    Ok(Pipeline::new(config.area_codes(), extractor, loader)
        .with_concurrency(config.api.concurrency)
        .with_run_timeout(config.run_timeout()))
}
