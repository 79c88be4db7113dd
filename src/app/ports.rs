use crate::error::{FetchError, LoadError};
use crate::types::{AreaCode, AreaSnapshot, LoadResult, RecordKind, Table};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

// Ingest-side ports
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpGetResult, String>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Fetches the three per-area tables for one area code
#[async_trait]
pub trait ExtractorPort: Send + Sync {
    async fn fetch(
        &self,
        area: &AreaCode,
        cancel: &CancellationToken,
    ) -> Result<AreaSnapshot, FetchError>;
}

/// Append-only sink for merged tables
#[async_trait]
pub trait LoaderPort: Send + Sync {
    /// Append every row of `table` to `target`. Never truncates; a cancelled
    /// load leaves the target untouched.
    async fn load(
        &self,
        kind: RecordKind,
        table: Table,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<LoadResult, LoadError>;
}
